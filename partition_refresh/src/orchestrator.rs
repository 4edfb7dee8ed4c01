use std::fmt;

use refresh_query::{QueryEngineClient, RefreshError, RefreshSummary};
use refresh_queue::MessageSource;
use refresh_types::{ServiceError, StrategyMap};
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("queue operation failed: {0}")]
    Queue(#[from] ServiceError),

    #[error("refresh aborted: {0}")]
    Refresh(#[from] RefreshError),

    #[error("database '{database}' does not exist")]
    DatabaseMissing { database: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How a refresh cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The queue had nothing to deliver
    NoMessages,
    /// No received message referenced a bucket
    NoBuckets,
    Refreshed(RefreshSummary),
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMessages => write!(f, "no messages"),
            Self::NoBuckets => write!(f, "no buckets"),
            Self::Refreshed(summary) => write!(
                f,
                "{} refreshed, {} failed, {} skipped",
                summary.refreshed.len(),
                summary.failed.len(),
                summary.skipped.len()
            ),
        }
    }
}

/// Drives one receive, deduplicate, refresh and delete cycle
#[derive(Debug)]
pub struct RefreshOrchestrator {
    source: MessageSource,
    client: QueryEngineClient,
    strategies: StrategyMap,
}

impl RefreshOrchestrator {
    pub fn new(source: MessageSource, client: QueryEngineClient, strategies: StrategyMap) -> Self {
        Self {
            source,
            client,
            strategies,
        }
    }

    /// Run a single cycle
    ///
    /// Processed messages are deleted once every bucket has been handled, whether or not
    /// its refresh query succeeded. Nothing is deleted when the cycle aborts.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let messages = self.source.receive().await?;
        if messages.is_empty() {
            info!("No messages received, exiting");
            return Ok(CycleOutcome::NoMessages);
        }

        let buckets = self.source.unique_buckets(&messages);
        if buckets.is_empty() {
            error!("No buckets to refresh, exiting");
            return Ok(CycleOutcome::NoBuckets);
        }

        if !self.client.check_database_exists().await {
            return Err(Error::DatabaseMissing {
                database: self.client.database().to_string(),
            });
        }

        let summary = self.client.refresh(&buckets, &self.strategies).await?;
        if !summary.failed.is_empty() {
            warn!(failed = ?summary.failed, "some buckets were not refreshed");
        }

        let deleted = self.source.delete_processed().await?;
        info!(
            refreshed = summary.refreshed.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            deleted,
            "refresh cycle complete"
        );
        Ok(CycleOutcome::Refreshed(summary))
    }
}

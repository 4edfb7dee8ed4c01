//! Query submission, polling and the partition refresh built on top of it.
use std::{ops::ControlFlow, sync::Arc};

use refresh_backoff::BackoffPolicy;
use refresh_types::{BucketSet, RefreshStrategy, ServiceError, StrategyMap};
use tracing::{debug, error, info, warn};

use crate::{ExecutionId, QueryService, QueryState, ResultLocation, ResultSet};

/// Database used for statements that do not target the configured database
pub const DEFAULT_DATABASE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("bucket '{bucket}' is configured for add_hive_partition, which is not supported")]
    UnsupportedStrategy { bucket: String },
}

/// Terminal result of one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Succeeded(ResultSet),
    Failed(String),
    Cancelled,
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Rows of a successful query; empty for any other outcome
    pub fn rows(&self) -> &[crate::Row] {
        match self {
            Self::Succeeded(results) => &results.rows,
            Self::Failed(_) | Self::Cancelled => &[],
        }
    }
}

/// What a refresh did with each bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Buckets whose table was repaired
    pub refreshed: Vec<String>,
    /// Buckets whose refresh query did not succeed
    pub failed: Vec<String>,
    /// Buckets without a configured strategy
    pub skipped: Vec<String>,
}

impl RefreshSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs queries against one database, writing results below a dated location
#[derive(Debug)]
pub struct QueryEngineClient {
    service: Arc<dyn QueryService>,
    database: String,
    results_bucket: String,
    results_key_prefix: String,
    retry: BackoffPolicy,
    poll: BackoffPolicy,
}

impl QueryEngineClient {
    pub fn new(
        service: Arc<dyn QueryService>,
        database: impl Into<String>,
        results_bucket: impl Into<String>,
        results_key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            service,
            database: database.into(),
            results_bucket: results_bucket.into(),
            results_key_prefix: results_key_prefix.into(),
            retry: BackoffPolicy::default(),
            poll: BackoffPolicy::default(),
        }
    }

    /// Policy for submitting queries and fetching result pages
    pub fn with_retry_policy(self, retry: BackoffPolicy) -> Self {
        Self { retry, ..self }
    }

    /// Policy bounding how long a query status is polled
    pub fn with_poll_policy(self, poll: BackoffPolicy) -> Self {
        Self { poll, ..self }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Result location for a query issued now
    pub fn result_location(&self) -> ResultLocation {
        ResultLocation::today(&self.results_bucket, &self.results_key_prefix)
    }

    /// Run `query` to completion
    ///
    /// `database` defaults to the configured one. Failures are logged and reported as
    /// [`QueryOutcome::Failed`]; a query still pending when the poll budget runs out is
    /// reported as failed too, and is left running.
    pub async fn run_query(
        &self,
        query: &str,
        database: Option<&str>,
        location: &ResultLocation,
    ) -> QueryOutcome {
        let database = database.unwrap_or(self.database.as_str());
        let service = &self.service;

        let execution_id = match self
            .retry
            .retry_if("start_query", ServiceError::is_retryable, move || {
                service.start_query(query, database, location)
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(query, database, error = %e, "failed to start query");
                return QueryOutcome::Failed(e.to_string());
            }
        };
        debug!(%execution_id, query, database, %location, "query started");

        let id = &execution_id;
        let polled = self
            .poll
            .retry_with_backoff("query_status", move || async move {
                match service.query_status(id).await {
                    Ok(status) if status.state.is_terminal() => ControlFlow::Break(Ok(status)),
                    Ok(status) => ControlFlow::Continue(format!("query is {}", status.state)),
                    Err(e) if e.is_retryable() => ControlFlow::Continue(e.to_string()),
                    Err(e) => ControlFlow::Break(Err(e)),
                }
            })
            .await;

        let status = match polled {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                error!(%execution_id, query, error = %e, "failed to get query status");
                return QueryOutcome::Failed(e.to_string());
            }
            Err(last) => {
                error!(
                    %execution_id,
                    query,
                    %last,
                    "query did not complete before the polling budget ran out"
                );
                return QueryOutcome::Failed(format!(
                    "query {execution_id} did not complete: {last}"
                ));
            }
        };

        match status.state {
            QueryState::Succeeded => match self.fetch_results(&execution_id).await {
                Ok(results) => {
                    debug!(%execution_id, rows = results.rows.len(), "query succeeded");
                    QueryOutcome::Succeeded(results)
                }
                Err(e) => {
                    error!(%execution_id, query, error = %e, "failed to fetch query results");
                    QueryOutcome::Failed(e.to_string())
                }
            },
            QueryState::Cancelled => {
                error!(%execution_id, query, "query was cancelled");
                QueryOutcome::Cancelled
            }
            QueryState::Queued | QueryState::Running | QueryState::Failed => {
                let reason = status
                    .reason
                    .unwrap_or_else(|| format!("query ended in state {}", status.state));
                error!(%execution_id, query, %reason, "query failed");
                QueryOutcome::Failed(reason)
            }
        }
    }

    async fn fetch_results(&self, execution_id: &ExecutionId) -> Result<ResultSet, ServiceError> {
        let service = &self.service;
        let mut results = ResultSet::default();
        let mut next_token: Option<String> = None;

        loop {
            let token = next_token.as_deref();
            let page = self
                .retry
                .retry_if("query_results", ServiceError::is_retryable, move || {
                    service.query_results(execution_id, token)
                })
                .await?;

            results.rows.extend(page.rows);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(results),
            }
        }
    }

    /// Whether `table` exists in the configured database
    pub async fn check_table_exists(&self, table: &str) -> bool {
        let location = self.result_location();
        let query = format!("SHOW TABLES LIKE '{table}';");
        let outcome = self.run_query(&query, None, &location).await;
        exists_in(&outcome, table)
    }

    /// Whether the configured database exists
    pub async fn check_database_exists(&self) -> bool {
        let location = self.result_location();
        let query = format!("SHOW DATABASES LIKE '{}';", self.database);
        let outcome = self
            .run_query(&query, Some(DEFAULT_DATABASE), &location)
            .await;
        let exists = exists_in(&outcome, &self.database);
        if !exists {
            error!(database = %self.database, "database does not exist");
        }
        exists
    }

    /// Refresh the partitions of the table behind every bucket in `buckets`
    ///
    /// Buckets without a strategy are skipped with a warning and a failing query does not
    /// stop the remaining buckets. A bucket configured for adding partitions aborts the
    /// refresh, since that strategy is not supported.
    pub async fn refresh(
        &self,
        buckets: &BucketSet,
        strategies: &StrategyMap,
    ) -> Result<RefreshSummary, RefreshError> {
        let location = self.result_location();
        let mut summary = RefreshSummary::default();

        for bucket in buckets.iter() {
            let table = match strategies.strategy_for(bucket) {
                None => {
                    warn!(bucket, "unknown bucket, no refresh strategy configured");
                    summary.skipped.push(bucket.to_string());
                    continue;
                }
                Some(strategy @ RefreshStrategy::AddPartition { .. }) => {
                    error!(
                        bucket,
                        table = strategy.table(),
                        strategy = strategy.name(),
                        "refresh strategy is not supported"
                    );
                    return Err(RefreshError::UnsupportedStrategy {
                        bucket: bucket.to_string(),
                    });
                }
                Some(RefreshStrategy::RepairTable { table }) => table,
            };

            let query = format!("MSCK REPAIR TABLE {table};");
            match self.run_query(&query, None, &location).await {
                QueryOutcome::Succeeded(_) => {
                    info!(bucket, table = %table, "refreshed table partitions");
                    summary.refreshed.push(bucket.to_string());
                }
                QueryOutcome::Failed(_) | QueryOutcome::Cancelled => {
                    error!(bucket, table = %table, "failed to refresh table partitions");
                    summary.failed.push(bucket.to_string());
                }
            }
        }

        Ok(summary)
    }
}

fn exists_in(outcome: &QueryOutcome, name: &str) -> bool {
    match outcome {
        QueryOutcome::Succeeded(results) => results.contains_value(name),
        QueryOutcome::Failed(_) | QueryOutcome::Cancelled => false,
    }
}

//! Client for the serverless query engine that maintains table partitions.
//!
//! [`QueryEngineClient`] submits a query through a [`QueryService`], polls its status under a
//! bounded backoff policy and collects every result page. On top of that it offers the
//! existence checks and the per-bucket refresh used by the orchestrator.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use refresh_types::ServiceError;

#[cfg(feature = "aws")]
pub mod athena;
pub mod client;
pub mod location;
pub mod mock;

pub use client::{QueryEngineClient, QueryOutcome, RefreshError, RefreshSummary};
pub use location::ResultLocation;

/// Identifier the query engine assigns to a submitted query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a submitted query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    /// Whether the query will not change state anymore
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStatus {
    pub state: QueryState,
    /// Explanation supplied by the engine for failed or cancelled queries
    pub reason: Option<String>,
}

impl QueryStatus {
    pub fn new(state: QueryState) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    pub fn with_reason(self, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..self
        }
    }
}

/// One result row; `None` marks a null value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(pub Vec<Option<String>>);

impl Row {
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(Option::as_deref)
    }
}

impl<S: Into<String>> FromIterator<S> for Row {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|v| Some(v.into())).collect())
    }
}

/// All rows produced by a successful query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether any non-null value in any row equals `value`
    pub fn contains_value(&self, value: &str) -> bool {
        self.rows.iter().any(|row| row.values().any(|v| v == value))
    }
}

/// One page of results; `next_token` is set while more pages remain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPage {
    pub rows: Vec<Row>,
    pub next_token: Option<String>,
}

/// The query engine operations the refresh service relies on
#[async_trait]
pub trait QueryService: Debug + Send + Sync + 'static {
    /// Submit `query` for execution in `database`, writing results to `location`
    async fn start_query(
        &self,
        query: &str,
        database: &str,
        location: &ResultLocation,
    ) -> Result<ExecutionId, ServiceError>;

    async fn query_status(&self, execution_id: &ExecutionId) -> Result<QueryStatus, ServiceError>;

    /// Fetch the result page following `next_token`, or the first page when `None`
    async fn query_results(
        &self,
        execution_id: &ExecutionId,
        next_token: Option<&str>,
    ) -> Result<ResultPage, ServiceError>;
}

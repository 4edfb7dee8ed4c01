//! Scripted [`QueryService`] for tests
use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use refresh_types::ServiceError;

use crate::{
    ExecutionId, QueryService, QueryState, QueryStatus, ResultLocation, ResultPage, Row,
};

/// How the mock engine answers for one query text
///
/// Each status poll consumes the next scripted status; the last one repeats forever.
#[derive(Debug, Clone)]
pub struct QueryScript {
    statuses: Vec<Result<QueryStatus, ServiceError>>,
    pages: Vec<Vec<Row>>,
}

impl Default for QueryScript {
    fn default() -> Self {
        Self::succeeds(vec![])
    }
}

impl QueryScript {
    pub fn succeeds(rows: Vec<Row>) -> Self {
        Self {
            statuses: vec![Ok(QueryStatus::new(QueryState::Succeeded))],
            pages: vec![rows],
        }
    }

    pub fn fails(reason: impl Into<String>) -> Self {
        Self {
            statuses: vec![Ok(QueryStatus::new(QueryState::Failed).with_reason(reason))],
            pages: vec![],
        }
    }

    pub fn cancelled() -> Self {
        Self {
            statuses: vec![Ok(QueryStatus::new(QueryState::Cancelled))],
            pages: vec![],
        }
    }

    pub fn never_completes() -> Self {
        Self {
            statuses: vec![Ok(QueryStatus::new(QueryState::Running))],
            pages: vec![],
        }
    }

    /// Report the query as queued, then running, for `polls` polls before the scripted states
    pub fn after_polls(mut self, polls: usize) -> Self {
        let pending = (0..polls).map(|i| {
            let state = if i == 0 {
                QueryState::Queued
            } else {
                QueryState::Running
            };
            Ok(QueryStatus::new(state))
        });
        self.statuses.splice(0..0, pending);
        self
    }

    /// Fail the first status polls with `errors`
    pub fn with_status_errors(mut self, errors: impl IntoIterator<Item = ServiceError>) -> Self {
        let errors: Vec<_> = errors.into_iter().map(Err).collect();
        self.statuses.splice(0..0, errors);
        self
    }

    /// Split the result rows over several pages
    pub fn with_pages(self, pages: Vec<Vec<Row>>) -> Self {
        Self { pages, ..self }
    }
}

/// A query the mock engine was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedQuery {
    pub execution_id: ExecutionId,
    pub query: String,
    pub database: String,
    pub location: ResultLocation,
}

#[derive(Debug, Default)]
pub struct MockQueryService {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, QueryScript>,
    executions: HashMap<ExecutionId, Execution>,
    start_failures: VecDeque<ServiceError>,
    started: Vec<StartedQuery>,
    status_calls: usize,
    result_calls: usize,
}

#[derive(Debug)]
struct Execution {
    script: QueryScript,
    polls: usize,
}

impl MockQueryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` according to `script`; unscripted queries succeed without rows
    pub fn script(&self, query: impl Into<String>, script: QueryScript) {
        self.state.lock().scripts.insert(query.into(), script);
    }

    pub fn fail_next_start(&self, error: ServiceError) {
        self.state.lock().start_failures.push_back(error);
    }

    pub fn started(&self) -> Vec<StartedQuery> {
        self.state.lock().started.clone()
    }

    /// Text of every started query, in order
    pub fn queries(&self) -> Vec<String> {
        self.state
            .lock()
            .started
            .iter()
            .map(|s| s.query.clone())
            .collect()
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    pub fn result_calls(&self) -> usize {
        self.state.lock().result_calls
    }
}

#[async_trait]
impl QueryService for MockQueryService {
    async fn start_query(
        &self,
        query: &str,
        database: &str,
        location: &ResultLocation,
    ) -> Result<ExecutionId, ServiceError> {
        let mut state = self.state.lock();
        if let Some(e) = state.start_failures.pop_front() {
            return Err(e);
        }

        let execution_id = ExecutionId::new(format!("execution-{}", state.started.len() + 1));
        let script = state.scripts.get(query).cloned().unwrap_or_default();
        state
            .executions
            .insert(execution_id.clone(), Execution { script, polls: 0 });
        state.started.push(StartedQuery {
            execution_id: execution_id.clone(),
            query: query.to_string(),
            database: database.to_string(),
            location: location.clone(),
        });
        Ok(execution_id)
    }

    async fn query_status(&self, execution_id: &ExecutionId) -> Result<QueryStatus, ServiceError> {
        let mut state = self.state.lock();
        state.status_calls += 1;
        let execution = state.executions.get_mut(execution_id).ok_or_else(|| {
            ServiceError::fatal("query_status", format!("unknown execution {execution_id}"))
        })?;

        let last = execution.script.statuses.len().saturating_sub(1);
        let status = execution
            .script
            .statuses
            .get(execution.polls.min(last))
            .cloned()
            .unwrap_or_else(|| Ok(QueryStatus::new(QueryState::Succeeded)));
        execution.polls += 1;
        status
    }

    async fn query_results(
        &self,
        execution_id: &ExecutionId,
        next_token: Option<&str>,
    ) -> Result<ResultPage, ServiceError> {
        let mut state = self.state.lock();
        state.result_calls += 1;
        let execution = state.executions.get(execution_id).ok_or_else(|| {
            ServiceError::fatal("query_results", format!("unknown execution {execution_id}"))
        })?;

        let index = match next_token {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|i| i.parse::<usize>().ok())
                .ok_or_else(|| {
                    ServiceError::fatal("query_results", format!("invalid token {token}"))
                })?,
        };

        let pages = &execution.script.pages;
        let rows = pages.get(index).cloned().unwrap_or_default();
        let next_token = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));
        Ok(ResultPage { rows, next_token })
    }
}

//! [`QueryService`] backed by Amazon Athena
use async_trait::async_trait;
use aws_sdk_athena::{
    Client,
    types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration},
};
use refresh_types::{ServiceError, aws::classify_sdk_error};

use crate::{
    ExecutionId, QueryService, QueryState, QueryStatus, ResultLocation, ResultPage, Row,
};

#[derive(Debug, Clone)]
pub struct AthenaQueryService {
    client: Client,
}

impl AthenaQueryService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueryService for AthenaQueryService {
    async fn start_query(
        &self,
        query: &str,
        database: &str,
        location: &ResultLocation,
    ) -> Result<ExecutionId, ServiceError> {
        let output = self
            .client
            .start_query_execution()
            .query_string(query)
            .query_execution_context(QueryExecutionContext::builder().database(database).build())
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(location.to_string())
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify_sdk_error("start_query", e))?;

        output
            .query_execution_id()
            .map(ExecutionId::new)
            .ok_or_else(|| ServiceError::fatal("start_query", "no execution id returned"))
    }

    async fn query_status(&self, execution_id: &ExecutionId) -> Result<QueryStatus, ServiceError> {
        let output = self
            .client
            .get_query_execution()
            .query_execution_id(execution_id.as_str())
            .send()
            .await
            .map_err(|e| classify_sdk_error("query_status", e))?;

        let status = output
            .query_execution()
            .and_then(|execution| execution.status())
            .ok_or_else(|| {
                ServiceError::fatal("query_status", format!("no status for {execution_id}"))
            })?;

        let state = match status.state() {
            Some(QueryExecutionState::Queued) => QueryState::Queued,
            Some(QueryExecutionState::Running) => QueryState::Running,
            Some(QueryExecutionState::Succeeded) => QueryState::Succeeded,
            Some(QueryExecutionState::Failed) => QueryState::Failed,
            Some(QueryExecutionState::Cancelled) => QueryState::Cancelled,
            Some(other) => {
                return Err(ServiceError::fatal(
                    "query_status",
                    format!("unexpected state {other:?} for {execution_id}"),
                ));
            }
            None => QueryState::Queued,
        };

        let status = QueryStatus {
            state,
            reason: status.state_change_reason().map(ToString::to_string),
        };
        Ok(status)
    }

    async fn query_results(
        &self,
        execution_id: &ExecutionId,
        next_token: Option<&str>,
    ) -> Result<ResultPage, ServiceError> {
        let output = self
            .client
            .get_query_results()
            .query_execution_id(execution_id.as_str())
            .set_next_token(next_token.map(ToString::to_string))
            .send()
            .await
            .map_err(|e| classify_sdk_error("query_results", e))?;

        let rows: Vec<Row> = output
            .result_set()
            .map(|results| {
                results
                    .rows()
                    .iter()
                    .map(|row| {
                        Row(row
                            .data()
                            .iter()
                            .map(|datum| datum.var_char_value().map(ToString::to_string))
                            .collect())
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ResultPage {
            rows,
            next_token: output.next_token().map(ToString::to_string),
        })
    }
}

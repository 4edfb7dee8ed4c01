//! Mapping of AWS SDK failures onto [`ServiceError`]
use aws_smithy_runtime_api::client::{orchestrator::HttpResponse, result::SdkError};
use aws_smithy_types::error::{display::DisplayErrorContext, metadata::ProvideErrorMetadata};

use crate::ServiceError;

/// Error codes AWS services use to signal request rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottled",
    "RequestThrottledException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "SlowDown",
    "ProvisionedThroughputExceededException",
];

/// Error codes for service-side failures that are worth another attempt
const TRANSIENT_CODES: &[&str] = &[
    "InternalFailure",
    "InternalError",
    "InternalServerError",
    "InternalServerException",
    "ServiceUnavailable",
    "RequestTimeout",
    "RequestTimeoutException",
];

/// Classify an SDK error returned by `operation`
///
/// Connection, timeout and unparseable-response failures are transient; service errors are
/// classified by their error code and HTTP status.
pub fn classify_sdk_error<E>(
    operation: &'static str,
    err: SdkError<E, HttpResponse>,
) -> ServiceError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ServiceError::transient(operation, message)
        }
        SdkError::ServiceError(context) => match context.err().code() {
            Some(code) if THROTTLING_CODES.contains(&code) => {
                ServiceError::throttled(operation, message)
            }
            Some(code) if TRANSIENT_CODES.contains(&code) => {
                ServiceError::transient(operation, message)
            }
            _ if context.raw().status().as_u16() >= 500 => {
                ServiceError::transient(operation, message)
            }
            _ => ServiceError::fatal(operation, message),
        },
        _ => ServiceError::fatal(operation, message),
    }
}

/// Classify a bare error code, as reported per entry by batch operations
pub fn classify_code(operation: &'static str, code: &str, message: &str) -> ServiceError {
    let message = format!("{code}: {message}");
    if THROTTLING_CODES.contains(&code) {
        ServiceError::throttled(operation, message)
    } else if TRANSIENT_CODES.contains(&code) {
        ServiceError::transient(operation, message)
    } else {
        ServiceError::fatal(operation, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert!(matches!(
            classify_code("delete_messages", "ThrottlingException", "rate exceeded"),
            ServiceError::Throttled { .. }
        ));
        assert!(matches!(
            classify_code("start_query", "InternalServerException", "oops"),
            ServiceError::Transient { .. }
        ));
        let e = classify_code("start_query", "InvalidRequestException", "bad query");
        assert!(!e.is_retryable());
        assert_eq!(
            e.to_string(),
            "start_query failed: InvalidRequestException: bad query"
        );
    }
}

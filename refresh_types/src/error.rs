/// Error returned by the queue and query service collaborators
///
/// Throttling and transient failures are retried by the callers under a bounded backoff
/// policy; anything else propagates on the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("{operation} was throttled: {message}")]
    Throttled {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} failed transiently: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} failed: {message}")]
    Fatal {
        operation: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn throttled(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Throttled {
            operation,
            message: message.into(),
        }
    }

    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            message: message.into(),
        }
    }

    pub fn fatal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Fatal {
            operation,
            message: message.into(),
        }
    }

    /// Whether the call that produced this error may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Transient { .. })
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Throttled { operation, .. }
            | Self::Transient { operation, .. }
            | Self::Fatal { operation, .. } => operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::throttled("receive_messages", "slow down").is_retryable());
        assert!(ServiceError::transient("receive_messages", "timeout").is_retryable());
        assert!(!ServiceError::fatal("receive_messages", "access denied").is_retryable());
    }

    #[test]
    fn display() {
        let e = ServiceError::fatal("start_query", "bad syntax");
        assert_eq!(e.to_string(), "start_query failed: bad syntax");
        assert_eq!(e.operation(), "start_query");
    }
}

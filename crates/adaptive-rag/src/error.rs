//! Failure taxonomy for the external collaborators the pipeline talks to.
//!
//! Stages never bubble these up to the caller of `Orchestrator::process`;
//! the orchestrator classifies each one as a retryable stage failure or as a
//! fatal operational failure and routes accordingly.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("vector index is empty")]
    EmptyIndex,

    #[error("completion service rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("malformed model output: {0}")]
    Malformed(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl ServiceError {
    /// Whether the stage that hit this error may be retried by the pipeline loop.
    ///
    /// Rate limiting is handled with backoff at the call site, so by the time
    /// it reaches the pipeline the budget there is already spent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Malformed(_))
    }

    /// Short machine-readable label, used in trace entries and verdict reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IndexUnavailable(_) => "index_unavailable",
            Self::EmptyIndex => "empty_index",
            Self::RateLimited { .. } => "rate_limited",
            Self::Malformed(_) => "malformed_output",
            Self::Timeout { .. } => "timeout",
            Self::Transport(_) => "transport_error",
            Self::Embedding(_) => "embedding_error",
        }
    }
}

/// Bound an external call by a wall-clock limit, mapping expiry to `Timeout`.
pub async fn with_timeout<T, F>(
    operation: &str,
    limit: Duration,
    call: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, seconds = limit.as_secs(), "External call timed out");
            Err(ServiceError::Timeout {
                operation: operation.to_string(),
                seconds: limit.as_secs(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ServiceError::Malformed("x".into()).is_retryable());
        assert!(ServiceError::Timeout {
            operation: "grade".into(),
            seconds: 5
        }
        .is_retryable());
        assert!(!ServiceError::IndexUnavailable("gone".into()).is_retryable());
        assert!(!ServiceError::EmptyIndex.is_retryable());
        assert!(!ServiceError::RateLimited { attempts: 3 }.is_retryable());
        assert!(!ServiceError::Transport("refused".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through_result() {
        let ok: Result<u32, ServiceError> =
            with_timeout("fast", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32, ServiceError> = with_timeout("fast", Duration::from_secs(1), async {
            Err(ServiceError::EmptyIndex)
        })
        .await;
        assert_eq!(err, Err(ServiceError::EmptyIndex));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<(), ServiceError> =
            with_timeout("slow", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Timeout { ref operation, .. }) if operation == "slow"));
    }
}

use thiserror::Error;

/// Errors surfaced by an [`crate::AgentService`] implementation.
///
/// `ServerUnreachable` and `SessionHung` are the two variants the resilience
/// layer and error-handling design name explicitly.
#[derive(Debug, Error)]
pub enum AgentServiceError {
    #[error("AI service unreachable: {0}")]
    ServerUnreachable(String),

    #[error("session hung: no progress within budget")]
    SessionHung,

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transient AI service error: {0}")]
    Transient(String),

    #[error("AI service request failed: {0}")]
    Other(#[from] anyhow::Error),
}

impl AgentServiceError {
    /// Whether this error should short-circuit the retry/backoff executor
    /// rather than be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AgentServiceError::RateLimited(_)
                | AgentServiceError::AuthFailed(_)
                | AgentServiceError::QuotaExceeded(_)
                | AgentServiceError::PermissionDenied(_)
        )
    }
}

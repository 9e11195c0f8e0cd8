use thiserror::Error;

/// Errors surfaced by a [`crate::Tracker`] implementation.
///
/// The variants line up with the error-handling policy: `RateLimited`,
/// `AuthFailed`, `NotFound`, and `PermissionDenied` are non-retryable;
/// `Transient` is retryable by the caller's retry/backoff policy.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("ticket {0} not found")]
    NotFound(u64),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transient tracker error: {0}")]
    Transient(String),

    #[error("tracker request failed: {0}")]
    Other(#[from] anyhow::Error),
}

impl TrackerError {
    /// Whether this error should short-circuit the retry/backoff executor
    /// rather than be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TrackerError::NotFound(_)
                | TrackerError::RateLimited(_)
                | TrackerError::AuthFailed(_)
                | TrackerError::PermissionDenied(_)
        )
    }
}

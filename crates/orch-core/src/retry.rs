//! Retry/Backoff executor.
//!
//! Retries a thunk up to `max_attempts`, delaying
//! `initial * multiplier^(k-2)` before attempt `k` (k >= 2). An error is
//! non-retryable either because its message matches one of a fixed set of
//! substrings, or because the error type itself knows it is non-retryable
//! (e.g. [`orch_tracker::TrackerError::is_retryable`]).

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Substrings (case-insensitive) that mark an error message as
/// non-retryable.
const NON_RETRYABLE_MARKERS: &[&str] = &[
    "rate limit",
    "quota exceeded",
    "authentication",
    "not found",
    "permission denied",
];

/// Whether an error message matches one of the non-retryable markers.
pub fn message_is_non_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    NON_RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Types that know whether an instance of themselves should be retried.
///
/// A caller can also force non-retry regardless of this via
/// [`RetryConfig::disable_retry`]-style per-call flags passed through the
/// thunk's own error value.
pub trait RetryClassify {
    fn is_retryable(&self) -> bool;
}

impl RetryClassify for orch_tracker::TrackerError {
    fn is_retryable(&self) -> bool {
        orch_tracker::TrackerError::is_retryable(self)
    }
}

impl RetryClassify for orch_ai::AgentServiceError {
    fn is_retryable(&self) -> bool {
        orch_ai::AgentServiceError::is_retryable(self)
    }
}

/// Configuration for the retry/backoff executor.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `k` (k >= 2); attempt 1 has no delay.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi((attempt - 2) as i32);
        Duration::from_secs_f64(self.initial_delay.as_secs_f64() * factor)
    }
}

/// The error returned once all attempts are exhausted or a non-retryable
/// error is hit; wraps the last (or only) underlying error.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RetryExhausted<E: std::fmt::Display>(pub E);

/// Execute `thunk` up to `config.max_attempts` times.
///
/// `thunk` is called with the 1-based attempt number. Retries happen only
/// while the returned error is retryable by both [`message_is_non_retryable`]
/// and [`RetryClassify::is_retryable`].
pub async fn retry_with<F, Fut, T, E>(
    config: &RetryConfig,
    mut thunk: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + RetryClassify,
{
    let mut attempt = 1u32;
    loop {
        if attempt > 1 {
            let delay = config.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        match thunk(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = err.is_retryable() && !message_is_non_retryable(&err.to_string());

                if !retryable {
                    debug!(attempt, "non-retryable error, short-circuiting");
                    return Err(RetryExhausted(err));
                }

                if attempt >= config.max_attempts {
                    warn!(attempt, max = config.max_attempts, "retry attempts exhausted");
                    return Err(RetryExhausted(err));
                }

                warn!(attempt, error = %err, "retrying after failure");
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct AlwaysRetryable(String);

    impl std::fmt::Display for AlwaysRetryable {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl RetryClassify for AlwaysRetryable {
        fn is_retryable(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_no_delay() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
        };
        let result: Result<i32, RetryExhausted<AlwaysRetryable>> =
            retry_with(&config, |_attempt| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn succeeds_on_attempt_k_of_m() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
        };
        let result = retry_with(&config, |attempt| {
            let calls = &calls;
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(AlwaysRetryable("transient".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
        };
        let result: Result<i32, _> = retry_with(&config, |_attempt| async {
            Err::<i32, _>(AlwaysRetryable("always fails".to_string()))
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_retryable_message_short_circuits_after_one_attempt() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
        };
        let result = retry_with(&config, |_attempt| {
            let calls = &calls;
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(AlwaysRetryable("authentication failed".to_string()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_before_matches_formula() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
        };
        assert_eq!(config.delay_before(1), Duration::ZERO);
        assert_eq!(config.delay_before(2), Duration::from_millis(100));
        assert_eq!(config.delay_before(3), Duration::from_millis(200));
        assert_eq!(config.delay_before(4), Duration::from_millis(400));
    }

    #[test]
    fn message_matching_is_case_insensitive() {
        assert!(message_is_non_retryable("Rate Limit exceeded"));
        assert!(message_is_non_retryable("QUOTA EXCEEDED for this key"));
        assert!(!message_is_non_retryable("connection reset by peer"));
    }
}

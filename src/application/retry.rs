//! Uniform retry policy for outbound calls.
//!
//! Every API call goes through [`with_retry`]: the governor gates each
//! attempt, throttle signals feed the governor's cooldown without consuming
//! the retry budget, transient errors burn an attempt with exponential
//! backoff, and fatal errors return immediately.

use std::future::Future;
use std::time::Duration;

use crate::domain::{ApiError, RetryConfig};

use super::rate_governor::RateGovernor;

/// Resolved retry policy (max attempts, backoff schedule).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff delay before retrying after the nth failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }
}

/// Run `call` until it succeeds, the retry budget is exhausted, or a fatal
/// error class is returned.
///
/// # Errors
/// Returns the last error once the budget is exhausted, or the first
/// non-transient error immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    governor: &RateGovernor,
    label: &str,
    mut call: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        governor.acquire(1).await;
        match call().await {
            Ok(value) => {
                governor.report_success().await;
                return Ok(value);
            }
            Err(ApiError::Throttled { retry_after }) => {
                // Governed wait, not a failure: the budget stays intact.
                tracing::warn!(call = label, hint = ?retry_after, "throttled, deferring to governor");
                governor.report_throttled(retry_after).await;
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    call = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::debug!(call = label, attempt, error = %err, "giving up");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
        }
    }

    fn fast_governor() -> RateGovernor {
        RateGovernor::new(60_000, 100)
    }

    #[test]
    fn test_delay_schedule_doubles_to_cap() {
        let policy = policy(5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8));
        assert_eq!(policy.delay_for(10), Duration::from_millis(8));
    }

    #[tokio::test]
    async fn test_transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(5), &fast_governor(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApiError::transient("flaky"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ApiError> = with_retry(&policy(3), &fast_governor(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::transient("still down")) }
        })
        .await;

        assert!(matches!(result, Err(ApiError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ApiError> = with_retry(&policy(5), &fast_governor(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ApiError::Auth {
                    message: "invalid_auth".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ApiError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_throttles_do_not_consume_the_budget() {
        let calls = AtomicU32::new(0);
        // max_attempts = 1, yet two throttles before success still succeed.
        let result = with_retry(&policy(1), &fast_governor(), "test", || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(ApiError::Throttled {
                    retry_after: Some(Duration::from_millis(5)),
                }),
                _ => Ok("done"),
            }
        })
        .await;

        assert_eq!(result.ok(), Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

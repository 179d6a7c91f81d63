//! Bounded retry with exponential backoff for external calls.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::TransportError;

/// Upper bound for a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from `base_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }
}

/// Result of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy
/// is exhausted. `op` receives the 1-based attempt number.
pub fn retry_with_backoff<T, E, R, F>(
    policy: &RetryPolicy,
    operation: &str,
    retryable: R,
    mut op: F,
) -> Attempted<T, E>
where
    E: Display,
    R: Fn(&E) -> bool,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => {
                debug!(operation, attempt, "operation succeeded");
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) => {
                let can_retry = retryable(&err) && attempt < policy.max_attempts;
                if !can_retry {
                    warn!(operation, attempt, %err, "operation failed, giving up");
                    return Attempted {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %err,
                    "operation failed, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Retry a platform call on transient failures only.
pub fn retry_transport<T, F>(
    policy: &RetryPolicy,
    operation: &str,
    op: F,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Result<T, TransportError>,
{
    retry_with_backoff(policy, operation, |err: &TransportError| err.reason.is_retryable(), op).result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(40), MAX_DELAY);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn retries_transient_until_success() {
        let attempted = retry_with_backoff(
            &instant(3),
            "test",
            |err: &TransportError| err.reason.is_retryable(),
            |attempt| {
                if attempt < 3 {
                    Err(TransportError::network("reset"))
                } else {
                    Ok(attempt)
                }
            },
        );
        assert_eq!(attempted.result.expect("ok"), 3);
        assert_eq!(attempted.attempts, 3);
    }

    #[test]
    fn stops_on_non_retryable() {
        let attempted: Attempted<(), TransportError> = retry_with_backoff(
            &instant(5),
            "test",
            |err: &TransportError| err.reason.is_retryable(),
            |_| Err(TransportError::other("not found")),
        );
        assert_eq!(attempted.attempts, 1);
        assert_eq!(
            attempted.result.expect_err("fails").reason,
            FailureReason::Other
        );
    }

    #[test]
    fn exhausts_policy() {
        let mut calls = 0;
        let result: Result<(), TransportError> = retry_transport(&instant(2), "test", |_| {
            calls += 1;
            Err(TransportError::rate_limit("slow down"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}

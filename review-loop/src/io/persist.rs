//! Retrying persistence of workflow state.
//!
//! The comment thread is the only store. An append that still fails after
//! retries comes back as `PersistOutcome::Failed` for the error reporter.

use serde::Serialize;
use tracing::{error, info};

use crate::core::state::WorkflowState;
use crate::core::types::ThreadRef;
use crate::error::{FailureReason, TransportError};
use crate::io::github::CommentPlatform;
use crate::io::retry::{RetryPolicy, retry_with_backoff};
use crate::io::store::StateStore;

/// Terminal persistence failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistFailure {
    pub reason: FailureReason,
    /// Text of the last underlying error, if it had any.
    pub last_error: Option<String>,
    pub attempt_count: u32,
}

/// Outcome of [`RetryingPersister::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The append succeeded; `state` is what is now authoritative.
    Persisted { state: WorkflowState, attempts: u32 },
    /// Nothing was written.
    Failed(PersistFailure),
}

impl PersistOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryingPersister {
    policy: RetryPolicy,
}

impl RetryingPersister {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `write` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only `rate_limit` and `network` failures are retried.
    pub fn apply<F>(&self, state: WorkflowState, mut write: F) -> PersistOutcome
    where
        F: FnMut(&WorkflowState) -> Result<(), TransportError>,
    {
        let attempted = retry_with_backoff(
            &self.policy,
            "persist state",
            |err: &TransportError| err.reason.is_retryable(),
            |_| write(&state),
        );
        match attempted.result {
            Ok(()) => {
                info!(step = %state.step, iteration = state.iteration, attempts = attempted.attempts, "state persisted");
                PersistOutcome::Persisted {
                    state,
                    attempts: attempted.attempts,
                }
            }
            Err(err) => {
                error!(
                    reason = %err.reason,
                    attempts = attempted.attempts,
                    error = %err.message,
                    "state persistence failed"
                );
                let message = err.message.trim();
                PersistOutcome::Failed(PersistFailure {
                    reason: err.reason,
                    last_error: (!message.is_empty()).then(|| message.to_string()),
                    attempt_count: attempted.attempts,
                })
            }
        }
    }

    /// Append `state` to `thread` through `store`.
    pub fn persist<P: CommentPlatform + ?Sized>(
        &self,
        store: &StateStore<'_, P>,
        thread: ThreadRef,
        state: WorkflowState,
        title: &str,
        body: &str,
    ) -> PersistOutcome {
        self.apply(state, |s| store.append_state(thread, s, title, body))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::*;

    fn persister(attempts: u32) -> RetryingPersister {
        RetryingPersister::new(RetryPolicy::new(attempts, Duration::ZERO))
    }

    #[test]
    fn success_returns_state_directly() {
        let state = WorkflowState::initial().advance().expect("advance");
        let outcome = persister(3).apply(state.clone(), |_| Ok(()));
        assert_eq!(
            outcome,
            PersistOutcome::Persisted {
                state,
                attempts: 1
            }
        );
    }

    #[test]
    fn retries_rate_limit_then_succeeds() {
        let calls = Cell::new(0);
        let outcome = persister(3).apply(WorkflowState::initial(), |_| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(TransportError::rate_limit("API rate limit exceeded"))
            } else {
                Ok(())
            }
        });
        assert!(outcome.is_success());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhaustion_is_a_value_not_a_panic() {
        let outcome = persister(3).apply(WorkflowState::initial(), |_| {
            Err(TransportError::network("connection reset"))
        });
        assert_eq!(
            outcome,
            PersistOutcome::Failed(PersistFailure {
                reason: FailureReason::Network,
                last_error: Some("connection reset".to_string()),
                attempt_count: 3,
            })
        );
    }

    #[test]
    fn other_failures_are_not_retried() {
        let calls = Cell::new(0);
        let outcome = persister(3).apply(WorkflowState::initial(), |_| {
            calls.set(calls.get() + 1);
            Err(TransportError::other("   "))
        });
        assert_eq!(calls.get(), 1);
        match outcome {
            PersistOutcome::Failed(failure) => {
                assert_eq!(failure.reason, FailureReason::Other);
                assert_eq!(failure.last_error, None);
                assert_eq!(failure.attempt_count, 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

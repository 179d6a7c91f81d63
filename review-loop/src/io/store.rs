//! Comment-thread state store.
//!
//! The thread is the only durable store: reads resolve the latest valid marker,
//! writes append a brand-new comment. Nothing here edits or deletes comments.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::codec::{InvalidStepPolicy, encode};
use crate::core::state::WorkflowState;
use crate::core::thread::{ResolvedState, resolve_latest_state, search_command_in_comments};
use crate::core::types::{CommentRecord, ThreadRef};
use crate::error::TransportError;
use crate::io::github::CommentPlatform;
use crate::io::retry::{RetryPolicy, retry_transport};

/// Result of reading a thread: the authoritative state and the comments it was
/// resolved from.
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub thread: ThreadRef,
    pub resolved: ResolvedState,
    pub comments: Vec<CommentRecord>,
    /// True if the first read was too slow and the thread was read again.
    pub reread: bool,
}

impl ThreadSnapshot {
    pub fn state(&self) -> &WorkflowState {
        &self.resolved.state
    }

    pub fn has_command_evidence(&self, token: &str) -> bool {
        search_command_in_comments(&self.comments, token)
    }
}

pub struct StateStore<'a, P: CommentPlatform + ?Sized> {
    platform: &'a P,
    read_policy: RetryPolicy,
    stale_threshold: Duration,
    invalid_step_policy: InvalidStepPolicy,
}

impl<'a, P: CommentPlatform + ?Sized> StateStore<'a, P> {
    pub fn new(
        platform: &'a P,
        read_policy: RetryPolicy,
        stale_threshold: Duration,
        invalid_step_policy: InvalidStepPolicy,
    ) -> Self {
        Self {
            platform,
            read_policy,
            stale_threshold,
            invalid_step_policy,
        }
    }

    pub fn platform(&self) -> &'a P {
        self.platform
    }

    /// Fetch the thread with bounded retries on transient failures.
    pub fn fetch_comments(&self, thread: ThreadRef) -> Result<Vec<CommentRecord>, TransportError> {
        retry_transport(&self.read_policy, "fetch comments", |_| {
            self.platform.fetch_comments(thread)
        })
    }

    /// Resolve the latest state on `thread`.
    ///
    /// If fetching and resolving took longer than the staleness threshold, the
    /// snapshot may already be superseded by a concurrent writer, so the thread
    /// is read once more and the second result is used.
    #[instrument(skip_all, fields(thread = %thread))]
    pub fn read_state(&self, thread: ThreadRef) -> Result<ThreadSnapshot> {
        let started = Instant::now();
        let first = self.read_once(thread)?;
        let elapsed = started.elapsed();
        if elapsed <= self.stale_threshold {
            return Ok(first);
        }

        warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_ms = self.stale_threshold.as_millis() as u64,
            "slow state read, re-reading thread before trusting it"
        );
        let second = self.read_once(thread)?;
        if second.resolved.comment_id != first.resolved.comment_id {
            warn!(
                first = ?first.resolved.comment_id,
                second = ?second.resolved.comment_id,
                "state changed during slow read"
            );
        }
        Ok(ThreadSnapshot {
            reread: true,
            ..second
        })
    }

    fn read_once(&self, thread: ThreadRef) -> Result<ThreadSnapshot> {
        let comments = self
            .fetch_comments(thread)
            .with_context(|| format!("fetch comments for {thread}"))?;
        let resolved = resolve_latest_state(&comments, self.invalid_step_policy)
            .with_context(|| format!("resolve state on {thread}"))?;
        debug!(
            comments = comments.len(),
            source = ?resolved.comment_id,
            step = %resolved.state.step,
            "state read"
        );
        Ok(ThreadSnapshot {
            thread,
            resolved,
            comments,
            reread: false,
        })
    }

    /// Encode `state` and append it as a new comment. Single attempt; see
    /// `io::persist` for the retrying wrapper.
    pub fn append_state(
        &self,
        thread: ThreadRef,
        state: &WorkflowState,
        title: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        let comment = encode(state, title, body)
            .map_err(|err| TransportError::other(format!("encode state: {err}")))?;
        self.platform.post_comment(thread, &comment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::Step;
    use crate::core::thread::get_latest_state;
    use crate::test_support::FakePlatform;

    fn store(platform: &FakePlatform, threshold: Duration) -> StateStore<'_, FakePlatform> {
        StateStore::new(
            platform,
            RetryPolicy::new(3, Duration::ZERO),
            threshold,
            InvalidStepPolicy::Restart,
        )
    }

    #[test]
    fn append_then_read_returns_new_state() {
        let platform = FakePlatform::new();
        let thread = ThreadRef::issue(7);
        let store = store(&platform, Duration::from_secs(60));
        let next = WorkflowState::initial().advance().expect("advance");

        store
            .append_state(thread, &next, "Step p1-1 complete", "details")
            .expect("append");
        let snapshot = store.read_state(thread).expect("read");

        assert_eq!(snapshot.state(), &next);
        assert!(!snapshot.reread);
        assert_eq!(platform.comments(thread).len(), 1);
    }

    #[test]
    fn append_never_touches_existing_comments() {
        let platform = FakePlatform::new();
        let thread = ThreadRef::issue(7);
        platform.add_comment(thread, "alice", "first human comment");
        let store = store(&platform, Duration::from_secs(60));

        store
            .append_state(thread, &WorkflowState::initial(), "t", "")
            .expect("append");
        let comments = platform.comments(thread);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].body, "first human comment");
        assert_eq!(get_latest_state(&comments).step, Step::P1MonitorWorkflow);
    }

    #[test]
    fn transient_fetch_failures_are_retried() {
        let platform = FakePlatform::new();
        let thread = ThreadRef::issue(7);
        platform.fail_fetches(vec![TransportError::network("reset")]);
        let snapshot = store(&platform, Duration::from_secs(60))
            .read_state(thread)
            .expect("read");
        assert_eq!(snapshot.state(), &WorkflowState::initial());
        assert_eq!(platform.fetch_count(), 2);
    }

    #[test]
    fn slow_read_triggers_reread() {
        let platform = FakePlatform::new();
        platform.set_fetch_delay(Duration::from_millis(20));
        let snapshot = store(&platform, Duration::from_millis(1))
            .read_state(ThreadRef::issue(7))
            .expect("read");
        assert!(snapshot.reread);
        assert_eq!(platform.fetch_count(), 2);
    }

    #[test]
    fn non_transient_fetch_failure_surfaces() {
        let platform = FakePlatform::new();
        platform.fail_fetches(vec![TransportError::other("HTTP 404: Not Found")]);
        let err = store(&platform, Duration::from_secs(60))
            .read_state(ThreadRef::issue(7))
            .expect_err("404");
        assert!(format!("{err:#}").contains("Not Found"));
        assert_eq!(platform.fetch_count(), 1);
    }
}

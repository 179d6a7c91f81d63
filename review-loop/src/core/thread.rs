//! Reducers over an append-only comment thread.
//!
//! Conflict resolution is "most recent valid marker wins": the thread is
//! scanned newest to oldest and the first comment whose marker decodes and
//! validates is authoritative. Older or malformed markers are never merged.

use tracing::{debug, error, warn};

use crate::core::codec::{InvalidStepPolicy, extract_marker, safe_parse, validate_with_policy};
use crate::core::state::WorkflowState;
use crate::core::types::CommentRecord;
use crate::error::WorkflowError;

/// Authoritative state plus the comment it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedState {
    pub state: WorkflowState,
    /// `None` when no valid marker exists and the initial state was synthesized.
    pub comment_id: Option<u64>,
}

/// Latest valid state in `comments`, or the initial state.
pub fn get_latest_state(comments: &[CommentRecord]) -> WorkflowState {
    resolve_latest_state(comments, InvalidStepPolicy::Restart)
        .map(|resolved| resolved.state)
        .unwrap_or_default()
}

/// Scan newest to oldest for the authoritative state.
///
/// Parse and security failures are logged and the scan moves to the next older
/// comment. Validation failures do the same under [`InvalidStepPolicy::Restart`];
/// under [`InvalidStepPolicy::Halt`] they abort the scan.
pub fn resolve_latest_state(
    comments: &[CommentRecord],
    policy: InvalidStepPolicy,
) -> Result<ResolvedState, WorkflowError> {
    for comment in comments.iter().rev() {
        let Some(payload) = extract_marker(&comment.body) else {
            continue;
        };
        match safe_parse(payload).and_then(|value| validate_with_policy(&value, policy)) {
            Ok(state) => {
                debug!(comment_id = comment.id, step = %state.step, iteration = state.iteration, "resolved state");
                return Ok(ResolvedState {
                    state,
                    comment_id: Some(comment.id),
                });
            }
            Err(err) if err.is_security() => {
                error!(
                    comment_id = comment.id,
                    author = %comment.author,
                    %err,
                    "rejected hostile state payload, possible attack"
                );
            }
            Err(WorkflowError::Validation(msg)) if policy == InvalidStepPolicy::Halt => {
                error!(comment_id = comment.id, %msg, "corrupt state comment, halting");
                return Err(WorkflowError::validation(format!(
                    "state comment {} is corrupt: {msg}",
                    comment.id
                )));
            }
            Err(err) => {
                warn!(comment_id = comment.id, %err, "skipping unreadable state comment");
            }
        }
    }
    debug!("no valid state marker found, using initial state");
    Ok(ResolvedState {
        state: WorkflowState::initial(),
        comment_id: None,
    })
}

/// True iff `token` occurs verbatim in any comment body.
///
/// Case-sensitive substring match with no normalization: code fences, inline
/// code, and link text all count. An empty token matches any comment.
pub fn search_command_in_comments(comments: &[CommentRecord], token: &str) -> bool {
    comments.iter().any(|comment| comment.body.contains(token))
}

/// Comments carrying a marker, oldest first, with the raw payload.
pub fn marker_comments(comments: &[CommentRecord]) -> Vec<(&CommentRecord, &str)> {
    comments
        .iter()
        .filter_map(|comment| extract_marker(&comment.body).map(|payload| (comment, payload)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::encode;
    use crate::core::step::{Phase, Step};

    fn comment(id: u64, body: &str) -> CommentRecord {
        CommentRecord {
            id,
            author: "bot".to_string(),
            body: body.to_string(),
            created_at: format!("2026-01-01T00:00:{id:02}Z"),
        }
    }

    fn state_at(step: Step, completed: Vec<Step>, iteration: u32) -> WorkflowState {
        WorkflowState {
            iteration,
            step,
            completed_steps: completed,
            phase: step.phase(),
            max_iterations: None,
        }
    }

    #[test]
    fn finds_state_after_plain_comment() {
        let comments = vec![
            comment(1, "hi"),
            comment(
                2,
                r#"<!-- review-loop-state:{"iteration":2,"step":"p1-2","completedSteps":["p1-1"],"phase":"phase1"} -->"#,
            ),
        ];
        let state = get_latest_state(&comments);
        assert_eq!(
            state,
            WorkflowState {
                iteration: 2,
                step: Step::P1CodeReview,
                completed_steps: vec![Step::P1MonitorWorkflow],
                phase: Phase::Phase1,
                max_iterations: None,
            }
        );
    }

    #[test]
    fn newest_valid_marker_wins() {
        let older = state_at(Step::P1CodeReview, vec![Step::P1MonitorWorkflow], 0);
        let newer = older.advance().expect("advance");
        let comments = vec![
            comment(1, &encode(&older, "older", "").expect("encode")),
            comment(2, &encode(&newer, "newer", "").expect("encode")),
            comment(3, "human reply without marker"),
        ];
        let resolved =
            resolve_latest_state(&comments, InvalidStepPolicy::Restart).expect("resolve");
        assert_eq!(resolved.state, newer);
        assert_eq!(resolved.comment_id, Some(2));
    }

    #[test]
    fn malformed_and_hostile_markers_fall_back_to_older() {
        let good = state_at(Step::P1SecurityReview, vec![Step::P1MonitorWorkflow], 1);
        let comments = vec![
            comment(1, &encode(&good, "good", "").expect("encode")),
            comment(2, "<!-- review-loop-state:{broken -->"),
            comment(
                3,
                r#"<!-- review-loop-state:{"step":"p2-1","__proto__":{"admin":true}} -->"#,
            ),
            comment(4, "<!-- review-loop-state:[1,2,3] -->"),
        ];
        let resolved =
            resolve_latest_state(&comments, InvalidStepPolicy::Restart).expect("resolve");
        assert_eq!(resolved.comment_id, Some(1));
        assert_eq!(resolved.state, good);
    }

    #[test]
    fn empty_or_markerless_thread_yields_initial_state() {
        assert_eq!(get_latest_state(&[]), WorkflowState::initial());
        let comments = vec![comment(1, "nothing here"), comment(2, "<!-- just html -->")];
        let resolved =
            resolve_latest_state(&comments, InvalidStepPolicy::Restart).expect("resolve");
        assert_eq!(resolved.comment_id, None);
        assert_eq!(resolved.state, WorkflowState::initial());
    }

    #[test]
    fn halt_policy_surfaces_corrupt_step() {
        let comments = vec![comment(
            5,
            r#"<!-- review-loop-state:{"iteration":1,"step":"p9-9","completedSteps":[],"phase":"phase1"} -->"#,
        )];
        let err = resolve_latest_state(&comments, InvalidStepPolicy::Halt).expect_err("halt");
        assert!(err.to_string().contains("comment 5"));

        let restarted = get_latest_state(&comments);
        assert_eq!(restarted.step, Step::P1MonitorWorkflow);
        assert_eq!(restarted.iteration, 1);
    }

    #[test]
    fn command_search_is_exact_substring() {
        let comments = vec![
            comment(1, "Ran it:\n```\n/review-pr --all\n```"),
            comment(2, "see [`/security-review`](https://example.com)"),
        ];
        assert!(search_command_in_comments(&comments, "/review-pr"));
        assert!(search_command_in_comments(&comments, "/security-review"));
        assert!(!search_command_in_comments(&comments, "/REVIEW-PR"));
        assert!(!search_command_in_comments(&comments, "/deploy"));
    }

    #[test]
    fn empty_token_matches_any_comment() {
        assert!(search_command_in_comments(&[comment(1, "")], ""));
        assert!(!search_command_in_comments(&[], ""));
    }

    #[test]
    fn marker_comments_lists_payloads_oldest_first() {
        let comments = vec![
            comment(1, "<!-- review-loop-state:{} -->"),
            comment(2, "plain"),
            comment(3, "<!-- review-loop-state:{\"step\":\"p1-2\"} -->"),
        ];
        let markers = marker_comments(&comments);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].0.id, 1);
        assert_eq!(markers[1].1, "{\"step\":\"p1-2\"}");
    }
}

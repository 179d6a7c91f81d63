//! End-to-end workflow tests driven through the router with a scripted
//! platform.
//!
//! Each test plays the agent: ask for the next step, post evidence where a
//! review step needs it, and complete the step. The comment threads on the
//! fake platform are the only state carried between calls.

use std::time::Duration;

use review_loop::core::codec::InvalidStepPolicy;
use review_loop::core::state::WorkflowState;
use review_loop::core::step::{STEP_ORDER, Step};
use review_loop::core::thread::get_latest_state;
use review_loop::core::types::ThreadRef;
use review_loop::error::TransportError;
use review_loop::exit_codes;
use review_loop::io::persist::RetryingPersister;
use review_loop::io::retry::RetryPolicy;
use review_loop::io::store::StateStore;
use review_loop::response::TemplateFormatter;
use review_loop::router::{Outcome, Router};
use review_loop::test_support::{FakePlatform, clean_snapshot, comment, snapshot};

const BRANCH: &str = "12-add-login";

fn router<'a>(
    platform: &'a FakePlatform,
    formatter: &'a TemplateFormatter,
    policy: InvalidStepPolicy,
) -> Router<'a, FakePlatform, TemplateFormatter> {
    let retry = RetryPolicy::new(3, Duration::ZERO);
    Router::new(
        StateStore::new(platform, retry, Duration::from_secs(60), policy),
        RetryingPersister::new(retry),
        formatter,
    )
}

/// Full lifecycle: phase1 on the issue, PR creation, phase2 on the PR, approval.
///
/// Review steps are completed only after their command token was posted.
#[test]
fn full_lifecycle_reaches_approval() {
    let platform = FakePlatform::new();
    let formatter = TemplateFormatter::new().expect("formatter");
    let router = router(&platform, &formatter, InvalidStepPolicy::Restart);
    let issue = ThreadRef::issue(12);
    let pr = ThreadRef::pull_request(40);

    let phase1 = clean_snapshot(BRANCH);
    for step in ["p1-1", "p1-2", "p1-3", "p1-4"] {
        let next = router.next(&phase1).expect("next");
        assert_eq!(next.exit_code(), exit_codes::OK, "{step}: {next:?}");
        assert!(next.response().text.contains(&format!("`{step}`")));

        let token = Step::from_id(step).and_then(|s| s.evidence_command());
        if let Some(token) = token {
            platform.add_comment(issue, "agent", &format!("Ran {token}: no findings."));
        }
        let done = router
            .complete_step(&phase1, step, false, None)
            .expect("complete");
        assert!(matches!(done, Outcome::Proceed(_)), "{step}: {done:?}");
    }
    assert_eq!(get_latest_state(&platform.comments(issue)).step, Step::P2MonitorWorkflow);

    let phase2 = snapshot(BRANCH, false, true, true, Some(40));
    let current = router.current_state(&phase2).expect("state");
    assert_eq!(current.thread, pr);
    assert!(current.entered_phase2);

    for step in ["p2-1", "p2-2", "p2-3", "p2-4", "p2-5"] {
        if let Some(token) = Step::from_id(step).and_then(|s| s.evidence_command()) {
            platform.add_comment(pr, "agent", &format!("```\n{token}\n```"));
        }
        router
            .complete_step(&phase2, step, false, Some("done"))
            .expect("complete");
    }

    let finished = router.next(&phase2).expect("next");
    assert!(matches!(finished, Outcome::Finished(_)), "{finished:?}");
    assert!(finished.response().text.contains("human approval"));

    let final_state = get_latest_state(&platform.comments(pr));
    assert_eq!(final_state.step, Step::Approval);
    assert_eq!(final_state.completed_steps, STEP_ORDER[..9].to_vec());
    assert_eq!(final_state.iteration, 0);
    assert!(final_state.invariant_violations().is_empty());

    let err = router
        .complete_step(&phase2, "approval", false, None)
        .expect_err("terminal step cannot advance");
    assert!(err.to_string().contains("terminal"));
}

#[test]
fn fix_loop_escalates_at_iteration_cap() {
    let platform = FakePlatform::new();
    let issue = ThreadRef::issue(12);
    let mut seeded = WorkflowState::initial().advance().expect("advance");
    seeded.max_iterations = Some(2);
    platform.add_state(issue, &seeded);
    platform.add_comment(issue, "agent", "/review-pr: 3 findings");
    let formatter = TemplateFormatter::new().expect("formatter");
    let router = router(&platform, &formatter, InvalidStepPolicy::Restart);
    let external = clean_snapshot(BRANCH);

    let first = router
        .complete_step(&external, "p1-2", true, None)
        .expect("fixes needed");
    assert!(matches!(first, Outcome::Proceed(_)));

    router
        .complete_step(&external, "p1-1", false, None)
        .expect("ci green");
    let second = router
        .complete_step(&external, "p1-2", true, None)
        .expect("fixes needed again");
    assert_eq!(second.exit_code(), exit_codes::ESCALATE);

    let next = router.next(&external).expect("next");
    assert!(matches!(next, Outcome::Escalated(_)));
    assert_eq!(get_latest_state(&platform.comments(issue)).iteration, 2);
}

#[test]
fn persistence_failure_leaves_thread_untouched_and_reports_recovery() {
    let platform = FakePlatform::new();
    platform.fail_posts(vec![
        TransportError::network("connection reset by peer"),
        TransportError::network("connection reset by peer"),
        TransportError::network("connection reset by peer"),
    ]);
    let formatter = TemplateFormatter::new().expect("formatter");
    let router = router(&platform, &formatter, InvalidStepPolicy::Restart);

    let outcome = router
        .complete_step(&clean_snapshot(BRANCH), "p1-1", false, None)
        .expect("complete");
    assert_eq!(outcome.exit_code(), exit_codes::PERSIST_FAILED);
    let text = &outcome.response().text;
    assert!(text.contains("Failure reason: network"));
    assert!(text.contains("Last error: connection reset by peer"));
    assert!(text.contains("Retry attempts made: 3"));
    assert!(text.contains(r#""step":"p1-2""#));
    assert_eq!(platform.post_count(), 3);
    assert!(platform.comments(ThreadRef::issue(12)).is_empty());

    // The recovery payload from the response can be re-posted verbatim.
    let recovery = r#"{"iteration":0,"step":"p1-2","completedSteps":["p1-1"],"phase":"phase1"}"#;
    let restored = router
        .persist_state(ThreadRef::issue(12), recovery)
        .expect("persist");
    assert!(matches!(restored, Outcome::Proceed(_)));
    assert_eq!(
        get_latest_state(&platform.comments(ThreadRef::issue(12))).step,
        Step::P1CodeReview
    );
}

#[test]
fn corrupt_newest_marker_is_skipped_or_halts_by_policy() {
    let platform = FakePlatform::new();
    let issue = ThreadRef::issue(12);
    platform.add_state(issue, &WorkflowState::initial().advance().expect("advance"));
    platform.add_comment(
        issue,
        "mallory",
        r#"<!-- review-loop-state:{"iteration":0,"step":"p1-3","__proto__":{"admin":true}} -->"#,
    );
    platform.add_comment(
        issue,
        "someone",
        r#"<!-- review-loop-state:{"iteration":4,"step":"p7-1","completedSteps":[],"phase":"phase1"} -->"#,
    );
    let formatter = TemplateFormatter::new().expect("formatter");
    let external = clean_snapshot(BRANCH);

    let restart = router(&platform, &formatter, InvalidStepPolicy::Restart);
    let current = restart.current_state(&external).expect("state");
    assert_eq!(current.state.step, Step::P1MonitorWorkflow);
    assert_eq!(current.state.iteration, 4);

    let halt = router(&platform, &formatter, InvalidStepPolicy::Halt);
    let err = halt.current_state(&external).expect_err("corrupt step halts");
    assert!(format!("{err:#}").contains("state comment 3 is corrupt"));

    // Once a valid state is appended on top, both policies agree again.
    platform.add_state(issue, &WorkflowState::initial().advance().expect("advance"));
    let current = halt.current_state(&external).expect("state");
    assert_eq!(current.state.step, Step::P1CodeReview);
    assert_eq!(current.snapshot.resolved.comment_id, Some(4));
}

#[test]
fn transient_read_failures_are_retried_transparently() {
    let platform = FakePlatform::new();
    platform.fail_fetches(vec![
        TransportError::rate_limit("secondary rate limit"),
        TransportError::network("timeout"),
    ]);
    let formatter = TemplateFormatter::new().expect("formatter");
    let outcome = router(&platform, &formatter, InvalidStepPolicy::Restart)
        .next(&clean_snapshot(BRANCH))
        .expect("next");
    assert!(matches!(outcome, Outcome::Proceed(_)));
    assert_eq!(platform.fetch_count(), 3);
}

#[test]
fn human_comments_do_not_disturb_state() {
    let platform = FakePlatform::new();
    let issue = ThreadRef::issue(12);
    let state = WorkflowState::initial().advance().expect("advance");
    platform.add_state(issue, &state);
    platform.add_comment(issue, "alice", "Looks good so far, keep going.");
    let formatter = TemplateFormatter::new().expect("formatter");

    let current = router(&platform, &formatter, InvalidStepPolicy::Restart)
        .current_state(&clean_snapshot(BRANCH))
        .expect("state");
    assert_eq!(current.state, state);
    assert_eq!(
        get_latest_state(&[comment(1, "alice", "no markers anywhere")]),
        WorkflowState::initial()
    );
}

//! Resolution of the thread that holds workflow state.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::step::Phase;
use crate::core::types::{ExternalSnapshot, ThreadRef};
use crate::error::WorkflowError;

static ISSUE_BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[^/]+/)?0*([1-9][0-9]*)-[A-Za-z0-9]").unwrap());

/// Extract the issue number from a `<number>-<slug>` branch name.
///
/// A single leading namespace segment (`feature/123-fix`) is tolerated.
pub fn parse_issue_number(branch: &str) -> Option<u64> {
    ISSUE_BRANCH_RE
        .captures(branch)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .filter(|n| *n > 0)
}

/// Positive target number for `phase`: the branch's issue in phase1, the open
/// pull request in phase2.
pub fn resolve_target(snapshot: &ExternalSnapshot, phase: Phase) -> Result<u64, WorkflowError> {
    resolve_thread(snapshot, phase).map(|thread| thread.number)
}

pub fn resolve_thread(
    snapshot: &ExternalSnapshot,
    phase: Phase,
) -> Result<ThreadRef, WorkflowError> {
    let branch = &snapshot.git.branch;
    match phase {
        Phase::Phase1 => {
            let number = snapshot
                .platform
                .issue_number
                .or_else(|| parse_issue_number(branch))
                .ok_or_else(|| {
                    WorkflowError::validation(format!(
                        "no issue number found in branch name '{branch}'. \
                         Expected branch format: <number>-<slug> (e.g. 123-add-login-form). \
                         Rename the branch with `git branch -m <number>-<slug>`."
                    ))
                })?;
            Ok(ThreadRef::issue(number))
        }
        Phase::Phase2 => {
            let pr = snapshot.platform.open_pull_request().ok_or_else(|| {
                WorkflowError::validation(format!(
                    "no open pull request found for branch '{branch}'. \
                     Phase2 requires an open PR; create one with `gh pr create` \
                     or finish phase1 first."
                ))
            })?;
            if pr.number == 0 {
                return Err(WorkflowError::validation(
                    "pull request number must be positive",
                ));
            }
            Ok(ThreadRef::pull_request(pr.number))
        }
    }
}

/// Phase implied by the platform: an open pull request means phase2.
pub fn detect_phase(snapshot: &ExternalSnapshot) -> Phase {
    if snapshot.platform.open_pull_request().is_some() {
        Phase::Phase2
    } else {
        Phase::Phase1
    }
}

//! Precondition guards evaluated before routing to a step.
//!
//! Guards run in the fixed order of [`GUARDS`]. Each appends its label to the
//! invocation's audit trail and either returns `None` (precondition holds, keep
//! going) or a [`GuardHalt`] that short-circuits routing.

use crate::core::types::ExternalSnapshot;

pub const UNCOMMITTED_CHECKED: &str = "Checked for uncommitted changes";
pub const UNCOMMITTED_CLEAN: &str = "Checked for uncommitted changes - none found";
pub const PUSHED_CHECKED: &str = "Checked branch push status";
pub const PUSHED_OK: &str = "Checked branch push status - up to date";

/// Short-circuit result of a violated precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardHalt {
    pub title: &'static str,
    /// Concrete remediation for the agent.
    pub instructions: String,
}

pub type Guard = fn(&ExternalSnapshot, &mut Vec<String>) -> Option<GuardHalt>;

/// Guard evaluation order.
pub const GUARDS: [Guard; 2] = [check_uncommitted_changes, check_branch_pushed];

/// Run every guard in order, stopping at the first violation.
pub fn run_guards(snapshot: &ExternalSnapshot, audit: &mut Vec<String>) -> Option<GuardHalt> {
    GUARDS.iter().find_map(|guard| guard(snapshot, audit))
}

pub fn check_uncommitted_changes(
    snapshot: &ExternalSnapshot,
    audit: &mut Vec<String>,
) -> Option<GuardHalt> {
    if !snapshot.git.has_uncommitted_changes {
        audit.push(UNCOMMITTED_CLEAN.to_string());
        return None;
    }
    audit.push(UNCOMMITTED_CHECKED.to_string());
    Some(GuardHalt {
        title: "Commit Changes",
        instructions: format!(
            "Uncommitted changes detected on branch '{}'.\n\n\
             1. Review the changes with `git status` and `git diff`.\n\
             2. Commit them with a descriptive message: `git add -A && git commit -m \"<message>\"`.\n\
             3. Run `review-loop next` again.",
            snapshot.git.branch
        ),
    })
}

pub fn check_branch_pushed(
    snapshot: &ExternalSnapshot,
    audit: &mut Vec<String>,
) -> Option<GuardHalt> {
    if snapshot.git.has_remote_tracking && snapshot.git.is_pushed {
        audit.push(PUSHED_OK.to_string());
        return None;
    }
    audit.push(PUSHED_CHECKED.to_string());
    let branch = &snapshot.git.branch;
    let instructions = if snapshot.git.has_remote_tracking {
        format!(
            "Branch '{branch}' has local commits that are not on the remote.\n\n\
             1. Push them: `git push`.\n\
             2. Run `review-loop next` again."
        )
    } else {
        format!(
            "Branch '{branch}' has no remote tracking branch.\n\n\
             1. Push it and set upstream: `git push -u origin {branch}`.\n\
             2. Run `review-loop next` again."
        )
    };
    Some(GuardHalt {
        title: "Push Branch",
        instructions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{GitFacts, PlatformFacts};

    fn snapshot(dirty: bool, tracking: bool, pushed: bool) -> ExternalSnapshot {
        ExternalSnapshot {
            git: GitFacts {
                branch: "12-thing".to_string(),
                has_uncommitted_changes: dirty,
                has_remote_tracking: tracking,
                is_pushed: pushed,
            },
            platform: PlatformFacts {
                issue_number: Some(12),
                pull_request: None,
            },
        }
    }

    #[test]
    fn clean_pushed_branch_passes_all_guards() {
        let mut audit = Vec::new();
        assert!(run_guards(&snapshot(false, true, true), &mut audit).is_none());
        assert_eq!(audit, vec![UNCOMMITTED_CLEAN, PUSHED_OK]);
    }

    #[test]
    fn dirty_tree_stops_before_push_check() {
        let mut audit = Vec::new();
        let halt = run_guards(&snapshot(true, false, false), &mut audit).expect("halt");
        assert_eq!(halt.title, "Commit Changes");
        assert!(halt.instructions.contains("git commit"));
        assert_eq!(audit, vec![UNCOMMITTED_CHECKED]);
    }

    #[test]
    fn missing_upstream_suggests_set_upstream() {
        let mut audit = Vec::new();
        let halt = run_guards(&snapshot(false, false, false), &mut audit).expect("halt");
        assert!(halt.instructions.contains("git push -u origin 12-thing"));
        assert_eq!(audit, vec![UNCOMMITTED_CLEAN, PUSHED_CHECKED]);
    }

    #[test]
    fn unpushed_commits_suggest_push() {
        let mut audit = Vec::new();
        let halt = check_branch_pushed(&snapshot(false, true, false), &mut audit).expect("halt");
        assert!(halt.instructions.contains("`git push`"));
    }
}

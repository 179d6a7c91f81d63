//! Shared deterministic types for review-loop core logic.
//!
//! These types describe facts gathered from git and the collaboration platform
//! at the start of an invocation. They are never cached across invocations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Facts about the local git repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitFacts {
    pub branch: String,
    /// Working tree has staged, unstaged, or untracked changes.
    pub has_uncommitted_changes: bool,
    /// Branch has an upstream tracking branch.
    pub has_remote_tracking: bool,
    /// Upstream contains every local commit.
    pub is_pushed: bool,
}

/// Pull request metadata for the current branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub is_open: bool,
    #[serde(default)]
    pub url: Option<String>,
}

/// Facts about the collaboration platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformFacts {
    /// Issue number parsed from the branch name, if the branch follows the convention.
    pub issue_number: Option<u64>,
    pub pull_request: Option<PullRequestInfo>,
}

impl PlatformFacts {
    pub fn open_pull_request(&self) -> Option<&PullRequestInfo> {
        self.pull_request.as_ref().filter(|pr| pr.is_open)
    }
}

/// Everything gathered fresh at the start of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalSnapshot {
    pub git: GitFacts,
    pub platform: PlatformFacts,
}

/// One comment of an append-only thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: String,
}

/// Kind of thread the workflow state lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Issue,
    PullRequest,
}

impl TargetKind {
    /// Human label used in responses: `issue #N` or `PR #N`.
    pub fn label(&self, number: u64) -> String {
        match self {
            Self::Issue => format!("issue #{number}"),
            Self::PullRequest => format!("PR #{number}"),
        }
    }
}

/// An issue or pull request thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadRef {
    pub kind: TargetKind,
    pub number: u64,
}

impl ThreadRef {
    pub fn issue(number: u64) -> Self {
        Self {
            kind: TargetKind::Issue,
            number,
        }
    }

    pub fn pull_request(number: u64) -> Self {
        Self {
            kind: TargetKind::PullRequest,
            number,
        }
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind.label(self.number))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn issue_and_pull_request_with_same_number_are_distinct_keys() {
        let keys: HashSet<(TargetKind, u64)> = [
            (TargetKind::Issue, 5),
            (TargetKind::PullRequest, 5),
            (TargetKind::Issue, 5),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn thread_labels() {
        assert_eq!(ThreadRef::issue(12).to_string(), "issue #12");
        assert_eq!(ThreadRef::pull_request(40).to_string(), "PR #40");
    }
}

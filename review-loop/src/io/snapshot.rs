//! Fresh external snapshot gathered at the start of every invocation.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::target::parse_issue_number;
use crate::core::types::{ExternalSnapshot, PlatformFacts};
use crate::error::GitError;
use crate::io::git::Git;
use crate::io::github::CommentPlatform;
use crate::io::retry::{RetryPolicy, retry_transport, retry_with_backoff};

/// Query git and the platform with bounded retries. Git is retried only when
/// it could not run to completion; platform calls only on transient failures.
#[instrument(skip_all)]
pub fn collect_snapshot<P: CommentPlatform + ?Sized>(
    git: &Git,
    platform: &P,
    policy: &RetryPolicy,
) -> Result<ExternalSnapshot> {
    let git_facts = retry_with_backoff(policy, "git facts", GitError::is_retryable, |_| {
        git.facts()
    })
    .result
    .context("collect git facts")?;

    let pull_request = retry_transport(policy, "pull request lookup", |_| {
        platform.pull_request_for_branch(&git_facts.branch)
    })
    .with_context(|| format!("look up pull request for '{}'", git_facts.branch))?;

    let snapshot = ExternalSnapshot {
        platform: PlatformFacts {
            issue_number: parse_issue_number(&git_facts.branch),
            pull_request,
        },
        git: git_facts,
    };
    debug!(
        branch = %snapshot.git.branch,
        dirty = snapshot.git.has_uncommitted_changes,
        pushed = snapshot.git.is_pushed,
        issue = ?snapshot.platform.issue_number,
        pr = ?snapshot.platform.pull_request.as_ref().map(|pr| pr.number),
        "collected external snapshot"
    );
    Ok(snapshot)
}

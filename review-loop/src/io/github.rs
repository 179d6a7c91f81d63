//! Collaboration platform abstraction.
//!
//! The [`CommentPlatform`] trait decouples the workflow from GitHub. The
//! production implementation shells out to the `gh` CLI; tests use the
//! scripted `FakePlatform` from `test_support`.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{CommentRecord, PullRequestInfo, TargetKind, ThreadRef};
use crate::error::{FailureReason, TransportError};
use crate::io::process::{Captured, ProcessLimits, run_bounded};

/// Operations the workflow needs from the platform hosting the thread.
pub trait CommentPlatform {
    /// All comments on the thread, oldest first.
    fn fetch_comments(&self, thread: ThreadRef) -> Result<Vec<CommentRecord>, TransportError>;

    /// Append a new comment. Existing comments are never edited or removed.
    fn post_comment(&self, thread: ThreadRef, body: &str) -> Result<(), TransportError>;

    /// Open pull request whose head is `branch`, if any.
    fn pull_request_for_branch(
        &self,
        branch: &str,
    ) -> Result<Option<PullRequestInfo>, TransportError>;
}

/// Platform backed by the GitHub CLI.
#[derive(Debug, Clone)]
pub struct GhCli {
    workdir: PathBuf,
    /// `owner/name`; `None` lets `gh` infer it from the git remote.
    repo: Option<String>,
    timeout: Duration,
}

impl GhCli {
    pub fn new(workdir: impl Into<PathBuf>, repo: Option<String>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            repo,
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("gh");
        cmd.current_dir(&self.workdir)
            .env("GH_PROMPT_DISABLED", "1")
            .env("GH_NO_UPDATE_NOTIFIER", "1")
            .env("NO_COLOR", "1");
        cmd
    }

    fn repo_path(&self) -> String {
        match &self.repo {
            Some(repo) => format!("repos/{repo}"),
            None => "repos/{owner}/{repo}".to_string(),
        }
    }

    fn run(&self, cmd: Command, stdin: Option<&[u8]>) -> Result<String, TransportError> {
        let output = run_bounded(cmd, stdin, ProcessLimits::with_timeout(self.timeout))
            .map_err(|err| TransportError::other(format!("{err:#}")))?;
        gh_stdout(&output, self.timeout)
    }
}

/// Stdout of a finished `gh` call, or the classified failure.
///
/// Truncated stdout is a failure: a partial comment list could hide the newest
/// state marker.
fn gh_stdout(output: &Captured, timeout: Duration) -> Result<String, TransportError> {
    if output.timed_out {
        return Err(TransportError::network(format!(
            "gh timed out after {}s",
            timeout.as_secs()
        )));
    }
    if !output.status.success() {
        let stderr = output.stderr_text();
        let reason = classify_failure(&stderr);
        warn!(%reason, exit_code = ?output.status.code(), "gh command failed");
        return Err(TransportError::new(reason, stderr));
    }
    if output.dropped_stdout > 0 {
        return Err(TransportError::other(format!(
            "gh output exceeded the capture limit by {} bytes; refusing a partial result",
            output.dropped_stdout
        )));
    }
    Ok(output.stdout_text())
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    number: u64,
    state: String,
    #[serde(default)]
    url: Option<String>,
}

impl CommentPlatform for GhCli {
    #[instrument(skip_all, fields(thread = %thread))]
    fn fetch_comments(&self, thread: ThreadRef) -> Result<Vec<CommentRecord>, TransportError> {
        let mut cmd = self.command();
        cmd.arg("api")
            .arg(format!(
                "{}/issues/{}/comments?per_page=100",
                self.repo_path(),
                thread.number
            ))
            .arg("--paginate")
            .arg("--jq")
            .arg(r#".[] | {id, author: (.user.login // "ghost"), body: (.body // ""), created_at}"#);
        let stdout = self.run(cmd, None)?;
        let comments = parse_comment_lines(&stdout)?;
        debug!(count = comments.len(), "fetched comments");
        Ok(comments)
    }

    #[instrument(skip_all, fields(thread = %thread, bytes = body.len()))]
    fn post_comment(&self, thread: ThreadRef, body: &str) -> Result<(), TransportError> {
        let mut cmd = self.command();
        let sub = match thread.kind {
            TargetKind::Issue => "issue",
            TargetKind::PullRequest => "pr",
        };
        cmd.arg(sub)
            .arg("comment")
            .arg(thread.number.to_string())
            .arg("--body-file")
            .arg("-");
        if let Some(repo) = &self.repo {
            cmd.arg("--repo").arg(repo);
        }
        self.run(cmd, Some(body.as_bytes()))?;
        info!("posted state comment");
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch))]
    fn pull_request_for_branch(
        &self,
        branch: &str,
    ) -> Result<Option<PullRequestInfo>, TransportError> {
        let mut cmd = self.command();
        cmd.args(["pr", "list", "--head", branch, "--state", "open"])
            .args(["--json", "number,state,url", "--limit", "1"]);
        if let Some(repo) = &self.repo {
            cmd.arg("--repo").arg(repo);
        }
        let stdout = self.run(cmd, None)?;
        let prs: Vec<GhPullRequest> = serde_json::from_str(stdout.trim())
            .map_err(|err| TransportError::other(format!("parse gh pr list output: {err}")))?;
        Ok(prs.into_iter().next().map(|pr| PullRequestInfo {
            number: pr.number,
            is_open: pr.state.eq_ignore_ascii_case("open"),
            url: pr.url,
        }))
    }
}

/// Parse the one-object-per-line output of the comments `--jq` filter.
fn parse_comment_lines(stdout: &str) -> Result<Vec<CommentRecord>, TransportError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<CommentRecord>(line)
                .map_err(|err| TransportError::other(format!("parse gh comment output: {err}")))
        })
        .collect()
}

/// Classify `gh` stderr into a failure reason.
pub fn classify_failure(stderr: &str) -> FailureReason {
    let lower = stderr.to_ascii_lowercase();
    const RATE_LIMIT: [&str; 5] = [
        "rate limit",
        "http 429",
        "too many requests",
        "secondary rate",
        "abuse detection",
    ];
    const NETWORK: [&str; 11] = [
        "could not resolve",
        "no such host",
        "connection refused",
        "connection reset",
        "network is unreachable",
        "i/o timeout",
        "timed out",
        "timeout",
        "tls handshake",
        "dial tcp",
        "unexpected eof",
    ];
    if RATE_LIMIT.iter().any(|needle| lower.contains(needle)) {
        FailureReason::RateLimit
    } else if NETWORK.iter().any(|needle| lower.contains(needle)) {
        FailureReason::Network
    } else {
        FailureReason::Other
    }
}

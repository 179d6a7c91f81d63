//! Read-only git queries.
//!
//! Everything the router needs comes from a single
//! `git status --porcelain=v2 --branch` call: the branch header lines carry the
//! branch name, upstream, and ahead count, and the entry lines carry the
//! worktree changes. The review loop never commits or pushes itself; it tells
//! the agent what to run instead.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument, warn};

use crate::core::types::GitFacts;
use crate::error::GitError;
use crate::io::process::{ProcessLimits, run_bounded};

const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// One changed path in the worktree or index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Porcelain v2 entry kind: `1` ordinary, `2` rename/copy, `u` unmerged, `?` untracked.
    pub kind: char,
    pub path: String,
}

/// Parsed output of `git status --porcelain=v2 --branch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// `None` on a detached HEAD.
    pub branch: Option<String>,
    pub upstream: Option<String>,
    /// Commits ahead of upstream. `None` without an upstream or when it is gone.
    pub ahead: Option<u64>,
    pub changes: Vec<Change>,
}

impl StatusReport {
    pub fn is_pushed(&self) -> bool {
        self.upstream.is_some() && self.ahead == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: DEFAULT_GIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    #[instrument(skip_all)]
    pub fn status(&self) -> Result<StatusReport> {
        let stdout = self.capture(&["status", "--porcelain=v2", "--branch", "-uall"])?;
        parse_status(&stdout)
    }

    /// Current branch. A detached HEAD is an error: the workflow is keyed on
    /// the branch name.
    pub fn current_branch(&self) -> Result<String> {
        branch_of(&self.status()?)
    }

    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(!self.status()?.changes.is_empty())
    }

    /// Collect every fact the router needs in one pass.
    pub fn facts(&self) -> Result<GitFacts> {
        let report = self.status()?;
        let branch = branch_of(&report)?;
        debug!(
            %branch,
            upstream = ?report.upstream,
            ahead = ?report.ahead,
            changes = report.changes.len(),
            "git facts"
        );
        Ok(GitFacts {
            branch,
            has_uncommitted_changes: !report.changes.is_empty(),
            has_remote_tracking: report.upstream.is_some(),
            is_pushed: report.is_pushed(),
        })
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_OPTIONAL_LOCKS", "0");
        let command = args.join(" ");
        let output = run_bounded(cmd, None, ProcessLimits::with_timeout(self.timeout)).map_err(
            |err| GitError::Unavailable {
                command: command.clone(),
                detail: format!("{err:#}"),
            },
        )?;
        if output.timed_out {
            return Err(GitError::TimedOut {
                command,
                secs: self.timeout.as_secs(),
            }
            .into());
        }
        if !output.success() {
            bail!("git {command} failed: {}", output.stderr_text());
        }
        Ok(output.stdout_text())
    }
}

fn branch_of(report: &StatusReport) -> Result<String> {
    report.branch.clone().ok_or_else(|| {
        warn!("detached HEAD detected");
        anyhow!("detached HEAD: check out the issue branch (<number>-<slug>) first")
    })
}

fn parse_status(stdout: &str) -> Result<StatusReport> {
    let mut report = StatusReport::default();
    for line in stdout.lines().filter(|line| !line.is_empty()) {
        if let Some(header) = line.strip_prefix("# ") {
            parse_header(header, &mut report)?;
            continue;
        }
        report.changes.push(parse_change(line)?);
    }
    Ok(report)
}

fn parse_header(header: &str, report: &mut StatusReport) -> Result<()> {
    let (key, value) = header.split_once(' ').unwrap_or((header, ""));
    match key {
        "branch.head" if value != "(detached)" => report.branch = Some(value.to_string()),
        "branch.upstream" => report.upstream = Some(value.to_string()),
        "branch.ab" => {
            let ahead = value
                .split_whitespace()
                .next()
                .and_then(|field| field.strip_prefix('+'))
                .ok_or_else(|| anyhow!("unexpected branch.ab header: '{value}'"))?;
            report.ahead = Some(
                ahead
                    .parse()
                    .with_context(|| format!("parse ahead count '{ahead}'"))?,
            );
        }
        _ => {}
    }
    Ok(())
}

fn parse_change(line: &str) -> Result<Change> {
    let kind = line
        .chars()
        .next()
        .ok_or_else(|| anyhow!("empty status line"))?;
    // Fields before the path: ordinary 8, rename 9, unmerged 10, untracked 1.
    let fields_before_path = match kind {
        '1' => 8,
        '2' => 9,
        'u' => 10,
        '?' | '!' => 1,
        other => bail!("unknown porcelain v2 entry '{other}' in '{line}'"),
    };
    let rest = line
        .splitn(fields_before_path + 1, ' ')
        .nth(fields_before_path)
        .ok_or_else(|| anyhow!("truncated status line: '{line}'"))?;
    // Renames carry "<path>\t<origPath>".
    let path = rest.split('\t').next().unwrap_or(rest);
    Ok(Change {
        kind,
        path: path.to_string(),
    })
}

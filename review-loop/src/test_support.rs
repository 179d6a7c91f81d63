//! Test-only helpers: an in-memory comment platform, snapshot builders, and a
//! throwaway git repository.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::codec::encode;
use crate::core::state::WorkflowState;
use crate::core::types::{
    CommentRecord, ExternalSnapshot, GitFacts, PlatformFacts, PullRequestInfo, TargetKind,
    ThreadRef,
};
use crate::error::TransportError;
use crate::io::github::CommentPlatform;

/// Scripted in-memory stand-in for the `gh` CLI.
///
/// Threads are keyed by kind and number, so issue #5 and PR #5 are distinct.
/// Queued failures are consumed one per call before normal behaviour resumes.
#[derive(Default)]
pub struct FakePlatform {
    threads: RefCell<HashMap<(TargetKind, u64), Vec<CommentRecord>>>,
    next_id: Cell<u64>,
    fetch_failures: RefCell<VecDeque<TransportError>>,
    post_failures: RefCell<VecDeque<TransportError>>,
    fetch_count: Cell<u32>,
    post_count: Cell<u32>,
    fetch_delay: Cell<Duration>,
    pull_request: RefCell<Option<PullRequestInfo>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a comment as if a human (or another tool) had posted it.
    pub fn add_comment(&self, thread: ThreadRef, author: &str, body: &str) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.threads
            .borrow_mut()
            .entry((thread.kind, thread.number))
            .or_default()
            .push(comment(id, author, body));
        id
    }

    /// Append an encoded state marker comment.
    pub fn add_state(&self, thread: ThreadRef, state: &WorkflowState) -> u64 {
        let body = encode(state, "Seeded state", "").expect("encode state");
        self.add_comment(thread, "review-loop", &body)
    }

    pub fn comments(&self, thread: ThreadRef) -> Vec<CommentRecord> {
        self.threads
            .borrow()
            .get(&(thread.kind, thread.number))
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_fetches(&self, errors: Vec<TransportError>) {
        self.fetch_failures.borrow_mut().extend(errors);
    }

    pub fn fail_posts(&self, errors: Vec<TransportError>) {
        self.post_failures.borrow_mut().extend(errors);
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.get()
    }

    pub fn post_count(&self) -> u32 {
        self.post_count.get()
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay.set(delay);
    }

    pub fn set_pull_request(&self, pr: Option<PullRequestInfo>) {
        *self.pull_request.borrow_mut() = pr;
    }
}

impl CommentPlatform for FakePlatform {
    fn fetch_comments(&self, thread: ThreadRef) -> Result<Vec<CommentRecord>, TransportError> {
        self.fetch_count.set(self.fetch_count.get() + 1);
        let delay = self.fetch_delay.get();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(err) = self.fetch_failures.borrow_mut().pop_front() {
            return Err(err);
        }
        Ok(self.comments(thread))
    }

    fn post_comment(&self, thread: ThreadRef, body: &str) -> Result<(), TransportError> {
        self.post_count.set(self.post_count.get() + 1);
        if let Some(err) = self.post_failures.borrow_mut().pop_front() {
            return Err(err);
        }
        self.add_comment(thread, "review-loop", body);
        Ok(())
    }

    fn pull_request_for_branch(
        &self,
        _branch: &str,
    ) -> Result<Option<PullRequestInfo>, TransportError> {
        Ok(self.pull_request.borrow().clone())
    }
}

/// Build a comment with a deterministic timestamp derived from `id`.
pub fn comment(id: u64, author: &str, body: &str) -> CommentRecord {
    CommentRecord {
        id,
        author: author.to_string(),
        body: body.to_string(),
        created_at: format!("2024-01-01T00:{:02}:{:02}Z", (id / 60) % 60, id % 60),
    }
}

/// Build a comment carrying an encoded marker for `state`.
pub fn state_comment(id: u64, state: &WorkflowState) -> CommentRecord {
    comment(
        id,
        "review-loop",
        &encode(state, "Seeded state", "").expect("encode state"),
    )
}

/// Clean, pushed branch with no pull request.
pub fn clean_snapshot(branch: &str) -> ExternalSnapshot {
    snapshot(branch, false, true, true, None)
}

pub fn snapshot(
    branch: &str,
    dirty: bool,
    tracking: bool,
    pushed: bool,
    pr: Option<u64>,
) -> ExternalSnapshot {
    ExternalSnapshot {
        git: GitFacts {
            branch: branch.to_string(),
            has_uncommitted_changes: dirty,
            has_remote_tracking: tracking,
            is_pushed: pushed,
        },
        platform: PlatformFacts {
            issue_number: crate::core::target::parse_issue_number(branch),
            pull_request: pr.map(open_pull_request),
        },
    }
}

pub fn open_pull_request(number: u64) -> PullRequestInfo {
    PullRequestInfo {
        number,
        is_open: true,
        url: Some(format!("https://github.com/acme/widgets/pull/{number}")),
    }
}

/// Temporary git repository with one commit on `branch`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new(branch: &str) -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q"])?;
        repo.git(&["config", "user.email", "tests@example.com"])?;
        repo.git(&["config", "user.name", "Review Loop Tests"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("README.md", "# fixture\n")?;
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "-q", "-m", "initial"])?;
        repo.git(&["checkout", "-q", "-b", branch])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<()> {
        std::fs::write(self.path().join(name), contents).with_context(|| format!("write {name}"))
    }

    pub fn git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

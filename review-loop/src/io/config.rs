//! Review-loop configuration stored in `.review-loop.toml` at the repo root.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::codec::InvalidStepPolicy;
use crate::io::retry::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = ".review-loop.toml";

/// Review-loop configuration (TOML).
///
/// Missing fields take their defaults, so an absent file and an empty file
/// behave the same.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// `owner/name` of the repository hosting the threads. Inferred by `gh` when unset.
    pub repo: Option<String>,

    /// Attempts for appending a state comment before reporting failure.
    pub persist_attempts: u32,

    /// Attempts for comment fetches, pull request lookups, and git queries.
    pub read_attempts: u32,

    /// First backoff delay in milliseconds; doubles per attempt.
    pub retry_base_delay_ms: u64,

    /// Timeout for a single `gh` invocation.
    pub command_timeout_secs: u64,

    /// A state read slower than this is re-read before being trusted.
    pub stale_read_threshold_ms: u64,

    pub invalid_step_policy: InvalidStepPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            repo: None,
            persist_attempts: 3,
            read_attempts: 3,
            retry_base_delay_ms: 1000,
            command_timeout_secs: 60,
            stale_read_threshold_ms: 5000,
            invalid_step_policy: InvalidStepPolicy::Restart,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.persist_attempts == 0 {
            return Err(anyhow!("persist_attempts must be > 0"));
        }
        if self.read_attempts == 0 {
            return Err(anyhow!("read_attempts must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if let Some(repo) = &self.repo {
            let valid = repo
                .split_once('/')
                .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
            if !valid {
                return Err(anyhow!("repo must look like 'owner/name', got '{repo}'"));
            }
        }
        Ok(())
    }

    pub fn persist_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.persist_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn read_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.read_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn stale_read_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_read_threshold_ms)
    }
}

/// Read `.review-loop.toml`; a missing file means all defaults.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    let cfg = match fs::read_to_string(path) {
        Ok(contents) => toml::from_str::<LoopConfig>(&contents)
            .with_context(|| format!("parse {}", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => LoopConfig::default(),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Validate and write `cfg`, replacing any existing file in one rename.
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let rendered = format!(
        "{}\n",
        toml::to_string_pretty(cfg).context("render config as toml")?.trim_end()
    );
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let staging = path.with_extension("toml.partial");
    fs::write(&staging, rendered).with_context(|| format!("write {}", staging.display()))?;
    fs::rename(&staging, path)
        .with_context(|| format!("move {} into place", staging.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, LoopConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        let cfg = LoopConfig {
            repo: Some("acme/widgets".to_string()),
            invalid_step_policy: InvalidStepPolicy::Halt,
            ..LoopConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "persist_attempts = 5\ninvalid_step_policy = \"halt\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.persist_attempts, 5);
        assert_eq!(cfg.invalid_step_policy, InvalidStepPolicy::Halt);
        assert_eq!(cfg.read_attempts, 3);
    }

    #[test]
    fn rejects_invalid_values() {
        let cfg = LoopConfig {
            persist_attempts: 0,
            ..LoopConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = LoopConfig {
            repo: Some("no-slash".to_string()),
            ..LoopConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}

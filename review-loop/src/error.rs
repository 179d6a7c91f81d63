//! Typed error taxonomy for the review loop.
//!
//! - `WorkflowError`: caller misuse, hostile payloads, and malformed markers.
//! - `TransportError`: failures talking to the collaboration platform, already
//!   classified into a `FailureReason` so callers can decide whether to retry.
//! - `GitError`: `git` could not be run to completion; worth another attempt.
//! - `FormatError`: recognised failures of the response formatter.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while decoding, validating, or transitioning workflow state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// Programmer or caller misuse. Never recovered locally.
    #[error("validation error: {0}")]
    Validation(String),

    /// A payload carried a key from the dangerous set.
    #[error("security error: {0}")]
    Security(String),

    /// Malformed marker or JSON.
    #[error("parse error: {0}")]
    Parse(String),
}

impl WorkflowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

/// Classification of a failed platform call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RateLimit,
    Network,
    Other,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::Other => "other",
        }
    }

    /// Only transient classes are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Network)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to the collaboration platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} error: {message}")]
pub struct TransportError {
    pub reason: FailureReason,
    pub message: String,
}

impl TransportError {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(FailureReason::RateLimit, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureReason::Network, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureReason::Other, message)
    }
}

/// `git` did not run to completion. A git command that ran and failed is not a
/// `GitError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GitError {
    #[error("git {command} timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },

    #[error("could not run git {command}: {detail}")]
    Unavailable { command: String, detail: String },
}

impl GitError {
    /// True if `err` (or anything it wraps) is a `GitError`.
    pub fn is_retryable(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.downcast_ref::<GitError>().is_some())
    }
}

/// Recognised failures of the response formatter.
///
/// Anything the formatter reports that is not a `FormatError` is a defect and
/// must propagate.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid response content: {0}")]
    InvalidContent(String),

    #[error("template render failed: {0}")]
    Render(#[from] minijinja::Error),
}

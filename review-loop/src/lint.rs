//! Strict audit of every state marker on a thread.
//!
//! The read path is lenient: it defaults bad fields and skips bad markers.
//! `lint` shows what that leniency is hiding, so corruption gets noticed.

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde::Serialize;
use serde_json::Value;

use crate::core::codec::{InvalidStepPolicy, extract_marker, safe_parse, validate_with_policy};
use crate::core::types::CommentRecord;

const WORKFLOW_STATE_SCHEMA: &str =
    include_str!("../../schemas/workflow_state/v1.schema.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "problems", rename_all = "snake_case")]
pub enum Finding {
    Valid,
    /// Parsed and safe, but not a well-formed state.
    Invalid(Vec<String>),
    /// Refused before validation: malformed JSON or a dangerous key.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkerLint {
    pub comment_id: u64,
    pub author: String,
    pub created_at: String,
    pub finding: Finding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintReport {
    pub markers: Vec<MarkerLint>,
}

impl LintReport {
    pub fn is_clean(&self) -> bool {
        self.markers
            .iter()
            .all(|marker| marker.finding == Finding::Valid)
    }

    /// Plain-text summary, one line per marker.
    pub fn summary(&self) -> String {
        if self.markers.is_empty() {
            return "No state markers found.".to_string();
        }
        let mut lines = Vec::with_capacity(self.markers.len());
        for marker in &self.markers {
            let status = match &marker.finding {
                Finding::Valid => "ok".to_string(),
                Finding::Invalid(problems) => format!("invalid: {}", problems.join("; ")),
                Finding::Rejected(reason) => format!("rejected: {reason}"),
            };
            lines.push(format!(
                "comment {} by {} at {}: {status}",
                marker.comment_id, marker.author, marker.created_at
            ));
        }
        lines.join("\n")
    }
}

pub struct StateLinter {
    schema: Validator,
}

impl StateLinter {
    pub fn new() -> Result<Self> {
        let schema_value: Value =
            serde_json::from_str(WORKFLOW_STATE_SCHEMA).context("parse workflow state schema")?;
        let schema = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema_value)
            .context("compile workflow state schema")?;
        Ok(Self { schema })
    }

    /// Lint every marker in `comments`, oldest first.
    pub fn lint(&self, comments: &[CommentRecord]) -> LintReport {
        let markers = comments
            .iter()
            .filter_map(|comment| {
                extract_marker(&comment.body).map(|payload| MarkerLint {
                    comment_id: comment.id,
                    author: comment.author.clone(),
                    created_at: comment.created_at.clone(),
                    finding: self.check(payload),
                })
            })
            .collect();
        LintReport { markers }
    }

    fn check(&self, payload: &str) -> Finding {
        let value = match safe_parse(payload) {
            Ok(value) => value,
            Err(err) => return Finding::Rejected(err.to_string()),
        };

        let mut problems: Vec<String> = self
            .schema
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if problems.is_empty() {
            // Schema-valid payloads must also survive decoding unchanged.
            match validate_with_policy(&value, InvalidStepPolicy::Halt) {
                Ok(state) => match serde_json::to_value(&state) {
                    Ok(canonical) if canonical != value => problems.push(
                        "payload changes when decoded; completedSteps must be unique and \
                         precede step"
                            .to_string(),
                    ),
                    Ok(_) => {}
                    Err(err) => problems.push(format!("re-encode failed: {err}")),
                },
                Err(err) => problems.push(err.to_string()),
            }
        }

        if problems.is_empty() {
            Finding::Valid
        } else {
            Finding::Invalid(problems)
        }
    }
}

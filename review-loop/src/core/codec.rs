//! Comment-embedded state encoding and hardened decoding.
//!
//! A state comment looks like:
//!
//! ```text
//! <!-- review-loop-state:{"iteration":0,"step":"p1-1","completedSteps":[],"phase":"phase1"} -->
//! ## Review Loop: <title>
//!
//! <body>
//!
//! ---
//! _<footer>_
//! ```
//!
//! Decoding treats the payload as untrusted: [`safe_parse`] rejects dangerous
//! keys anywhere in the tree, and [`validate`] maps the open JSON value onto the
//! closed `WorkflowState` field set with per-field defaults.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::core::state::WorkflowState;
use crate::core::step::{Phase, Step};
use crate::error::WorkflowError;

pub const MARKER_NAME: &str = "review-loop-state";
pub const TITLE_PREFIX: &str = "## Review Loop: ";
pub const FOOTER: &str =
    "---\n_Recorded by review-loop. The hidden marker above holds workflow state; do not edit it._";

/// Keys rejected at any nesting level of an untrusted payload.
pub const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];
/// Nesting depth scanned by [`safe_parse`]. Deeper levels are not inspected.
pub const DEFAULT_SCAN_DEPTH: usize = 10;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?s)<!--\s*{MARKER_NAME}:\s*(.*?)\s*-->")).unwrap()
});

/// What to do when a persisted `step` is not a recognised step id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidStepPolicy {
    /// Log at error severity and restart from the first phase1 step.
    #[default]
    Restart,
    /// Refuse the payload with a validation error.
    Halt,
}

/// Render a state comment body.
pub fn encode(state: &WorkflowState, title: &str, body: &str) -> serde_json::Result<String> {
    let payload = serde_json::to_string(state)?;
    let mut out = format!("<!-- {MARKER_NAME}:{payload} -->\n{TITLE_PREFIX}{title}\n");
    let body = body.trim();
    if !body.is_empty() {
        out.push('\n');
        out.push_str(body);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(FOOTER);
    out.push('\n');
    Ok(out)
}

/// Locate the marker payload in a comment body, if any.
pub fn extract_marker(body: &str) -> Option<&str> {
    MARKER_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parse untrusted JSON and reject payloads carrying a dangerous key.
pub fn safe_parse(text: &str) -> Result<Value, WorkflowError> {
    safe_parse_with_depth(text, DEFAULT_SCAN_DEPTH)
}

pub fn safe_parse_with_depth(text: &str, max_depth: usize) -> Result<Value, WorkflowError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| WorkflowError::Parse(err.to_string()))?;
    if let Some(path) = find_dangerous_key(&value, max_depth) {
        return Err(WorkflowError::Security(format!(
            "dangerous key in state payload at {path}"
        )));
    }
    Ok(value)
}

/// Return the path of the first dangerous key within `max_depth` levels.
///
/// Root object keys sit at depth 0. Levels beyond `max_depth` are treated as
/// clean: the bound caps scanning cost, it is not a safety guarantee.
pub fn find_dangerous_key(value: &Value, max_depth: usize) -> Option<String> {
    visit(value, 0, max_depth, "$")
}

fn visit(value: &Value, depth: usize, max_depth: usize, path: &str) -> Option<String> {
    if depth > max_depth {
        return None;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = format!("{path}.{key}");
                if DANGEROUS_KEYS.contains(&key.as_str()) {
                    return Some(child_path);
                }
                if let Some(found) = visit(child, depth + 1, max_depth, &child_path) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(idx, child)| visit(child, depth + 1, max_depth, &format!("{path}[{idx}]"))),
        _ => None,
    }
}

/// Map a parsed payload onto a `WorkflowState` using the restart policy.
pub fn validate(value: &Value) -> Result<WorkflowState, WorkflowError> {
    validate_with_policy(value, InvalidStepPolicy::Restart)
}

pub fn validate_with_policy(
    value: &Value,
    policy: InvalidStepPolicy,
) -> Result<WorkflowState, WorkflowError> {
    let obj = value
        .as_object()
        .ok_or_else(|| WorkflowError::validation("state payload must be a JSON object"))?;

    let iteration = match obj.get("iteration") {
        Some(raw) => as_non_negative_u32(raw).unwrap_or_else(|| {
            warn!(value = %raw, "invalid iteration in state payload, using 0");
            0
        }),
        None => 0,
    };

    let (step, restarted) = resolve_step(obj, policy)?;
    let completed_steps = resolve_completed(obj, step);
    let phase = if restarted {
        Phase::Phase1
    } else {
        resolve_phase(obj)
    };
    if phase != step.phase() {
        warn!(%phase, %step, "state phase disagrees with step namespace");
    }

    let max_iterations = match obj.get("maxIterations") {
        None | Some(Value::Null) => None,
        Some(raw) => match as_non_negative_u32(raw) {
            Some(n) if n > 0 => Some(n),
            _ => {
                warn!(value = %raw, "maxIterations must be a positive integer, ignoring");
                None
            }
        },
    };

    Ok(WorkflowState {
        iteration,
        step,
        completed_steps,
        phase,
        max_iterations,
    })
}

/// The persisted step, or the restart step with `true` when the workflow restarts.
fn resolve_step(
    obj: &Map<String, Value>,
    policy: InvalidStepPolicy,
) -> Result<(Step, bool), WorkflowError> {
    let raw = obj.get("step");
    if let Some(step) = raw.and_then(Value::as_str).and_then(Step::from_id) {
        return Ok((step, false));
    }
    let shown = raw.map_or_else(|| "<missing>".to_string(), Value::to_string);
    match policy {
        InvalidStepPolicy::Restart => {
            error!(
                step = %shown,
                fallback = %Phase::Phase1.first_step(),
                "invalid step in persisted state, possible corruption; restarting workflow"
            );
            Ok((Phase::Phase1.first_step(), true))
        }
        InvalidStepPolicy::Halt => {
            error!(step = %shown, "invalid step in persisted state, refusing to continue");
            Err(WorkflowError::validation(format!(
                "persisted state has invalid step {shown}"
            )))
        }
    }
}

fn resolve_completed(obj: &Map<String, Value>, step: Step) -> Vec<Step> {
    let Some(items) = obj.get("completedSteps").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut completed: Vec<Step> = Vec::new();
    for candidate in items
        .iter()
        .filter_map(Value::as_str)
        .filter_map(Step::from_id)
    {
        if completed.contains(&candidate) {
            warn!(step = %candidate, "duplicate completed step dropped");
            continue;
        }
        if !candidate.precedes(step) {
            warn!(completed = %candidate, current = %step, "completed step not before current step dropped");
            continue;
        }
        completed.push(candidate);
    }
    completed
}

fn resolve_phase(obj: &Map<String, Value>) -> Phase {
    match obj.get("phase") {
        None => Phase::Phase1,
        Some(raw) => match raw.as_str().and_then(Phase::from_id) {
            Some(phase) => phase,
            None => {
                warn!(value = %raw, "invalid phase in state payload, using phase1");
                Phase::Phase1
            }
        },
    }
}

fn as_non_negative_u32(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) {
        return Some(f as u32);
    }
    None
}

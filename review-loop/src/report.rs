//! Turns a terminal persistence failure into a log entry and a recovery
//! response.

use anyhow::{Result, bail};
use tracing::error;

use crate::core::state::WorkflowState;
use crate::core::step::Step;
use crate::core::types::TargetKind;
use crate::error::{FormatError, WorkflowError};
use crate::io::persist::{PersistFailure, PersistOutcome};
use crate::response::{Response, ResponseContent, ResponseFormatter};

const IMPACT: &str = "workflow progress for this step was not recorded; \
                      the next invocation will resume from the last persisted state";
const OPERATOR_ACTION: &str =
    "check GitHub rate limit and connectivity, then re-post the recovery state";

/// Build the error response for a failed persist.
///
/// Misuse is a hard failure: calling this with a successful outcome or a
/// non-positive target number returns a [`WorkflowError::Validation`].
/// A formatter that fails with a [`FormatError`] is replaced by a plain-text
/// fallback; any other formatter error is returned unchanged.
pub fn handle_failure<F: ResponseFormatter + ?Sized>(
    outcome: &PersistOutcome,
    state: &WorkflowState,
    step: Step,
    target_kind: TargetKind,
    target_number: i64,
    formatter: &F,
) -> Result<Response> {
    let failure = match outcome {
        PersistOutcome::Failed(failure) => failure,
        PersistOutcome::Persisted { .. } => {
            bail!(WorkflowError::validation(
                "handle_failure called with a successful persist outcome"
            ))
        }
    };
    let number = u64::try_from(target_number)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            WorkflowError::validation(format!(
                "target number must be a positive integer, got {target_number}"
            ))
        })?;

    let phase = step.phase();
    let target = target_kind.label(number);
    error!(
        target = %target,
        step = %step,
        iteration = state.iteration,
        phase = %phase,
        reason = %failure.reason,
        error = failure.last_error.as_deref().unwrap_or("none"),
        attempts = failure.attempt_count,
        impact = IMPACT,
        action = OPERATOR_ACTION,
        "failed to persist workflow state"
    );

    let recovery_state = serde_json::to_string(state)?;
    let content = ResponseContent::new(
        "State Persistence Failed",
        step.id(),
        state.iteration,
        instructions(failure, step, target_kind, number, &recovery_state),
    )
    .with_context("Target", target)
    .with_context("Phase", phase.as_str());

    match formatter.format(&content) {
        Ok(text) => Ok(Response::error(text)),
        Err(err) => match err.downcast_ref::<FormatError>() {
            Some(format_err) => {
                error!(error = %format_err, "response formatter failed, using fallback text");
                Ok(Response::error(fallback_text(
                    failure,
                    step,
                    target_kind,
                    number,
                    &recovery_state,
                )))
            }
            None => Err(err),
        },
    }
}

fn failure_lines(failure: &PersistFailure) -> String {
    let mut lines = format!("Failure reason: {}", failure.reason);
    if let Some(last_error) = &failure.last_error {
        lines.push_str(&format!("\nLast error: {last_error}"));
    }
    if failure.attempt_count > 0 {
        lines.push_str(&format!("\nRetry attempts made: {}", failure.attempt_count));
    }
    lines
}

fn instructions(
    failure: &PersistFailure,
    step: Step,
    kind: TargetKind,
    number: u64,
    recovery_state: &str,
) -> String {
    let target = kind.label(number);
    let cli_kind = cli_thread_kind(kind);
    let view = format!("gh {cli_kind} view {number}");
    format!(
        "Workflow state for step `{step}` could not be saved to {target}. \
         Progress from this step is not recorded yet.\n\n\
         {failure}\n\n\
         Recovery actions:\n\
         1. Check the GitHub API rate limit: `gh api rate_limit`.\n\
         2. Check network connectivity and authentication: `gh auth status`.\n\
         3. Confirm {target} still exists and is open: `{view}`.\n\
         4. Re-post the recovery state once the cause is fixed: \
         `review-loop persist --thread {cli_kind} --number {number} --state '<recovery state>'`.\n\n\
         Recovery state:\n\n```json\n{recovery_state}\n```",
        failure = failure_lines(failure),
    )
}

fn fallback_text(
    failure: &PersistFailure,
    step: Step,
    kind: TargetKind,
    number: u64,
    recovery_state: &str,
) -> String {
    let target = kind.label(number);
    format!(
        "State persistence failed for {target} at step {step}.\n{}\n\
         Check `gh api rate_limit` and connectivity, confirm {target} exists, \
         then run `review-loop persist --thread {} --number {number} --state '{recovery_state}'`.",
        failure_lines(failure),
        cli_thread_kind(kind)
    )
}

/// Thread kind as spelled by both `gh` and `review-loop --thread`.
fn cli_thread_kind(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Issue => "issue",
        TargetKind::PullRequest => "pr",
    }
}

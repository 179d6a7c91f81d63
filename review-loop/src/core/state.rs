//! Workflow state value and its transitions.
//!
//! `WorkflowState` is immutable in practice: every transition returns a new
//! value. There is no `Deserialize` impl: payloads are decoded by
//! `core::codec::validate`, which drops unknown keys.

use serde::Serialize;

use crate::core::step::{Phase, STEP_ORDER, Step, next_step};
use crate::error::WorkflowError;

/// Iteration cap used when the state carries no override.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    /// Workflow-loop repetitions so far.
    pub iteration: u32,
    pub step: Step,
    /// Steps already passed, in order. Every member strictly precedes `step`.
    pub completed_steps: Vec<Step>,
    pub phase: Phase,
    /// Positive override for the iteration cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::initial()
    }
}

impl WorkflowState {
    /// Fresh state synthesized when no valid marker exists.
    pub fn initial() -> Self {
        Self {
            iteration: 0,
            step: Phase::Phase1.first_step(),
            completed_steps: Vec::new(),
            phase: Phase::Phase1,
            max_iterations: None,
        }
    }

    /// Move to the successor step, recording the current one as completed.
    ///
    /// `iteration` is untouched; loop milestones go through [`Self::restart_iteration`].
    pub fn advance(&self) -> Result<Self, WorkflowError> {
        let next = next_step(self.step).ok_or_else(|| {
            WorkflowError::validation(format!(
                "cannot advance past terminal step '{}'",
                self.step
            ))
        })?;
        let mut completed = self.completed_steps.clone();
        if !completed.contains(&self.step) {
            completed.push(self.step);
        }
        Ok(Self {
            iteration: self.iteration,
            step: next,
            completed_steps: completed,
            phase: next.phase(),
            max_iterations: self.max_iterations,
        })
    }

    /// Record a loop milestone: bump the iteration and restart the current phase.
    pub fn restart_iteration(&self) -> Self {
        let phase = self.step.phase();
        let first = phase.first_step();
        Self {
            iteration: self.iteration.saturating_add(1),
            step: first,
            completed_steps: steps_before(first),
            phase,
            max_iterations: self.max_iterations,
        }
    }

    /// Carry a phase1 state into phase2 once a pull request exists.
    pub fn enter_phase2(&self) -> Self {
        let first = Phase::Phase2.first_step();
        Self {
            iteration: self.iteration,
            step: first,
            completed_steps: steps_before(first),
            phase: Phase::Phase2,
            max_iterations: self.max_iterations,
        }
    }

    pub fn effective_max_iterations(&self) -> u32 {
        self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS)
    }

    pub fn is_iteration_limit_reached(&self) -> bool {
        self.iteration >= self.effective_max_iterations()
    }

    /// Check the ordering invariant on `completed_steps` and that `phase`
    /// matches the step namespace.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.phase != self.step.phase() {
            errors.push(format!(
                "phase '{}' does not match step '{}' (expected '{}')",
                self.phase,
                self.step,
                self.step.phase()
            ));
        }
        for (idx, done) in self.completed_steps.iter().enumerate() {
            if self.completed_steps[..idx].contains(done) {
                errors.push(format!("duplicate completed step '{done}'"));
            }
            if !done.precedes(self.step) {
                errors.push(format!(
                    "completed step '{done}' does not precede current step '{}'",
                    self.step
                ));
            }
        }
        if let Some(max) = self.max_iterations
            && max == 0
        {
            errors.push("max_iterations must be positive".to_string());
        }
        errors
    }
}

fn steps_before(step: Step) -> Vec<Step> {
    STEP_ORDER[..step.ordinal()].to_vec()
}

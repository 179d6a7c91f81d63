//! Canonical step ordering and phase model.
//!
//! `STEP_ORDER` is a total order: a phase1 prefix, a phase2 range, and a single
//! terminal step with no successor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Pre-pull-request (`phase1`) or post-pull-request (`phase2`) half of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Phase1,
    Phase2,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phase1 => "phase1",
            Self::Phase2 => "phase2",
        }
    }

    /// Parse an exact phase identifier. No trimming or case folding.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "phase1" => Some(Self::Phase1),
            "phase2" => Some(Self::Phase2),
            _ => None,
        }
    }

    /// First step of this phase's range.
    pub fn first_step(&self) -> Step {
        match self {
            Self::Phase1 => Step::P1MonitorWorkflow,
            Self::Phase2 => Step::P2MonitorWorkflow,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point in the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    #[serde(rename = "p1-1")]
    P1MonitorWorkflow,
    #[serde(rename = "p1-2")]
    P1CodeReview,
    #[serde(rename = "p1-3")]
    P1SecurityReview,
    #[serde(rename = "p1-4")]
    P1CreatePr,
    #[serde(rename = "p2-1")]
    P2MonitorWorkflow,
    #[serde(rename = "p2-2")]
    P2MonitorChecks,
    #[serde(rename = "p2-3")]
    P2CodeQuality,
    #[serde(rename = "p2-4")]
    P2CodeReview,
    #[serde(rename = "p2-5")]
    P2SecurityReview,
    #[serde(rename = "approval")]
    Approval,
}

/// Total order over every step. Index is the ordinal.
pub const STEP_ORDER: [Step; 10] = [
    Step::P1MonitorWorkflow,
    Step::P1CodeReview,
    Step::P1SecurityReview,
    Step::P1CreatePr,
    Step::P2MonitorWorkflow,
    Step::P2MonitorChecks,
    Step::P2CodeQuality,
    Step::P2CodeReview,
    Step::P2SecurityReview,
    Step::Approval,
];

pub const CODE_REVIEW_COMMAND: &str = "/review-pr";
pub const SECURITY_REVIEW_COMMAND: &str = "/security-review";

impl Step {
    pub fn id(&self) -> &'static str {
        match self {
            Self::P1MonitorWorkflow => "p1-1",
            Self::P1CodeReview => "p1-2",
            Self::P1SecurityReview => "p1-3",
            Self::P1CreatePr => "p1-4",
            Self::P2MonitorWorkflow => "p2-1",
            Self::P2MonitorChecks => "p2-2",
            Self::P2CodeQuality => "p2-3",
            Self::P2CodeReview => "p2-4",
            Self::P2SecurityReview => "p2-5",
            Self::Approval => "approval",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        STEP_ORDER.iter().copied().find(|step| step.id() == id)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::P1MonitorWorkflow => "Monitor Workflow",
            Self::P1CodeReview => "Code Review",
            Self::P1SecurityReview => "Security Review",
            Self::P1CreatePr => "Create Pull Request",
            Self::P2MonitorWorkflow => "Monitor PR Workflow",
            Self::P2MonitorChecks => "Monitor PR Checks",
            Self::P2CodeQuality => "Address Code Quality Comments",
            Self::P2CodeReview => "PR Code Review",
            Self::P2SecurityReview => "PR Security Review",
            Self::Approval => "Approval",
        }
    }

    /// Phase derived from the step's namespace. The terminal step belongs to phase2.
    pub fn phase(&self) -> Phase {
        if self.id().starts_with("p1-") {
            Phase::Phase1
        } else {
            Phase::Phase2
        }
    }

    pub fn ordinal(&self) -> usize {
        // STEP_ORDER covers every variant; verify_step_order checks it.
        STEP_ORDER
            .iter()
            .position(|step| step == self)
            .unwrap_or(STEP_ORDER.len())
    }

    pub fn precedes(&self, other: Step) -> bool {
        self.ordinal() < other.ordinal()
    }

    pub fn is_terminal(&self) -> bool {
        next_step(*self).is_none()
    }

    /// Command whose presence in the thread proves a review step was run.
    pub fn evidence_command(&self) -> Option<&'static str> {
        match self {
            Self::P1CodeReview | Self::P2CodeReview => Some(CODE_REVIEW_COMMAND),
            Self::P1SecurityReview | Self::P2SecurityReview => Some(SECURITY_REVIEW_COMMAND),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Successor of `step`, or `None` at the terminal step.
pub fn next_step(step: Step) -> Option<Step> {
    STEP_ORDER.get(step.ordinal() + 1).copied()
}

/// Successor lookup by raw identifier. Unknown identifiers are rejected rather
/// than mapped to an invented successor.
pub fn next_step_id(id: &str) -> Result<Option<Step>, WorkflowError> {
    let step = Step::from_id(id)
        .ok_or_else(|| WorkflowError::validation(format!("unknown step '{id}'")))?;
    Ok(next_step(step))
}

/// Steps of `phase` in order.
pub fn steps_in_phase(phase: Phase) -> impl Iterator<Item = Step> {
    STEP_ORDER
        .iter()
        .copied()
        .filter(move |step| step.phase() == phase)
}

/// Self-consistency check for `STEP_ORDER`, run once at process start.
///
/// Returns every violation found; an empty list means the ordering is sound.
pub fn verify_step_order() -> Vec<String> {
    let mut errors = Vec::new();

    for (idx, step) in STEP_ORDER.iter().enumerate() {
        if STEP_ORDER[..idx].contains(step) {
            errors.push(format!("duplicate step '{step}' at index {idx}"));
        }
        if Step::from_id(step.id()) != Some(*step) {
            errors.push(format!("step '{step}' does not round-trip through its id"));
        }
    }

    let first_phase2 = STEP_ORDER
        .iter()
        .position(|step| step.phase() == Phase::Phase2);
    match first_phase2 {
        Some(boundary) => {
            if boundary == 0 {
                errors.push("phase1 range is empty".to_string());
            }
            if STEP_ORDER[boundary..]
                .iter()
                .any(|step| step.phase() == Phase::Phase1)
            {
                errors.push("phase1 steps must form a prefix".to_string());
            }
        }
        None => errors.push("phase2 range is empty".to_string()),
    }

    let terminals: Vec<&Step> = STEP_ORDER
        .iter()
        .filter(|step| step.id().split_once('-').is_none())
        .collect();
    if terminals.as_slice() != [&Step::Approval] || STEP_ORDER.last() != Some(&Step::Approval) {
        errors.push("exactly one terminal step must close the order".to_string());
    }

    if Phase::Phase1.first_step() != STEP_ORDER[0] {
        errors.push("phase1 must start the order".to_string());
    }
    if let Some(boundary) = first_phase2
        && Phase::Phase2.first_step() != STEP_ORDER[boundary]
    {
        errors.push("phase2 first step does not open the phase2 range".to_string());
    }

    errors
}

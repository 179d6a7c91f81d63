//! Orchestration for `state`, `next`, `complete`, `evidence`, and `persist`.
//!
//! Every entry point takes a fresh [`ExternalSnapshot`]; nothing is cached
//! between invocations. The router resolves the thread for the detected phase,
//! reads its latest state, and either answers with instructions or appends a
//! new state through the [`RetryingPersister`].

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::codec::{InvalidStepPolicy, safe_parse, validate_with_policy};
use crate::core::guards::run_guards;
use crate::core::instructions::{escalation_instructions, step_instructions};
use crate::core::state::WorkflowState;
use crate::core::step::{Phase, Step};
use crate::core::target::{detect_phase, resolve_thread};
use crate::core::thread::search_command_in_comments;
use crate::core::types::{ExternalSnapshot, ThreadRef};
use crate::error::WorkflowError;
use crate::exit_codes;
use crate::io::github::CommentPlatform;
use crate::io::persist::{PersistOutcome, RetryingPersister};
use crate::io::store::{StateStore, ThreadSnapshot};
use crate::report::handle_failure;
use crate::response::{Response, ResponseContent, ResponseFormatter, success};

/// Routing result. Each variant maps to one exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Step instructions, a completed transition, or found evidence.
    Proceed(Response),
    /// A guard stopped routing; the response says how to fix it.
    Halted(Response),
    /// Iteration cap reached.
    Escalated(Response),
    /// The workflow is at its terminal step.
    Finished(Response),
    /// Persisting the new state failed; the response carries recovery data.
    PersistFailed(Response),
    /// A review step lacks its command evidence on the thread.
    EvidenceMissing(Response),
}

impl Outcome {
    pub fn response(&self) -> &Response {
        match self {
            Self::Proceed(response)
            | Self::Halted(response)
            | Self::Escalated(response)
            | Self::Finished(response)
            | Self::PersistFailed(response)
            | Self::EvidenceMissing(response) => response,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Proceed(_) | Self::Halted(_) | Self::Finished(_) => exit_codes::OK,
            Self::Escalated(_) => exit_codes::ESCALATE,
            Self::PersistFailed(_) => exit_codes::PERSIST_FAILED,
            Self::EvidenceMissing(_) => exit_codes::EVIDENCE_MISSING,
        }
    }
}

/// Where the workflow stands for the current branch.
#[derive(Debug, Clone)]
pub struct CurrentState {
    pub phase: Phase,
    pub thread: ThreadRef,
    pub snapshot: ThreadSnapshot,
    /// Authoritative state. Differs from the thread's own state only when
    /// phase2 was just entered.
    pub state: WorkflowState,
    /// The pull request thread had no state yet and phase1 state was carried over.
    pub entered_phase2: bool,
}

/// Serializable summary printed by `review-loop state`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateReport<'a> {
    pub phase: Phase,
    pub thread: ThreadRef,
    pub state: &'a WorkflowState,
    pub source_comment_id: Option<u64>,
    pub entered_phase2: bool,
    pub reread: bool,
    pub iteration_limit_reached: bool,
}

impl CurrentState {
    pub fn report(&self) -> StateReport<'_> {
        StateReport {
            phase: self.phase,
            thread: self.thread,
            state: &self.state,
            source_comment_id: self.snapshot.resolved.comment_id,
            entered_phase2: self.entered_phase2,
            reread: self.snapshot.reread,
            iteration_limit_reached: self.state.is_iteration_limit_reached(),
        }
    }
}

pub struct Router<'a, P: CommentPlatform + ?Sized, F: ResponseFormatter + ?Sized> {
    store: StateStore<'a, P>,
    persister: RetryingPersister,
    formatter: &'a F,
}

impl<'a, P: CommentPlatform + ?Sized, F: ResponseFormatter + ?Sized> Router<'a, P, F> {
    pub fn new(store: StateStore<'a, P>, persister: RetryingPersister, formatter: &'a F) -> Self {
        Self {
            store,
            persister,
            formatter,
        }
    }

    pub fn store(&self) -> &StateStore<'a, P> {
        &self.store
    }

    /// get-current-state: detect the phase, resolve the thread, read its state.
    pub fn current_state(&self, external: &ExternalSnapshot) -> Result<CurrentState> {
        let phase = detect_phase(external);
        let thread = resolve_thread(external, phase)?;
        let snapshot = self.store.read_state(thread)?;

        let mut state = snapshot.state().clone();
        let mut entered_phase2 = false;
        if phase == Phase::Phase2 && snapshot.resolved.comment_id.is_none() {
            state = self.phase1_state(external)?.enter_phase2();
            entered_phase2 = true;
            info!(%thread, iteration = state.iteration, "entering phase2 on pull request thread");
        } else if state.phase != phase {
            warn!(
                %thread,
                detected = %phase,
                persisted = %state.phase,
                "persisted phase disagrees with platform state"
            );
        }

        Ok(CurrentState {
            phase,
            thread,
            snapshot,
            state,
            entered_phase2,
        })
    }

    /// State left on the issue thread, used to carry the iteration into phase2.
    fn phase1_state(&self, external: &ExternalSnapshot) -> Result<WorkflowState> {
        let Some(issue) = external.platform.issue_number else {
            return Ok(WorkflowState::initial());
        };
        let snapshot = self
            .store
            .read_state(ThreadRef::issue(issue))
            .context("read phase1 state from issue thread")?;
        Ok(snapshot.state().clone())
    }

    /// Route to the instructions for the current step.
    ///
    /// Order: guards, iteration cap, terminal step, step instructions.
    pub fn next(&self, external: &ExternalSnapshot) -> Result<Outcome> {
        let current = self.current_state(external)?;

        let mut audit = Vec::new();
        if let Some(halt) = run_guards(external, &mut audit) {
            debug!(title = halt.title, "guard halted routing");
            let content = self
                .content(&current, halt.title, halt.instructions)
                .with_audit(audit);
            return Ok(Outcome::Halted(success(self.formatter, &content)?));
        }

        self.route(&current, audit, &external.git.branch)
    }

    /// Escalation, terminal step, or step instructions for `current`.
    fn route(&self, current: &CurrentState, audit: Vec<String>, branch: &str) -> Result<Outcome> {
        let state = &current.state;
        if state.is_iteration_limit_reached() {
            return self.escalate(current, audit);
        }

        let instructions = step_instructions(state.step, current.thread, branch);
        let content = self
            .content(current, state.step.title(), instructions)
            .with_audit(audit);
        let response = success(self.formatter, &content)?;
        if state.step.is_terminal() {
            return Ok(Outcome::Finished(response));
        }
        Ok(Outcome::Proceed(response))
    }

    fn escalate(&self, current: &CurrentState, audit: Vec<String>) -> Result<Outcome> {
        let state = &current.state;
        let limit = state.effective_max_iterations();
        warn!(thread = %current.thread, iteration = state.iteration, limit, "iteration limit reached, escalating");
        let content = self
            .content(
                current,
                "Escalation Required",
                escalation_instructions(current.thread, state.iteration, limit),
            )
            .with_audit(audit);
        Ok(Outcome::Escalated(success(self.formatter, &content)?))
    }

    /// advance-step: finish `step_id` and persist the resulting state.
    ///
    /// `fixes_needed` records a loop milestone instead of advancing: the
    /// iteration is bumped and the current phase restarts. At the iteration cap
    /// nothing is persisted and the escalation response is returned.
    pub fn complete_step(
        &self,
        external: &ExternalSnapshot,
        step_id: &str,
        fixes_needed: bool,
        note: Option<&str>,
    ) -> Result<Outcome> {
        let step = Step::from_id(step_id)
            .ok_or_else(|| WorkflowError::validation(format!("unknown step '{step_id}'")))?;
        let current = self.current_state(external)?;
        if step != current.state.step {
            return Err(WorkflowError::validation(format!(
                "step '{step}' is not the current step; {} is at '{}'",
                current.thread, current.state.step
            ))
            .into());
        }
        if current.state.is_iteration_limit_reached() {
            warn!(%step, thread = %current.thread, iteration = current.state.iteration, "completion refused at iteration limit");
            return self.escalate(&current, Vec::new());
        }
        if fixes_needed && step.is_terminal() {
            return Err(WorkflowError::validation(format!(
                "step '{step}' is terminal; --fixes-needed cannot restart it"
            ))
            .into());
        }

        if let Some(token) = step.evidence_command()
            && !current.snapshot.has_command_evidence(token)
        {
            warn!(%step, token, thread = %current.thread, "review evidence missing");
            return Ok(Outcome::EvidenceMissing(Response::error(format!(
                "Step {step} ({}) cannot be completed: `{token}` was not found on {}.\n\n\
                 Run `{token}`, post its output as a comment on {}, then complete the step again.",
                step.title(),
                current.thread,
                current.thread
            ))));
        }

        let next = if fixes_needed {
            current.state.restart_iteration()
        } else {
            current.state.advance()?
        };
        let title = if fixes_needed {
            format!("{} needs fixes, iteration {}", step.title(), next.iteration)
        } else {
            format!("{} complete", step.title())
        };
        let body = note.unwrap_or_default();

        match self
            .persister
            .persist(&self.store, current.thread, next.clone(), &title, body)
        {
            PersistOutcome::Persisted { state, attempts } => {
                info!(from = %step, to = %state.step, iteration = state.iteration, attempts, "step completed");
                let advanced = CurrentState {
                    state,
                    entered_phase2: false,
                    ..current
                };
                self.route(&advanced, Vec::new(), &external.git.branch)
            }
            failed @ PersistOutcome::Failed(_) => {
                let target_number = i64::try_from(current.thread.number)
                    .context("target number out of range")?;
                let response = handle_failure(
                    &failed,
                    &next,
                    step,
                    current.thread.kind,
                    target_number,
                    self.formatter,
                )?;
                Ok(Outcome::PersistFailed(response))
            }
        }
    }

    /// check-command-evidence on `thread`.
    pub fn check_evidence(&self, thread: ThreadRef, token: &str) -> Result<Outcome> {
        let comments = self
            .store
            .fetch_comments(thread)
            .with_context(|| format!("fetch comments for {thread}"))?;
        if search_command_in_comments(&comments, token) {
            debug!(%thread, token, "evidence found");
            return Ok(Outcome::Proceed(Response::ok(format!(
                "Found `{token}` on {thread}."
            ))));
        }
        Ok(Outcome::EvidenceMissing(Response::error(format!(
            "`{token}` was not found in any of the {} comments on {thread}.",
            comments.len()
        ))))
    }

    /// persist-state-with-retry for an operator-supplied state payload.
    ///
    /// The payload goes through the same hardened decoding as thread markers,
    /// with an unknown step rejected outright.
    pub fn persist_state(&self, thread: ThreadRef, raw: &str) -> Result<Outcome> {
        let value = safe_parse(raw).context("parse state payload")?;
        let state = validate_with_policy(&value, InvalidStepPolicy::Halt)
            .context("validate state payload")?;
        let violations = state.invariant_violations();
        if !violations.is_empty() {
            return Err(WorkflowError::validation(format!(
                "state payload is inconsistent:\n- {}",
                violations.join("\n- ")
            ))
            .into());
        }

        let step = state.step;
        match self.persister.persist(
            &self.store,
            thread,
            state.clone(),
            "State restored",
            "Re-posted by an operator after a persistence failure.",
        ) {
            PersistOutcome::Persisted { state, attempts } => {
                info!(%thread, step = %state.step, attempts, "state restored");
                Ok(Outcome::Proceed(Response::ok(format!(
                    "Persisted state at step {} (iteration {}) to {thread}.",
                    state.step, state.iteration
                ))))
            }
            failed @ PersistOutcome::Failed(_) => {
                let target_number =
                    i64::try_from(thread.number).context("target number out of range")?;
                let response = handle_failure(
                    &failed,
                    &state,
                    step,
                    thread.kind,
                    target_number,
                    self.formatter,
                )?;
                Ok(Outcome::PersistFailed(response))
            }
        }
    }

    fn content(
        &self,
        current: &CurrentState,
        title: &str,
        instructions: String,
    ) -> ResponseContent {
        let mut content = ResponseContent::new(
            title,
            current.state.step.id(),
            current.state.iteration,
            instructions,
        )
        .with_context("Target", current.thread.to_string())
        .with_context("Phase", current.state.phase.as_str());
        if current.entered_phase2 {
            content = content.with_context("Note", "phase1 state carried over to the pull request");
        }
        content
    }
}

/// Thread for `persist`/`evidence` when the caller did not name one.
pub fn default_thread(external: &ExternalSnapshot) -> Result<ThreadRef, WorkflowError> {
    resolve_thread(external, detect_phase(external))
}

//! Agent-facing instructions for each step.

use crate::core::step::Step;
use crate::core::types::ThreadRef;

/// Instructions for `step` on `thread`. `branch` is the current git branch.
pub fn step_instructions(step: Step, thread: ThreadRef, branch: &str) -> String {
    let target = thread.to_string();
    let number = thread.number;
    match step {
        Step::P1MonitorWorkflow => format!(
            "Wait for the CI workflow on branch '{branch}' to finish.\n\n\
             1. Watch the latest run: `gh run watch $(gh run list --branch {branch} --limit 1 --json databaseId --jq '.[0].databaseId')`.\n\
             2. If it fails, inspect it with `gh run view --log-failed`, fix the cause, commit, and push.\n\
             3. When the run is green, complete this step."
        ),
        Step::P1CodeReview | Step::P2CodeReview => format!(
            "Review the changes on branch '{branch}'.\n\n\
             1. Run `{command}` and post its findings as a comment on {target}.\n\
             2. If the review finds problems, fix them and complete this step with `--fixes-needed`.\n\
             3. Otherwise complete this step.",
            command = evidence(step)
        ),
        Step::P1SecurityReview | Step::P2SecurityReview => format!(
            "Run a security review of branch '{branch}'.\n\n\
             1. Run `{command}` and post its findings as a comment on {target}.\n\
             2. If it reports vulnerabilities, fix them and complete this step with `--fixes-needed`.\n\
             3. Otherwise complete this step.",
            command = evidence(step)
        ),
        Step::P1CreatePr => format!(
            "Open a pull request for branch '{branch}'.\n\n\
             1. Run `gh pr create --fill --body \"Closes #{number}\"`.\n\
             2. Complete this step. The workflow continues on the pull request thread."
        ),
        Step::P2MonitorWorkflow => format!(
            "Wait for the CI workflow triggered by {target} to finish.\n\n\
             1. Watch it with `gh pr checks {number} --watch`.\n\
             2. Fix any failure, commit, push, and watch again.\n\
             3. When every workflow is green, complete this step."
        ),
        Step::P2MonitorChecks => format!(
            "Confirm every required check on {target} has passed.\n\n\
             1. Run `gh pr checks {number} --required`.\n\
             2. Re-run flaky checks with `gh run rerun --failed` and fix real failures.\n\
             3. When all required checks pass, complete this step."
        ),
        Step::P2CodeQuality => format!(
            "Address code-quality bot comments on {target}.\n\n\
             1. List review comments: `gh api repos/{{owner}}/{{repo}}/pulls/{number}/comments`.\n\
             2. Fix or reply to each unresolved finding, then commit and push.\n\
             3. If fixes were pushed, complete this step with `--fixes-needed`; otherwise complete it."
        ),
        Step::Approval => format!(
            "All automated steps are complete. {target} is waiting for human approval.\n\n\
             Request a review with `gh pr edit {number} --add-reviewer <reviewer>` and stop here."
        ),
    }
}

fn evidence(step: Step) -> &'static str {
    step.evidence_command().unwrap_or_default()
}

/// Response text for an iteration cap that has been reached.
pub fn escalation_instructions(thread: ThreadRef, iteration: u32, limit: u32) -> String {
    format!(
        "The review loop on {thread} has run {iteration} iterations, reaching its limit of {limit}.\n\n\
         Stop automated work and ask a human to review the branch. \
         They can raise the limit by posting a state with a larger `maxIterations` \
         through `review-loop persist`."
    )
}

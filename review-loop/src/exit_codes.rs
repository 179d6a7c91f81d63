//! Stable exit codes for review-loop commands.
//!
//! The JSON response on stdout is authoritative; the exit code lets shell
//! callers branch without parsing it.

/// Response produced normally.
pub const OK: i32 = 0;
/// Invalid invocation, target, config, or state.
pub const INVALID: i32 = 1;
/// Iteration cap reached; a human has to take over.
pub const ESCALATE: i32 = 2;
/// State could not be persisted; the response carries recovery data.
pub const PERSIST_FAILED: i32 = 3;
/// A review step was completed without its command evidence on the thread.
pub const EVIDENCE_MISSING: i32 = 4;

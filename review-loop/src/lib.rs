//! Issue-to-pull-request review workflow whose only durable store is the
//! GitHub comment thread.
//!
//! Each invocation reads fresh git and platform facts, resolves the latest
//! state marker on the issue or pull request thread, and either tells the
//! agent what to do next or appends a new state comment. The crate has two
//! layers:
//!
//! - **[`core`]**: Pure, deterministic logic (step order, state transitions,
//!   marker codec, thread reducer, guards). No I/O.
//! - **[`io`]**: Side-effecting adapters (`git`, the `gh` CLI, config files,
//!   retries, persistence).
//!
//! Orchestration modules ([`router`], [`report`], [`lint`]) combine the two to
//! implement CLI commands; [`response`] renders everything the agent sees.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod lint;
pub mod logging;
pub mod report;
pub mod response;
pub mod router;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

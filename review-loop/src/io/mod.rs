//! Side-effecting adapters: git, the `gh` CLI, config files, and retries.

pub mod config;
pub mod git;
pub mod github;
pub mod persist;
pub mod process;
pub mod retry;
pub mod snapshot;
pub mod store;

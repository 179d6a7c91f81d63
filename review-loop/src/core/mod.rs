//! Pure, deterministic workflow logic. No I/O.

pub mod codec;
pub mod guards;
pub mod instructions;
pub mod state;
pub mod step;
pub mod target;
pub mod thread;
pub mod types;

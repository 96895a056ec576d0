//! Process supervision module
//!
//! Owns the single supervised process: lifecycle state, stream ownership,
//! the observe event stream and serialized stdin writes.

pub mod process;
pub mod types;

pub use process::Supervisor;
pub use types::{OutboundEvent, ProcessState, SupervisorError};

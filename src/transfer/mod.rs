//! Transfers through the external multi-connection download agent
//!
//! The engine is agnostic to the agent's output format: progress lines are
//! decoded by a [`ProgressParser`], so a different agent only needs a new
//! parser and command builder.

pub mod agent;
pub mod engine;
pub mod progress;

pub use engine::{TransferEngine, TransferError, TransferOutcome};
pub use progress::{Aria2ProgressParser, ProgressParser, ProgressSample};

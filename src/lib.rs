//! flowsim - Workflow Simulation Engine
//!
//! Replays the execution semantics of an agent-workflow graph (scheduling
//! order, branching, bounded loops, validation, failure propagation and
//! data-flow accounting) as a pull-based stream of update records.

pub mod board;
pub mod config;
pub mod core;
pub mod driver;

// Re-exports
pub use board::RunBoard;
pub use config::SimulationConfig;
pub use core::{Engine, NodeStatus, RunPhase, SimError, Step, Update, Workflow};
pub use driver::RunHandle;

/// Result type alias
pub type Result<T> = anyhow::Result<T>;

//! Core engine - workflow graph, validation, scheduling and the update stream

pub mod behavior;
pub mod engine;
pub mod entropy;
pub mod error;
pub mod events;
pub mod graph;
pub mod latency;
pub mod scheduler;
pub mod validator;

pub use behavior::{BehaviorTable, Outcome, RoleBehavior, StepContext};
pub use engine::{Engine, RunPhase, Step};
pub use entropy::{Entropy, ScriptedEntropy, SeededEntropy, SizeRange};
pub use error::SimError;
pub use events::{
    DataSample, LogKind, LogLine, NodeStatus, RunSummary, StatusChange, Suspension, Update,
};
pub use graph::{Agent, Category, Flow, FlowLink, Port, Role, ToolRef, Workflow};
pub use latency::{FixedLatency, LatencyRange, LatencySampler, LatencyTable, ToolLatencySampler};
pub use scheduler::Scheduler;
pub use validator::{validate, Diagnosis, NodeValidator, ValidationRule, Verdict};

//! The requirements pipeline: phase state, the phase machine and the
//! run-level executor.

pub mod executor;
pub mod machine;
pub mod questions;
pub mod state;

pub use executor::{ArtifactPresence, ExecuteOptions, ExecutionResult, PipelineExecutor};
pub use machine::{GateConfig, GateDecision, GateRule, PhaseMachine, next_phase, should_continue};
pub use state::{DocumentKind, Phase, PipelineState, QaPair};

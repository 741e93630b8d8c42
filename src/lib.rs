//! pipeline-orchestrator - CI/CD job graphs with build matrices, artifacts and gated releases

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use crate::core::{
    ArtifactStore, ExecutionStatus, GateDecision, Job, JobState, Outcome, Pipeline, PipelineError, PipelineRun,
    ReleaseGate, RunContext, RunResult, Step, TriggerMetadata,
};
pub use crate::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy, ShellExecutor, StepExecutor};

//! Pipeline execution engine

pub mod engine;
pub mod runner;
pub mod scheduler;
pub mod shell;

pub use engine::{EventHandler, EventSink, ExecutionEngine, ExecutionEvent};
pub use runner::{ProducedArtifact, StepExecutor, StepOutput, StepRequest, TaskRunner};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
pub use shell::ShellExecutor;

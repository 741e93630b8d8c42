//! Error taxonomy for pipeline definitions, steps and coverage aggregation

use thiserror::Error;

/// Errors raised while loading, validating or running a pipeline definition.
///
/// All of these are fatal for the run: they are reported before any step
/// executes (or, for `Internal`, abort the coordinator itself).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to read pipeline definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse pipeline definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Duplicate job ID: {0}")]
    DuplicateJob(String),

    #[error("Job '{job}' depends on non-existent job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("Cycle detected in job graph: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Job '{job}' declares matrix axis '{axis}' with no values")]
    EmptyAxis { job: String, axis: String },

    #[error("Job '{job}' has an invalid definition: {reason}")]
    InvalidJob { job: String, reason: String },

    #[error("Job '{job}' requires '{input}': {reason}")]
    Contract {
        job: String,
        input: String,
        reason: String,
    },

    #[error("Release gate references non-existent job '{0}'")]
    UnknownGateJob(String),

    #[error("Release gate on '{0}' watches no paths")]
    GateWithoutPaths(String),

    #[error("Invalid path filter '{pattern}': {source}")]
    PathFilter {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Engine failure: {0}")]
    Internal(String),
}

/// Failure of a single step. Local to one job instance.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error("exited with code {code}: {message}")]
    Exit { code: i32, message: String },

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("output '{name}' expected {expected}, got '{value}'")]
    OutputType {
        name: String,
        expected: String,
        value: String,
    },
}

/// Coverage aggregation failures. Fatal to the aggregating job only.
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("No coverage data: no '{artifact}' artifacts were published by '{job}'")]
    NoCoverageData { job: String, artifact: String },

    #[error("Malformed coverage report from {producer}: {source}")]
    Malformed {
        producer: String,
        #[source]
        source: serde_json::Error,
    },
}

//! Core domain models for the pipeline orchestrator
//!
//! This module defines the job graph, matrices, artifacts, coverage
//! aggregation, the release gate and the state of a run.

pub mod artifact;
pub mod config;
pub mod context;
pub mod coverage;
pub mod error;
pub mod gate;
pub mod graph;
pub mod job;
pub mod matrix;
pub mod pipeline;
pub mod secrets;
pub mod state;
pub mod step;

pub use artifact::*;
pub use context::*;
pub use coverage::*;
pub use error::*;
pub use gate::*;
pub use graph::*;
pub use job::*;
pub use matrix::*;
pub use pipeline::*;
pub use secrets::*;
pub use state::*;
pub use step::*;

//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::core::{Outcome, RunResult};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,

    pub pipeline_name: String,

    pub status: ExecutionStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub total_jobs: usize,

    pub succeeded_jobs: usize,

    pub failed_jobs: usize,

    /// Skipped for any reason: dependency, gate or cancellation
    pub skipped_jobs: usize,

    /// Whether the gated release job actually ran and succeeded
    pub release_executed: bool,
}

impl RunSummary {
    pub fn from_result(result: &RunResult, gated_job: Option<&str>) -> Self {
        let count = |wanted: &[Outcome]| {
            result
                .jobs
                .values()
                .filter(|job| job.state.outcome().is_some_and(|o| wanted.contains(&o)))
                .count()
        };

        Self {
            run_id: result.run_id,
            pipeline_name: result.pipeline_name.clone(),
            status: result.status,
            started_at: result.started_at,
            completed_at: result.completed_at,
            total_jobs: result.jobs.len(),
            succeeded_jobs: count(&[Outcome::Success]),
            failed_jobs: count(&[Outcome::Failure]),
            skipped_jobs: count(&[Outcome::SkippedDependency, Outcome::SkippedGate, Outcome::Cancelled]),
            release_executed: gated_job
                .and_then(|job| result.outcome(job))
                .is_some_and(|o| o == Outcome::Success),
        }
    }
}

/// Parse the stored form of an execution status
pub(crate) fn parse_status(raw: &str) -> ExecutionStatus {
    match raw {
        "pending" => ExecutionStatus::Pending,
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "cancelled" => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Pending,
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary (replaces an existing one with the same ID)
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a pipeline, newest first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>>;

    /// Most recent run of a pipeline
    async fn latest_run(&self, pipeline_name: &str) -> Result<Option<RunSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|run| run.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn latest_run(&self, pipeline_name: &str) -> Result<Option<RunSummary>> {
        Ok(self.list_runs(pipeline_name).await?.into_iter().next())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|run| run.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

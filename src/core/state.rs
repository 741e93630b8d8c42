//! Execution state models

use crate::core::{
    artifact::ArtifactRef,
    gate::GateDecision,
    job::OutputValue,
    matrix::JobInstance,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every required job succeeded (or was gate-skipped)
    Completed,
    /// At least one required job did not succeed
    Failed,
    /// Pipeline was cancelled
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle of a job, or of one job instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for upstream jobs
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Never ran because a required upstream job did not succeed
    SkippedDependency {
        upstream: String,
    },
    /// Never ran because the release gate was not eligible
    SkippedGate {
        reason: String,
    },
    /// Stopped at a step boundary by run cancellation or fail-fast
    Cancelled {
        reason: String,
    },
}

impl JobState {
    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobState::Failed { .. })
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobState::Running { started_at }
            | JobState::Succeeded { started_at, .. }
            | JobState::Failed { started_at, .. } => Some(*started_at),
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobState::Succeeded { completed_at, .. } | JobState::Failed { completed_at, .. } => {
                Some(*completed_at)
            }
            _ => None,
        }
    }

    /// Terminal outcome, or `None` while pending or running
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            JobState::Pending | JobState::Running { .. } => None,
            JobState::Succeeded { .. } => Some(Outcome::Success),
            JobState::Failed { .. } => Some(Outcome::Failure),
            JobState::SkippedDependency { .. } => Some(Outcome::SkippedDependency),
            JobState::SkippedGate { .. } => Some(Outcome::SkippedGate),
            JobState::Cancelled { .. } => Some(Outcome::Cancelled),
        }
    }

    /// Fan-in: a job fails iff any of its instances failed
    pub fn from_instances(instances: &[InstanceReport]) -> JobState {
        let started_at = instances.iter().filter_map(|i| i.state.started_at()).min();
        let completed_at = instances.iter().filter_map(|i| i.state.completed_at()).max();
        let now = Utc::now();

        let failed: Vec<&str> = instances
            .iter()
            .filter(|i| i.state.is_failure())
            .map(|i| i.name.as_str())
            .collect();

        if !failed.is_empty() {
            return JobState::Failed {
                error: format!(
                    "{} of {} instances failed: {}",
                    failed.len(),
                    instances.len(),
                    failed.join(", ")
                ),
                started_at: started_at.unwrap_or(now),
                completed_at: completed_at.unwrap_or(now),
            };
        }

        if let Some(reason) = instances.iter().find_map(|i| match &i.state {
            JobState::Cancelled { reason } => Some(reason.clone()),
            _ => None,
        }) {
            return JobState::Cancelled { reason };
        }

        JobState::Succeeded {
            started_at: started_at.unwrap_or(now),
            completed_at: completed_at.unwrap_or(now),
        }
    }
}

/// User-visible terminal outcome of a job or instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Success,
    Failure,
    #[serde(rename = "skipped-due-to-dependency")]
    SkippedDependency,
    #[serde(rename = "skipped-due-to-gate")]
    SkippedGate,
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::SkippedDependency => "skipped-due-to-dependency",
            Outcome::SkippedGate => "skipped-due-to-gate",
            Outcome::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Status of a single step within an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed { error: String },
    /// Optional step whose credential was absent
    Skipped { reason: String },
    /// Not reached: an earlier step failed or the instance was stopped
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
}

/// Terminal report of one job instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceReport {
    /// Instance display name
    pub name: String,
    pub index: usize,
    pub matrix: IndexMap<String, String>,
    pub state: JobState,
    pub steps: Vec<StepReport>,
    pub outputs: IndexMap<String, OutputValue>,
    pub artifacts: Vec<ArtifactRef>,
}

impl InstanceReport {
    /// Report for an instance that never ran
    pub fn skipped(instance: &JobInstance, state: JobState) -> Self {
        Self {
            name: instance.name.clone(),
            index: instance.index,
            matrix: instance.values.clone(),
            state,
            steps: Vec::new(),
            outputs: IndexMap::new(),
            artifacts: Vec::new(),
        }
    }
}

/// Terminal report of a job, fanned in from its instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: String,
    pub name: String,
    pub advisory: bool,
    pub state: JobState,
    /// In expansion order
    pub instances: Vec<InstanceReport>,
    pub outputs: IndexMap<String, OutputValue>,
}

impl JobReport {
    /// Whether this job blocks the run (and its dependents) when it does not
    /// succeed
    pub fn is_required(&self) -> bool {
        !self.advisory
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Job reports in topological order
    pub jobs: IndexMap<String, JobReport>,
    /// Release gate decision, if the pipeline has a gate
    pub release: Option<GateDecision>,
}

impl RunResult {
    /// Overall status: failure iff any required job neither succeeded nor
    /// was gate-skipped. A required job that failed outranks cancellation.
    pub fn overall_status(jobs: &IndexMap<String, JobReport>, cancelled: bool) -> ExecutionStatus {
        let mut required = jobs.values().filter(|job| job.is_required());

        if cancelled {
            return if required.any(|job| job.state.is_failure()) {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Cancelled
            };
        }

        let blocked = required.any(|job| {
            !matches!(
                job.state,
                JobState::Succeeded { .. } | JobState::SkippedGate { .. }
            )
        });

        if blocked {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn job(&self, id: &str) -> Option<&JobReport> {
        self.jobs.get(id)
    }

    pub fn outcome(&self, id: &str) -> Option<Outcome> {
        self.jobs.get(id).and_then(|job| job.state.outcome())
    }

    pub fn output(&self, job: &str, name: &str) -> Option<&OutputValue> {
        self.jobs.get(job).and_then(|job| job.outputs.get(name))
    }

    /// Per-instance outcomes across the whole run, in job then expansion order
    pub fn instance_outcomes(&self) -> Vec<(String, Outcome)> {
        self.jobs
            .values()
            .flat_map(|job| job.instances.iter())
            .filter_map(|instance| instance.state.outcome().map(|o| (instance.name.clone(), o)))
            .collect()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

//! Pipeline domain model

use crate::core::{
    artifact::ArtifactStore,
    config::PipelineConfig,
    error::PipelineError,
    gate::ReleaseGate,
    graph::JobGraph,
    job::Job,
    state::RunResult,
    step::StepDefaults,
};
use indexmap::IndexMap;
use std::sync::Arc;

/// Run-wide execution settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Worker pool bound; `None` runs every ready instance at once
    pub pool_size: Option<usize>,
    pub default_timeout_secs: Option<u64>,
}

/// A pipeline definition: job graph plus optional release gate
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    pub graph: JobGraph,

    pub release: Option<ReleaseGate>,

    pub settings: Settings,

    /// Environment bindings available to every step
    pub env: IndexMap<String, String>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: JobGraph::new(),
            release: None,
            settings: Settings::default(),
            env: IndexMap::new(),
        }
    }

    /// Submit a job to the graph
    pub fn submit(&mut self, job: Job) -> Result<(), PipelineError> {
        self.graph.submit(job)
    }

    pub fn with_release(mut self, gate: ReleaseGate) -> Self {
        self.release = Some(gate);
        self
    }

    /// Create a pipeline from configuration. The result still has to be
    /// validated.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let defaults = StepDefaults {
            timeout_secs: config
                .settings
                .default_timeout_secs
                .unwrap_or(StepDefaults::default().timeout_secs),
        };

        let mut pipeline = Pipeline::new(config.name.clone());
        pipeline.env = config.env.clone();
        pipeline.settings = Settings {
            pool_size: config.settings.pool_size,
            default_timeout_secs: config.settings.default_timeout_secs,
        };

        for job_config in &config.jobs {
            let job = Job::from_config(job_config, &defaults).map_err(|reason| {
                PipelineError::InvalidJob {
                    job: job_config.id.clone(),
                    reason,
                }
            })?;
            pipeline.submit(job)?;
        }

        if let Some(release) = &config.release {
            pipeline.release = Some(ReleaseGate::from_config(release)?);
        }

        Ok(pipeline)
    }

    /// Validate the job graph and the release gate
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.graph.validate()?;

        if let Some(gate) = &self.release {
            if self.graph.job(gate.job()).is_none() {
                return Err(PipelineError::UnknownGateJob(gate.job().to_string()));
            }
        }

        Ok(())
    }

    /// ID of the gated job, if any
    pub fn gated_job(&self) -> Option<&str> {
        self.release.as_ref().map(|gate| gate.job())
    }
}

/// A finished pipeline run: its result plus the run-scoped artifact store,
/// which stays queryable after the run
#[derive(Debug)]
pub struct PipelineRun {
    pub result: RunResult,
    pub artifacts: Arc<ArtifactStore>,
}

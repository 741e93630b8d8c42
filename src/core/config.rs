//! Pipeline definition from YAML

use crate::core::{error::PipelineError, job::OutputType, Pipeline};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;

/// Top-level pipeline definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub settings: SettingsConfig,

    /// Environment bindings available to every step
    #[serde(default)]
    pub env: IndexMap<String, String>,

    pub jobs: Vec<JobConfig>,

    /// Release gate guarding one job
    #[serde(default)]
    pub release: Option<ReleaseConfig>,
}

/// Run-wide settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Worker pool bound (absent = unbounded)
    #[serde(default)]
    pub pool_size: Option<usize>,

    /// Default timeout for steps (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job identifier
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Upstream job IDs
    #[serde(default)]
    pub needs: Vec<String>,

    #[serde(default)]
    pub env: IndexMap<String, String>,

    #[serde(default)]
    pub matrix: Option<MatrixConfig>,

    /// Failures of advisory jobs do not block dependents or the run
    #[serde(default)]
    pub advisory: bool,

    /// Declared outputs and their types
    #[serde(default)]
    pub outputs: IndexMap<String, OutputType>,

    /// Required upstream outputs, written `job.output`
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Required upstream artifacts, written `job.artifact`
    #[serde(default)]
    pub artifacts: Vec<String>,

    #[serde(default)]
    pub steps: Vec<StepConfig>,

    /// Builtin coverage aggregation (instead of steps)
    #[serde(default)]
    pub coverage: Option<CoverageConfig>,
}

/// Matrix configuration: ordered axes plus exclusions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Axis name -> values, in declaration order
    #[serde(flatten)]
    pub axes: IndexMap<String, Vec<Value>>,

    #[serde(default)]
    pub exclude: Vec<IndexMap<String, Value>>,

    /// Stop sibling instances once one fails
    #[serde(default)]
    pub fail_fast: bool,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,

    /// Opaque action handed to the step executor
    pub run: String,

    #[serde(default)]
    pub with: IndexMap<String, String>,

    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Timeout for this step (overrides the default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Artifact name -> path produced by the action
    #[serde(default)]
    pub publish: IndexMap<String, String>,

    /// Credential the step needs; the step is skipped when it is absent
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Upstream job whose instances publish coverage data
    pub from: String,

    #[serde(default = "default_coverage_artifact")]
    pub artifact: String,

    #[serde(default = "default_coverage_publish")]
    pub publish: String,

    #[serde(default = "default_coverage_output")]
    pub output: String,
}

fn default_coverage_artifact() -> String {
    "coverage".to_string()
}

fn default_coverage_publish() -> String {
    "coverage-report".to_string()
}

fn default_coverage_output() -> String {
    "coverage".to_string()
}

/// Release gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Gated job ID
    pub job: String,

    #[serde(default = "default_release_event")]
    pub event: String,

    #[serde(default = "default_release_branch")]
    pub branch: String,

    /// Path globs; `!` excludes. At least one is required.
    #[serde(default)]
    pub paths: Vec<String>,
}

fn default_release_event() -> String {
    "push".to_string()
}

fn default_release_branch() -> String {
    "main".to_string()
}

impl PipelineConfig {
    /// Load a pipeline definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a pipeline definition from a YAML string and validate it
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the definition: job graph, contracts and release gate
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.to_pipeline().map(|_| ())
    }

    /// Convert config to a validated Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, PipelineError> {
        let pipeline = Pipeline::from_config(self)?;
        pipeline.validate()?;
        Ok(pipeline)
    }
}

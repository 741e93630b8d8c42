//! Job domain model

use crate::core::{
    config::{CoverageConfig, JobConfig},
    matrix::{Matrix, MatrixAxis},
    step::{Step, StepDefaults},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared type of a job output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    String,
    Number,
    Boolean,
}

impl OutputType {
    /// Parse a raw value produced by a step against this type
    pub fn parse(&self, raw: &str) -> Option<OutputValue> {
        let raw = raw.trim();
        match self {
            OutputType::String => Some(OutputValue::String(raw.to_string())),
            OutputType::Number => raw.parse::<f64>().ok().map(OutputValue::Number),
            OutputType::Boolean => match raw {
                "true" => Some(OutputValue::Boolean(true)),
                "false" => Some(OutputValue::Boolean(false)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputType::String => write!(f, "string"),
            OutputType::Number => write!(f, "number"),
            OutputType::Boolean => write!(f, "boolean"),
        }
    }
}

/// A typed output value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl OutputValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OutputValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputValue::String(s) => write!(f, "{}", s),
            OutputValue::Number(n) => write!(f, "{}", n),
            OutputValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// Split a `job.name` reference at its last dot
fn split_reference(s: &str, what: &str) -> Result<(String, String), String> {
    match s.rsplit_once('.') {
        Some((job, name)) if !job.is_empty() && !name.is_empty() => Ok((job.to_string(), name.to_string())),
        _ => Err(format!("expected '<job>.<{}>', got '{}'", what, s)),
    }
}

/// Reference to an upstream job's output, written `job.output`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputRef {
    pub job: String,
    pub output: String,
}

impl InputRef {
    pub fn new(job: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            output: output.into(),
        }
    }
}

impl FromStr for InputRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (job, output) = split_reference(s, "output")?;
        Ok(InputRef { job, output })
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.job, self.output)
    }
}

/// Reference to an artifact published by an upstream job, written
/// `job.artifact`. Resolves to every instance's copy of that artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactInput {
    pub job: String,
    pub name: String,
}

impl ArtifactInput {
    pub fn new(job: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            name: name.into(),
        }
    }
}

impl FromStr for ArtifactInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (job, name) = split_reference(s, "artifact")?;
        Ok(ArtifactInput { job, name })
    }
}

impl fmt::Display for ArtifactInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.job, self.name)
    }
}

/// Builtin coverage aggregation over the artifacts of an upstream job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageSpec {
    /// Upstream job whose instances published coverage data
    pub from: String,
    /// Artifact name carrying raw coverage data
    pub artifact: String,
    /// Artifact name the merged report is republished under
    pub publish: String,
    /// Output name exposing the covered percentage
    pub output: String,
}

impl CoverageSpec {
    pub fn new(from: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            artifact: artifact.into(),
            publish: "coverage-report".to_string(),
            output: "coverage".to_string(),
        }
    }

    fn from_config(config: &CoverageConfig) -> Self {
        Self {
            from: config.from.clone(),
            artifact: config.artifact.clone(),
            publish: config.publish.clone(),
            output: config.output.clone(),
        }
    }
}

/// What a job does when it runs
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Ordered steps handed to the task runner
    Steps(Vec<Step>),
    /// Builtin coverage aggregation
    Coverage(CoverageSpec),
}

/// A named unit of work in the pipeline graph
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Upstream job IDs
    pub needs: Vec<String>,

    /// Job-level environment bindings
    pub env: IndexMap<String, String>,

    /// Matrix axes (empty = single instance)
    pub matrix: Matrix,

    /// Advisory jobs never block their dependents
    pub advisory: bool,

    /// Declared outputs and their types
    pub outputs: IndexMap<String, OutputType>,

    /// Upstream outputs this job consumes
    pub inputs: Vec<InputRef>,

    /// Upstream artifacts this job consumes
    pub artifacts: Vec<ArtifactInput>,

    pub kind: JobKind,
}

impl Job {
    /// Create a step-based job with no dependencies
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            needs: Vec::new(),
            env: IndexMap::new(),
            matrix: Matrix::default(),
            advisory: false,
            outputs: IndexMap::new(),
            inputs: Vec::new(),
            artifacts: Vec::new(),
            kind: JobKind::Steps(Vec::new()),
        }
    }

    /// Create a coverage aggregation job. It depends on the source job and
    /// declares the percentage output as a number.
    pub fn coverage(id: impl Into<String>, spec: CoverageSpec) -> Self {
        let mut job = Job::new(id);
        job.needs.push(spec.from.clone());
        job.outputs.insert(spec.output.clone(), OutputType::Number);
        job.kind = JobKind::Coverage(spec);
        job
    }

    /// Create a job from a job config
    pub fn from_config(config: &JobConfig, defaults: &StepDefaults) -> Result<Self, String> {
        let mut job = match &config.coverage {
            Some(coverage) => {
                if !config.steps.is_empty() {
                    return Err("a coverage job cannot also declare steps".to_string());
                }
                Job::coverage(config.id.clone(), CoverageSpec::from_config(coverage))
            }
            None => {
                let mut job = Job::new(config.id.clone());
                job.kind = JobKind::Steps(
                    config
                        .steps
                        .iter()
                        .map(|step| Step::from_config(step, defaults))
                        .collect(),
                );
                job
            }
        };

        if let Some(name) = &config.name {
            job.name = name.clone();
        }
        for need in &config.needs {
            if !job.needs.contains(need) {
                job.needs.push(need.clone());
            }
        }
        job.env = config.env.clone();
        job.advisory = config.advisory;
        job.outputs.extend(config.outputs.iter().map(|(k, v)| (k.clone(), *v)));
        job.inputs = config
            .inputs
            .iter()
            .map(|raw| raw.parse::<InputRef>())
            .collect::<Result<_, _>>()?;
        job.artifacts = config
            .artifacts
            .iter()
            .map(|raw| raw.parse::<ArtifactInput>())
            .collect::<Result<_, _>>()?;
        if let Some(matrix) = &config.matrix {
            job.matrix = Matrix::from_config(matrix);
        }

        Ok(job)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn needs(mut self, job: impl Into<String>) -> Self {
        self.needs.push(job.into());
        self
    }

    pub fn axis<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.matrix.axes.push(MatrixAxis::new(name, values));
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.matrix.fail_fast = true;
        self
    }

    pub fn advisory(mut self) -> Self {
        self.advisory = true;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>, kind: OutputType) -> Self {
        self.outputs.insert(name.into(), kind);
        self
    }

    /// Consume an upstream job's output
    pub fn input(mut self, job: impl Into<String>, output: impl Into<String>) -> Self {
        self.inputs.push(InputRef::new(job, output));
        self
    }

    /// Consume every copy of an artifact published by an upstream job
    pub fn artifact(mut self, job: impl Into<String>, name: impl Into<String>) -> Self {
        self.artifacts.push(ArtifactInput::new(job, name));
        self
    }

    /// Whether this job declares an artifact under `name`
    pub fn declares_artifact(&self, name: &str) -> bool {
        match &self.kind {
            JobKind::Steps(steps) => steps.iter().any(|step| step.publish.contains_key(name)),
            JobKind::Coverage(spec) => spec.publish == name,
        }
    }

    /// Append a step. Has no effect on coverage jobs.
    pub fn step(mut self, step: Step) -> Self {
        if let JobKind::Steps(steps) = &mut self.kind {
            steps.push(step);
        }
        self
    }

    pub fn steps(&self) -> &[Step] {
        match &self.kind {
            JobKind::Steps(steps) => steps,
            JobKind::Coverage(_) => &[],
        }
    }
}

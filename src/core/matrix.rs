//! Matrix expansion: one job template, many concrete instances

use crate::core::{config::MatrixConfig, job::Job};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// A dimension of variation with discrete, ordered values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

impl MatrixAxis {
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Matrix definition of a job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matrix {
    /// Axes in declaration order; the first axis varies slowest
    pub axes: Vec<MatrixAxis>,

    /// Partial combinations to drop from the cross-product
    pub exclude: Vec<IndexMap<String, String>>,

    /// Stop sibling instances once one fails
    pub fail_fast: bool,
}

impl Matrix {
    pub fn from_config(config: &MatrixConfig) -> Self {
        Self {
            axes: config
                .axes
                .iter()
                .map(|(name, values)| MatrixAxis::new(name.clone(), values.iter().map(scalar_to_string)))
                .collect(),
            exclude: config
                .exclude
                .iter()
                .map(|combo| {
                    combo
                        .iter()
                        .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                        .collect()
                })
                .collect(),
            fail_fast: config.fail_fast,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}

/// Render a YAML scalar as a matrix value
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// One concrete execution of a job for one axis-value tuple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    /// Job this instance belongs to
    pub job: String,

    /// Position in expansion order
    pub index: usize,

    /// Axis name -> value, in axis order
    pub values: IndexMap<String, String>,

    /// Stable display name, e.g. `validate (os=linux, python=3.12)`
    pub name: String,
}

impl JobInstance {
    fn new(job: &str, index: usize, values: IndexMap<String, String>) -> Self {
        let name = if values.is_empty() {
            job.to_string()
        } else {
            let parts: Vec<String> = values.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("{} ({})", job, parts.join(", "))
        };

        Self {
            job: job.to_string(),
            index,
            values,
            name,
        }
    }
}

/// Expander for job matrices
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a job into its ordered instances.
    ///
    /// A job without axes yields exactly one instance. Expansion is
    /// deterministic for a given axis order: the last axis varies fastest.
    pub fn expand(job: &Job) -> Vec<JobInstance> {
        Self::combinations(&job.matrix)
            .into_iter()
            .filter(|combo| {
                !job.matrix
                    .exclude
                    .iter()
                    .any(|exclude| Self::matches_exclude(combo, exclude))
            })
            .enumerate()
            .map(|(index, values)| JobInstance::new(&job.id, index, values))
            .collect()
    }

    /// Number of instances the job expands to
    pub fn instance_count(job: &Job) -> usize {
        Self::expand(job).len()
    }

    fn combinations(matrix: &Matrix) -> Vec<IndexMap<String, String>> {
        let mut result = vec![IndexMap::new()];

        for axis in &matrix.axes {
            let mut next = Vec::with_capacity(result.len() * axis.values.len());
            for combo in &result {
                for value in &axis.values {
                    let mut extended = combo.clone();
                    extended.insert(axis.name.clone(), value.clone());
                    next.push(extended);
                }
            }
            result = next;
        }

        result
    }

    fn matches_exclude(combo: &IndexMap<String, String>, exclude: &IndexMap<String, String>) -> bool {
        !exclude.is_empty() && exclude.iter().all(|(key, value)| combo.get(key) == Some(value))
    }
}

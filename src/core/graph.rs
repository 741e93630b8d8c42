//! Job graph: submission, load-time validation and dependency order

use crate::core::{
    error::PipelineError,
    job::{Job, JobKind},
    matrix::MatrixExpander,
};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Directed acyclic graph of jobs, keyed by job ID in submission order
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    jobs: IndexMap<String, Job>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job to the graph. Only identity is checked here; edges are
    /// checked by [`JobGraph::validate`] once every job is known.
    pub fn submit(&mut self, job: Job) -> Result<(), PipelineError> {
        if self.jobs.contains_key(&job.id) {
            return Err(PipelineError::DuplicateJob(job.id));
        }
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs that list `id` in their `needs`
    pub fn dependents(&self, id: &str) -> Vec<&Job> {
        self.jobs
            .values()
            .filter(|job| job.needs.iter().any(|need| need == id))
            .collect()
    }

    /// All direct and transitive upstream jobs of `id`
    pub fn upstream(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self
            .jobs
            .get(id)
            .map(|job| job.needs.iter().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(current) = stack.pop() {
            if seen.insert(current.to_string()) {
                if let Some(job) = self.jobs.get(current) {
                    stack.extend(job.needs.iter().map(String::as_str));
                }
            }
        }

        seen
    }

    /// Validate the whole graph before anything runs
    pub fn validate(&self) -> Result<(), PipelineError> {
        for job in self.jobs.values() {
            for dep in &job.needs {
                if !self.jobs.contains_key(dep) {
                    return Err(PipelineError::UnknownDependency {
                        job: job.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }

            for axis in &job.matrix.axes {
                if axis.values.is_empty() {
                    return Err(PipelineError::EmptyAxis {
                        job: job.id.clone(),
                        axis: axis.name.clone(),
                    });
                }
            }

            if MatrixExpander::instance_count(job) == 0 {
                return Err(PipelineError::InvalidJob {
                    job: job.id.clone(),
                    reason: "matrix excludes every combination".to_string(),
                });
            }
        }

        // Cycles are checked before contracts: upstream sets are only
        // meaningful on an acyclic graph
        self.topological_order()?;

        for job in self.jobs.values() {
            self.validate_contracts(job)?;
        }

        Ok(())
    }

    fn validate_contracts(&self, job: &Job) -> Result<(), PipelineError> {
        let upstream = self.upstream(&job.id);

        if let JobKind::Coverage(spec) = &job.kind {
            if !upstream.contains(&spec.from) {
                return Err(PipelineError::InvalidJob {
                    job: job.id.clone(),
                    reason: format!("coverage source '{}' is not an upstream job", spec.from),
                });
            }
        }

        for input in &job.inputs {
            let producer = self.upstream_producer(job, &upstream, &input.job, &input.to_string())?;
            if !producer.outputs.contains_key(&input.output) {
                return Err(PipelineError::Contract {
                    job: job.id.clone(),
                    input: input.to_string(),
                    reason: format!(
                        "job '{}' does not declare output '{}'",
                        input.job, input.output
                    ),
                });
            }
        }

        for artifact in &job.artifacts {
            let producer = self.upstream_producer(job, &upstream, &artifact.job, &artifact.to_string())?;
            if !producer.declares_artifact(&artifact.name) {
                return Err(PipelineError::Contract {
                    job: job.id.clone(),
                    input: artifact.to_string(),
                    reason: format!(
                        "job '{}' does not publish artifact '{}'",
                        artifact.job, artifact.name
                    ),
                });
            }
        }

        Ok(())
    }

    /// The job a reference points at, which must exist and be upstream of `job`
    fn upstream_producer(
        &self,
        job: &Job,
        upstream: &HashSet<String>,
        producer: &str,
        reference: &str,
    ) -> Result<&Job, PipelineError> {
        let contract_error = |reason: String| PipelineError::Contract {
            job: job.id.clone(),
            input: reference.to_string(),
            reason,
        };

        let found = self
            .jobs
            .get(producer)
            .ok_or_else(|| contract_error(format!("job '{}' does not exist", producer)))?;

        if !upstream.contains(producer) {
            return Err(contract_error(format!("job '{}' is not an upstream dependency", producer)));
        }

        Ok(found)
    }

    /// Topological order of job IDs, dependencies first.
    ///
    /// Deterministic: ties are broken by submission order. Fails with
    /// [`PipelineError::Cycle`] naming the jobs on the cycle.
    pub fn topological_order(&self) -> Result<Vec<String>, PipelineError> {
        let mut result = Vec::with_capacity(self.jobs.len());
        let mut visited = HashSet::new();
        let mut path = Vec::new();

        for id in self.jobs.keys() {
            self.visit(id, &mut visited, &mut path, &mut result)?;
        }

        Ok(result)
    }

    fn visit(
        &self,
        id: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
        result: &mut Vec<String>,
    ) -> Result<(), PipelineError> {
        if visited.contains(id) {
            return Ok(());
        }

        if let Some(start) = path.iter().position(|p| p == id) {
            let mut cycle = path[start..].to_vec();
            cycle.push(id.to_string());
            return Err(PipelineError::Cycle { path: cycle });
        }

        path.push(id.to_string());
        if let Some(job) = self.jobs.get(id) {
            for dep in &job.needs {
                self.visit(dep, visited, path, result)?;
            }
        }
        path.pop();

        visited.insert(id.to_string());
        result.push(id.to_string());
        Ok(())
    }
}

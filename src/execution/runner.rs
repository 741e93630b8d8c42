//! Task runner - executes the steps of one job instance

use crate::core::{
    artifact::{Artifact, ArtifactRef, ArtifactStore},
    context::InstanceContext,
    coverage::CoverageAggregator,
    error::StepError,
    job::{CoverageSpec, Job, JobKind, OutputValue},
    matrix::JobInstance,
    state::{InstanceReport, JobState, StepReport, StepStatus},
    step::Step,
};
use crate::execution::engine::{EventSink, ExecutionEvent};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Everything an executor needs to run one step
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub job: &'a str,
    pub instance: &'a JobInstance,
    pub step: &'a Step,
    /// Fully merged environment for the step
    pub env: &'a IndexMap<String, String>,
    /// Upstream artifacts the job declared, in declaration order
    pub artifacts: &'a [Artifact],
}

/// An artifact produced by a step, before it is published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedArtifact {
    pub name: String,
    pub data: Vec<u8>,
}

/// What the external task engine reports back for one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub exit_code: i32,
    pub stderr: String,
    pub artifacts: Vec<ProducedArtifact>,
    /// Raw output values, checked against the job's declared types
    pub outputs: IndexMap<String, String>,
}

impl StepOutput {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.artifacts.push(ProducedArtifact {
            name: name.into(),
            data: data.into(),
        });
        self
    }
}

/// Trait for the external task engine that runs step actions
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run one step action. `Err` means the executor itself failed; a step
    /// that ran and failed reports a non-zero exit code instead.
    async fn execute(&self, request: StepRequest<'_>) -> Result<StepOutput, StepError>;
}

/// Runs job instances: ordered steps, short-circuit on first failure
pub struct TaskRunner<E> {
    executor: Arc<E>,
    store: Arc<ArtifactStore>,
    events: EventSink,
}

impl<E: StepExecutor> TaskRunner<E> {
    pub fn new(executor: Arc<E>, store: Arc<ArtifactStore>, events: EventSink) -> Self {
        Self {
            executor,
            store,
            events,
        }
    }

    /// Run one job instance to a terminal state
    pub async fn run(&self, job: &Job, ctx: InstanceContext) -> InstanceReport {
        match &job.kind {
            JobKind::Steps(steps) => self.run_steps(job, steps, ctx).await,
            JobKind::Coverage(spec) => self.run_coverage(job, spec, ctx).await,
        }
    }

    async fn run_steps(&self, job: &Job, steps: &[Step], ctx: InstanceContext) -> InstanceReport {
        let instance = &ctx.instance;
        let started_at = Utc::now();

        if let Some(reason) = ctx.stop_reason() {
            return self.cancelled(instance, steps, reason);
        }

        info!("Running instance {}", instance.name);
        self.events.emit(ExecutionEvent::InstanceStarted {
            job: job.id.clone(),
            instance: instance.name.clone(),
        });

        let mut reports = Vec::with_capacity(steps.len());
        let mut outputs = IndexMap::new();
        let mut artifacts = Vec::new();
        let mut failure: Option<String> = None;
        let mut stopped: Option<String> = None;

        for step in steps {
            if failure.is_some() || stopped.is_some() {
                reports.push(not_run(step));
                continue;
            }

            if let Some(reason) = ctx.stop_reason() {
                info!("Instance {} stopping before step {}: {}", instance.name, step.name, reason);
                stopped = Some(reason);
                reports.push(not_run(step));
                continue;
            }

            if let Some(secret) = &step.secret {
                if ctx.run.secret(secret).is_none() {
                    let reason = format!("credential '{}' not supplied", secret);
                    info!("Skipping optional step {} in {}: {}", step.name, instance.name, reason);
                    self.events.emit(ExecutionEvent::StepSkipped {
                        instance: instance.name.clone(),
                        step: step.name.clone(),
                        reason: reason.clone(),
                    });
                    reports.push(StepReport {
                        name: step.name.clone(),
                        status: StepStatus::Skipped { reason },
                        duration_ms: 0,
                    });
                    continue;
                }
            }

            self.events.emit(ExecutionEvent::StepStarted {
                instance: instance.name.clone(),
                step: step.name.clone(),
            });

            let clock = Instant::now();
            let result = self.execute_step(job, &ctx, step).await;
            let duration_ms = clock.elapsed().as_millis() as u64;

            match result {
                Ok((step_outputs, step_artifacts)) => {
                    debug!("Step {} of {} succeeded in {}ms", step.name, instance.name, duration_ms);
                    outputs.extend(step_outputs);
                    artifacts.extend(step_artifacts);
                    reports.push(StepReport {
                        name: step.name.clone(),
                        status: StepStatus::Succeeded,
                        duration_ms,
                    });
                }
                Err(e) => {
                    error!("Step {} of {} failed: {}", step.name, instance.name, e);
                    self.events.emit(ExecutionEvent::StepFailed {
                        instance: instance.name.clone(),
                        step: step.name.clone(),
                        error: e.to_string(),
                    });
                    reports.push(StepReport {
                        name: step.name.clone(),
                        status: StepStatus::Failed { error: e.to_string() },
                        duration_ms,
                    });
                    failure = Some(format!("step '{}' {}", step.name, e));

                    if job.matrix.fail_fast {
                        ctx.abort_siblings();
                    }
                }
            }
        }

        let state = match (failure, stopped) {
            (Some(error), _) => JobState::Failed {
                error,
                started_at,
                completed_at: Utc::now(),
            },
            (None, Some(reason)) => JobState::Cancelled { reason },
            (None, None) => JobState::Succeeded {
                started_at,
                completed_at: Utc::now(),
            },
        };

        self.finish(job, instance, state, reports, outputs, artifacts)
    }

    /// Execute one step: run the action under its time limit, check its
    /// outputs, then publish its artifacts
    async fn execute_step(
        &self,
        job: &Job,
        ctx: &InstanceContext,
        step: &Step,
    ) -> Result<(IndexMap<String, OutputValue>, Vec<ArtifactRef>), StepError> {
        let env = ctx.step_env(step);
        let request = StepRequest {
            job: &job.id,
            instance: &ctx.instance,
            step,
            env: &env,
            artifacts: &ctx.artifacts,
        };

        let output = match timeout(Duration::from_secs(step.timeout_secs), self.executor.execute(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(StepError::Timeout(step.timeout_secs)),
        };

        if output.exit_code != 0 {
            return Err(StepError::Exit {
                code: output.exit_code,
                message: output.stderr.trim().to_string(),
            });
        }

        let outputs = typed_outputs(job, step, output.outputs)?;

        let mut published = Vec::with_capacity(output.artifacts.len());
        for artifact in output.artifacts {
            let reference = self
                .store
                .publish(&job.id, &ctx.instance.name, &artifact.name, artifact.data)
                .await;
            self.events.emit(ExecutionEvent::ArtifactPublished {
                reference: reference.clone(),
            });
            published.push(reference);
        }

        Ok((outputs, published))
    }

    /// Builtin coverage job: merge every instance's coverage artifact from
    /// the source job, republish the merged report and expose the percentage
    async fn run_coverage(&self, job: &Job, spec: &CoverageSpec, ctx: InstanceContext) -> InstanceReport {
        let instance = &ctx.instance;
        let started_at = Utc::now();
        let step_name = "aggregate-coverage";

        if let Some(reason) = ctx.stop_reason() {
            return self.cancelled(instance, &[], reason);
        }

        self.events.emit(ExecutionEvent::InstanceStarted {
            job: job.id.clone(),
            instance: instance.name.clone(),
        });

        let clock = Instant::now();
        let sources = self.store.fetch_merged(&spec.from, &spec.artifact).await;
        debug!("Aggregating {} coverage artifacts from {}", sources.len(), spec.from);

        let merged = CoverageAggregator::aggregate(&spec.from, &spec.artifact, &sources)
            .map_err(|e| e.to_string())
            .and_then(|summary| {
                summary
                    .report
                    .to_json()
                    .map(|json| (summary.percent, json))
                    .map_err(|e| format!("failed to encode merged report: {}", e))
            });

        let mut outputs = IndexMap::new();
        let mut artifacts = Vec::new();
        let duration_ms = clock.elapsed().as_millis() as u64;

        let (state, status) = match merged {
            Ok((percent, json)) => {
                info!("Coverage for {}: {:.2}% over {} reports", spec.from, percent, sources.len());
                let reference = self.store.publish(&job.id, &instance.name, &spec.publish, json).await;
                self.events.emit(ExecutionEvent::ArtifactPublished {
                    reference: reference.clone(),
                });
                artifacts.push(reference);
                outputs.insert(spec.output.clone(), OutputValue::Number(percent));

                (
                    JobState::Succeeded {
                        started_at,
                        completed_at: Utc::now(),
                    },
                    StepStatus::Succeeded,
                )
            }
            Err(error) => {
                error!("Coverage aggregation in {} failed: {}", job.id, error);
                self.events.emit(ExecutionEvent::StepFailed {
                    instance: instance.name.clone(),
                    step: step_name.to_string(),
                    error: error.clone(),
                });
                (
                    JobState::Failed {
                        error: error.clone(),
                        started_at,
                        completed_at: Utc::now(),
                    },
                    StepStatus::Failed { error },
                )
            }
        };

        let steps = vec![StepReport {
            name: step_name.to_string(),
            status,
            duration_ms,
        }];

        self.finish(job, instance, state, steps, outputs, artifacts)
    }

    fn cancelled(&self, instance: &JobInstance, steps: &[Step], reason: String) -> InstanceReport {
        info!("Instance {} not started: {}", instance.name, reason);
        let mut report = InstanceReport::skipped(instance, JobState::Cancelled { reason });
        report.steps = steps.iter().map(not_run).collect();

        self.events.emit(ExecutionEvent::InstanceFinished {
            job: instance.job.clone(),
            instance: instance.name.clone(),
            state: report.state.clone(),
        });
        report
    }

    fn finish(
        &self,
        job: &Job,
        instance: &JobInstance,
        state: JobState,
        steps: Vec<StepReport>,
        outputs: IndexMap<String, OutputValue>,
        artifacts: Vec<ArtifactRef>,
    ) -> InstanceReport {
        self.events.emit(ExecutionEvent::InstanceFinished {
            job: job.id.clone(),
            instance: instance.name.clone(),
            state: state.clone(),
        });

        InstanceReport {
            name: instance.name.clone(),
            index: instance.index,
            matrix: instance.values.clone(),
            state,
            steps,
            outputs,
            artifacts,
        }
    }
}

fn not_run(step: &Step) -> StepReport {
    StepReport {
        name: step.name.clone(),
        status: StepStatus::NotRun,
        duration_ms: 0,
    }
}

/// Parse raw step outputs against the job's declared output types.
/// Undeclared outputs are dropped.
fn typed_outputs(
    job: &Job,
    step: &Step,
    raw: IndexMap<String, String>,
) -> Result<IndexMap<String, OutputValue>, StepError> {
    let mut typed = IndexMap::new();

    for (name, value) in raw {
        let Some(kind) = job.outputs.get(&name) else {
            warn!(
                "Step {} of job {} set undeclared output '{}', dropping it",
                step.name, job.id, name
            );
            continue;
        };

        let parsed = kind.parse(&value).ok_or_else(|| StepError::OutputType {
            name: name.clone(),
            expected: kind.to_string(),
            value: value.clone(),
        })?;
        typed.insert(name, parsed);
    }

    Ok(typed)
}

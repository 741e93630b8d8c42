//! Main execution engine - orchestrates the entire pipeline run

use crate::core::{
    artifact::{Artifact, ArtifactRef, ArtifactStore},
    context::{InstanceContext, RunContext},
    error::PipelineError,
    gate::{ChangeDetector, GateDecision, StaticChangeDetector},
    job::{Job, OutputValue},
    matrix::{JobInstance, MatrixExpander},
    pipeline::{Pipeline, PipelineRun},
    state::{ExecutionStatus, InstanceReport, JobReport, JobState, Outcome, RunResult},
};
use crate::execution::{
    runner::{StepExecutor, TaskRunner},
    scheduler::{ExecutionScheduler, SchedulingStrategy},
};
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        jobs: usize,
    },
    GateEvaluated {
        job: String,
        decision: GateDecision,
    },
    JobStarted {
        job: String,
        instances: usize,
    },
    /// A job that never ran, with the terminal state it took instead
    JobSkipped {
        job: String,
        state: JobState,
    },
    InstanceStarted {
        job: String,
        instance: String,
    },
    StepStarted {
        instance: String,
        step: String,
    },
    StepSkipped {
        instance: String,
        step: String,
        reason: String,
    },
    StepFailed {
        instance: String,
        step: String,
        error: String,
    },
    ArtifactPublished {
        reference: ArtifactRef,
    },
    InstanceFinished {
        job: String,
        instance: String,
        state: JobState,
    },
    JobFinished {
        job: String,
        state: JobState,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Fan-out of events to the registered handlers
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Arc<Vec<EventHandler>>,
}

impl EventSink {
    pub fn new(handlers: Vec<EventHandler>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(&event);
        }
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine<E> {
    executor: Arc<E>,
    scheduler: ExecutionScheduler,
    detector: Arc<dyn ChangeDetector>,
    event_handlers: Vec<EventHandler>,
}

impl<E: StepExecutor + 'static> ExecutionEngine<E> {
    pub fn new(executor: E, strategy: SchedulingStrategy) -> Self {
        Self {
            executor: Arc::new(executor),
            scheduler: ExecutionScheduler::new(strategy),
            detector: Arc::new(StaticChangeDetector::default()),
            event_handlers: Vec::new(),
        }
    }

    /// Use a change detector for the release gate's path condition
    pub fn with_change_detector(mut self, detector: Arc<dyn ChangeDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Execute the entire pipeline.
    ///
    /// The definition is validated first; an invalid graph fails here before
    /// any step runs. Step failures never surface as `Err`: they are recorded
    /// in the returned [`RunResult`].
    pub async fn execute(&self, pipeline: &Pipeline, ctx: RunContext) -> Result<PipelineRun, PipelineError> {
        pipeline.validate()?;
        let order = pipeline.graph.topological_order()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let events = EventSink::new(self.event_handlers.clone());

        let mut ctx = ctx;
        let mut env = pipeline.env.clone();
        env.extend(std::mem::take(&mut ctx.env));
        ctx.env = env;
        let run = Arc::new(ctx);

        info!("Starting pipeline execution: {} ({})", pipeline.name, run_id);
        events.emit(ExecutionEvent::RunStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            jobs: order.len(),
        });

        let gate = match &pipeline.release {
            Some(gate) => {
                let decision = gate.decide(&run.trigger, self.detector.as_ref()).await;
                info!("Release gate for {}: {:?}", gate.job(), decision);
                events.emit(ExecutionEvent::GateEvaluated {
                    job: gate.job().to_string(),
                    decision: decision.clone(),
                });
                Some((gate.job().to_string(), decision))
            }
            None => None,
        };

        let store = Arc::new(ArtifactStore::new());
        let runner = Arc::new(TaskRunner::new(self.executor.clone(), store.clone(), events.clone()));
        let pool = Arc::new(Semaphore::new(self.scheduler.strategy().permits()));

        let mut states: HashMap<String, JobState> =
            order.iter().map(|id| (id.clone(), JobState::Pending)).collect();
        let mut reports: HashMap<String, JobReport> = HashMap::new();
        let mut slots: HashMap<String, Vec<Option<InstanceReport>>> = HashMap::new();
        let mut tasks: JoinSet<(String, usize, InstanceReport)> = JoinSet::new();

        loop {
            // Skipping a job can make its dependents ready, so dispatch until
            // nothing new becomes ready
            loop {
                let ready = self.scheduler.ready_jobs(&pipeline.graph, &order, &states);
                if ready.is_empty() {
                    break;
                }

                for id in ready {
                    let job = pipeline
                        .graph
                        .job(&id)
                        .ok_or_else(|| PipelineError::Internal(format!("job '{}' vanished from graph", id)))?;
                    let instances = MatrixExpander::expand(job);

                    let resolved = match self.skip_state(pipeline, job, &states, gate.as_ref(), &run) {
                        Some(state) => Err(state),
                        None => resolve_inputs(job, &reports, &store).await,
                    };
                    let resolved = match resolved {
                        Ok(resolved) => resolved,
                        Err(state) => {
                            info!("Job {} will not run: {:?}", id, state);
                            events.emit(ExecutionEvent::JobSkipped {
                                job: id.clone(),
                                state: state.clone(),
                            });
                            reports.insert(id.clone(), never_ran(job, &instances, state.clone()));
                            states.insert(id, state);
                            continue;
                        }
                    };

                    info!("Starting job {} ({} instances)", id, instances.len());
                    events.emit(ExecutionEvent::JobStarted {
                        job: id.clone(),
                        instances: instances.len(),
                    });
                    states.insert(id.clone(), JobState::Running { started_at: Utc::now() });
                    slots.insert(id.clone(), vec![None; instances.len()]);

                    let abort = Arc::new(AtomicBool::new(false));
                    let job = Arc::new(job.clone());
                    for instance in instances {
                        let ctx = InstanceContext::new(run.clone(), instance, abort.clone())
                            .with_env(job.env.clone())
                            .with_inputs(resolved.outputs.clone())
                            .with_artifacts(resolved.artifacts.clone());
                        let runner = runner.clone();
                        let pool = pool.clone();
                        let job = job.clone();

                        tasks.spawn(async move {
                            let index = ctx.instance.index;
                            let report = match pool.acquire_owned().await {
                                Ok(_permit) => runner.run(&job, ctx).await,
                                Err(_) => InstanceReport::skipped(
                                    &ctx.instance,
                                    JobState::Cancelled {
                                        reason: "worker pool closed".to_string(),
                                    },
                                ),
                            };
                            (job.id.clone(), index, report)
                        });
                    }
                }
            }

            if tasks.is_empty() {
                if states.values().all(JobState::is_terminal) {
                    break;
                }
                let stuck: Vec<&String> = states
                    .iter()
                    .filter(|(_, state)| !state.is_terminal())
                    .map(|(id, _)| id)
                    .collect();
                error!("Pipeline stuck with non-terminal jobs: {:?}", stuck);
                return Err(PipelineError::Internal(format!(
                    "pipeline stuck: no runnable work but {} jobs are not finished",
                    stuck.len()
                )));
            }

            let (job_id, index, report) = match tasks.join_next().await {
                Some(Ok(finished)) => finished,
                Some(Err(e)) => {
                    return Err(PipelineError::Internal(format!("job instance task failed: {}", e)));
                }
                None => continue,
            };

            debug!("Instance {} finished: {:?}", report.name, report.state.outcome());
            let slot = slots
                .get_mut(&job_id)
                .ok_or_else(|| PipelineError::Internal(format!("no instance slots for job '{}'", job_id)))?;
            if let Some(entry) = slot.get_mut(index) {
                *entry = Some(report);
            }

            if slot.iter().all(Option::is_some) {
                let instances: Vec<InstanceReport> = slots.remove(&job_id).into_iter().flatten().flatten().collect();
                let report = self.fan_in(pipeline, &job_id, instances)?;

                info!("Job {} finished: {:?}", job_id, report.state.outcome());
                events.emit(ExecutionEvent::JobFinished {
                    job: job_id.clone(),
                    state: report.state.clone(),
                });
                states.insert(job_id.clone(), report.state.clone());
                reports.insert(job_id, report);
            }
        }

        let jobs: IndexMap<String, JobReport> = order
            .iter()
            .filter_map(|id| reports.remove(id).map(|report| (id.clone(), report)))
            .collect();
        let status = RunResult::overall_status(&jobs, run.is_cancelled());

        info!("Pipeline {} finished: {}", pipeline.name, status);
        events.emit(ExecutionEvent::RunCompleted { run_id, status });

        Ok(PipelineRun {
            result: RunResult {
                run_id,
                pipeline_name: pipeline.name.clone(),
                status,
                started_at,
                completed_at: Utc::now(),
                jobs,
                release: gate.map(|(_, decision)| decision),
            },
            artifacts: store,
        })
    }

    /// Terminal state for a ready job that must not run. Precedence:
    /// upstream dependency, then the release gate, then cancellation.
    fn skip_state(
        &self,
        pipeline: &Pipeline,
        job: &Job,
        states: &HashMap<String, JobState>,
        gate: Option<&(String, GateDecision)>,
        run: &RunContext,
    ) -> Option<JobState> {
        if let Some(state) = self.scheduler.blocked_state(&pipeline.graph, &job.id, states) {
            return Some(state);
        }

        if let Some((gated, GateDecision::Skipped { unmet })) = gate {
            if *gated == job.id {
                return Some(JobState::SkippedGate {
                    reason: unmet.join("; "),
                });
            }
        }

        if run.is_cancelled() {
            return Some(JobState::Cancelled {
                reason: "run cancelled".to_string(),
            });
        }

        None
    }

    /// Fold finished instances into the job report. Outputs come from the
    /// first instance, in expansion order, that set each name.
    fn fan_in(
        &self,
        pipeline: &Pipeline,
        job_id: &str,
        instances: Vec<InstanceReport>,
    ) -> Result<JobReport, PipelineError> {
        let job = pipeline
            .graph
            .job(job_id)
            .ok_or_else(|| PipelineError::Internal(format!("job '{}' vanished from graph", job_id)))?;

        let mut outputs: IndexMap<String, OutputValue> = IndexMap::new();
        for instance in &instances {
            for (name, value) in &instance.outputs {
                outputs.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }

        let state = match JobState::from_instances(&instances) {
            JobState::Succeeded {
                started_at,
                completed_at,
            } => {
                let missing: Vec<&str> = job
                    .outputs
                    .keys()
                    .filter(|name| !outputs.contains_key(*name))
                    .map(String::as_str)
                    .collect();
                if missing.is_empty() {
                    JobState::Succeeded {
                        started_at,
                        completed_at,
                    }
                } else {
                    error!("Job {} finished without setting declared outputs: {:?}", job_id, missing);
                    JobState::Failed {
                        error: format!("declared outputs not set: {}", missing.join(", ")),
                        started_at,
                        completed_at,
                    }
                }
            }
            other => other,
        };
        if job.advisory && state.outcome() == Some(Outcome::Failure) {
            warn!("Advisory job {} failed; dependents are not blocked", job_id);
        }

        Ok(JobReport {
            id: job.id.clone(),
            name: job.name.clone(),
            advisory: job.advisory,
            state,
            instances,
            outputs,
        })
    }
}

/// Report for a job that never ran: every instance takes the job's state
fn never_ran(job: &Job, instances: &[JobInstance], state: JobState) -> JobReport {
    JobReport {
        id: job.id.clone(),
        name: job.name.clone(),
        advisory: job.advisory,
        instances: instances
            .iter()
            .map(|instance| InstanceReport::skipped(instance, state.clone()))
            .collect(),
        state,
        outputs: IndexMap::new(),
    }
}

/// Upstream outputs and artifacts a job consumes
struct ResolvedInputs {
    /// Keyed `job.output`
    outputs: IndexMap<String, OutputValue>,
    artifacts: Vec<Artifact>,
}

/// Resolve a job's declared inputs from finished upstream jobs.
///
/// A missing input keeps the job from running: it is skipped when its
/// producer did not succeed (an advisory producer that failed) and fails
/// when the producer succeeded without publishing it.
async fn resolve_inputs(
    job: &Job,
    reports: &HashMap<String, JobReport>,
    store: &ArtifactStore,
) -> Result<ResolvedInputs, JobState> {
    let unresolved = |producer: &str, reference: String| {
        let succeeded = reports.get(producer).is_some_and(|r| r.state.is_success());
        warn!("Job {} input {} was not produced upstream", job.id, reference);
        if succeeded {
            let now = Utc::now();
            JobState::Failed {
                error: format!("required input '{}' was not produced by '{}'", reference, producer),
                started_at: now,
                completed_at: now,
            }
        } else {
            JobState::SkippedDependency {
                upstream: producer.to_string(),
            }
        }
    };

    let mut outputs = IndexMap::new();
    for input in &job.inputs {
        match reports.get(&input.job).and_then(|r| r.outputs.get(&input.output)) {
            Some(value) => {
                outputs.insert(input.to_string(), value.clone());
            }
            None => return Err(unresolved(&input.job, input.to_string())),
        }
    }

    let mut artifacts = Vec::new();
    for input in &job.artifacts {
        let merged = store.fetch_merged(&input.job, &input.name).await;
        if merged.is_empty() {
            return Err(unresolved(&input.job, input.to_string()));
        }
        debug!("Job {} receives {} copies of {}", job.id, merged.len(), input);
        artifacts.extend(merged);
    }

    Ok(ResolvedInputs { outputs, artifacts })
}

//! Test utilities: a scripted step executor and assertion helpers

#![allow(dead_code)]

use async_trait::async_trait;
use indexmap::IndexMap;
use pipeline_orchestrator::core::{
    Artifact, ExecutionStatus, Outcome, Pipeline, PipelineRun, RunContext, StaticChangeDetector, StepError, TriggerMetadata,
};
use pipeline_orchestrator::execution::{ExecutionEngine, SchedulingStrategy, StepExecutor, StepOutput, StepRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = Arc<dyn Fn(&StepRequest<'_>) -> StepOutput + Send + Sync>;

/// One recorded executor call
#[derive(Debug, Clone)]
pub struct Call {
    pub job: String,
    pub instance: String,
    pub step: String,
    pub env: IndexMap<String, String>,
    /// Upstream artifacts handed to the step
    pub artifacts: Vec<Artifact>,
}

/// Executor whose behaviour is scripted per action. Actions without a
/// script succeed with no outputs.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response to an action
    pub fn on<F>(mut self, run: &str, script: F) -> Self
    where
        F: Fn(&StepRequest<'_>) -> StepOutput + Send + Sync + 'static,
    {
        self.scripts.insert(run.to_string(), Arc::new(script));
        self
    }

    /// Make an action exit non-zero
    pub fn failing(self, run: &str) -> Self {
        self.on(run, |_| StepOutput::failure(1, "scripted failure"))
    }

    /// Delay an action before it responds
    pub fn delayed(mut self, run: &str, delay: Duration) -> Self {
        self.delays.insert(run.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Instance names in call order
    pub fn instances(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.instance).collect()
    }

    pub fn calls_for_job(&self, job: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.job == job).collect()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, request: StepRequest<'_>) -> Result<StepOutput, StepError> {
        self.calls.lock().unwrap().push(Call {
            job: request.job.to_string(),
            instance: request.instance.name.clone(),
            step: request.step.name.clone(),
            env: request.env.clone(),
            artifacts: request.artifacts.to_vec(),
        });

        if let Some(delay) = self.delays.get(&request.step.action.run) {
            tokio::time::sleep(*delay).await;
        }

        Ok(match self.scripts.get(&request.step.action.run) {
            Some(script) => script(&request),
            None => StepOutput::success(),
        })
    }
}

/// Shared handle so tests can inspect calls after the engine consumed the executor
pub struct SharedExecutor(pub Arc<ScriptedExecutor>);

#[async_trait]
impl StepExecutor for SharedExecutor {
    async fn execute(&self, request: StepRequest<'_>) -> Result<StepOutput, StepError> {
        self.0.execute(request).await
    }
}

pub fn push_to_main() -> TriggerMetadata {
    TriggerMetadata::new("push", "main")
}

/// Run a pipeline with a scripted executor and a fixed set of changed paths
pub async fn run_with(
    pipeline: &Pipeline,
    executor: Arc<ScriptedExecutor>,
    ctx: RunContext,
    changed: &[&str],
) -> PipelineRun {
    let strategy = SchedulingStrategy::from_pool_size(pipeline.settings.pool_size);
    let engine = ExecutionEngine::new(SharedExecutor(executor), strategy)
        .with_change_detector(Arc::new(StaticChangeDetector::new(changed.iter().copied())));

    engine
        .execute(pipeline, ctx)
        .await
        .expect("pipeline should be valid")
}

/// Run with a push to main and no changed paths
pub async fn run(pipeline: &Pipeline, executor: Arc<ScriptedExecutor>) -> PipelineRun {
    run_with(pipeline, executor, RunContext::new(push_to_main()), &[]).await
}

pub fn assert_outcome(run: &PipelineRun, job: &str, expected: Outcome) {
    let actual = run.result.outcome(job);
    assert_eq!(
        actual,
        Some(expected),
        "job '{}' expected {:?}, got {:?}",
        job,
        expected,
        run.result.job(job).map(|j| &j.state)
    );
}

pub fn assert_status(run: &PipelineRun, expected: ExecutionStatus) {
    assert_eq!(run.result.status, expected, "jobs: {:#?}", run.result.instance_outcomes());
}

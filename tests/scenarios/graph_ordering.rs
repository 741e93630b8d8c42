//! Test: job graph ordering, cycles and output hand-off

use crate::helpers::*;
use pipeline_orchestrator::core::{
    ExecutionStatus, Job, OutputType, OutputValue, Outcome, Pipeline, PipelineError, RunContext, Step,
};
use pipeline_orchestrator::execution::{ExecutionEngine, SchedulingStrategy, StepOutput};
use std::sync::Arc;

fn diamond() -> Pipeline {
    let mut pipeline = Pipeline::new("diamond");
    pipeline.submit(Job::new("lint").step(Step::new("check", "lint"))).unwrap();
    pipeline.submit(Job::new("unit").needs("lint").step(Step::new("test", "unit"))).unwrap();
    pipeline.submit(Job::new("docs").needs("lint").step(Step::new("build", "docs"))).unwrap();
    pipeline
        .submit(Job::new("bundle").needs("unit").needs("docs").step(Step::new("pack", "bundle")))
        .unwrap();
    pipeline
}

/// Every job starts only after all of its upstream jobs finished
#[tokio::test]
async fn test_diamond_respects_dependencies() {
    let executor = Arc::new(ScriptedExecutor::new());
    let run = run(&diamond(), executor.clone()).await;

    assert_status(&run, ExecutionStatus::Completed);

    let order = executor.instances();
    assert_eq!(order.len(), 4);
    assert_eq!(order.first().map(String::as_str), Some("lint"));
    assert_eq!(order.last().map(String::as_str), Some("bundle"));

    // Reported jobs follow the topological order
    let reported: Vec<&str> = run.result.jobs.keys().map(String::as_str).collect();
    assert_eq!(reported[0], "lint");
    assert_eq!(reported[3], "bundle");
}

/// A cyclic definition is rejected before any step executes
#[tokio::test]
async fn test_cycle_is_rejected_before_execution() {
    let mut pipeline = Pipeline::new("cyclic");
    pipeline.submit(Job::new("a").needs("c").step(Step::new("s", "a"))).unwrap();
    pipeline.submit(Job::new("b").needs("a").step(Step::new("s", "b"))).unwrap();
    pipeline.submit(Job::new("c").needs("b").step(Step::new("s", "c"))).unwrap();

    let executor = Arc::new(ScriptedExecutor::new());
    let engine = ExecutionEngine::new(SharedExecutor(executor.clone()), SchedulingStrategy::Parallel);
    let err = engine
        .execute(&pipeline, RunContext::new(push_to_main()))
        .await
        .unwrap_err();

    match err {
        PipelineError::Cycle { path } => {
            assert!(path.contains(&"a".to_string()));
            assert!(path.contains(&"c".to_string()));
        }
        other => panic!("expected a cycle error, got {}", other),
    }
    assert!(executor.calls().is_empty());
}

#[test]
fn test_unknown_dependency_is_rejected() {
    let mut pipeline = Pipeline::new("broken");
    pipeline.submit(Job::new("deploy").needs("build").step(Step::new("s", "deploy"))).unwrap();

    assert!(matches!(
        pipeline.validate(),
        Err(PipelineError::UnknownDependency { .. })
    ));
}

/// Declared outputs reach consumers as typed inputs and as environment
#[tokio::test]
async fn test_outputs_flow_to_dependents() {
    let mut pipeline = Pipeline::new("versioned");
    pipeline
        .submit(
            Job::new("build")
                .output("version", OutputType::String)
                .step(Step::new("stamp", "stamp")),
        )
        .unwrap();
    pipeline
        .submit(
            Job::new("package")
                .needs("build")
                .input("build", "version")
                .step(Step::new("pack", "pack")),
        )
        .unwrap();

    let executor = Arc::new(
        ScriptedExecutor::new().on("stamp", |_| StepOutput::success().with_output("version", "1.4.0")),
    );
    let run = run(&pipeline, executor.clone()).await;

    assert_outcome(&run, "package", Outcome::Success);
    assert_eq!(
        run.result.output("build", "version"),
        Some(&OutputValue::String("1.4.0".to_string()))
    );

    let pack = executor.calls_for_job("package");
    assert_eq!(pack[0].env.get("INPUT_BUILD_VERSION").map(String::as_str), Some("1.4.0"));
}

//! Test: cancellation and step time limits

use crate::helpers::*;
use pipeline_orchestrator::core::{ExecutionStatus, Job, Outcome, Pipeline, RunContext, Step, StepStatus};
use pipeline_orchestrator::execution::StepOutput;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn two_stage() -> Pipeline {
    let mut pipeline = Pipeline::new("ci");
    pipeline
        .submit(
            Job::new("build")
                .step(Step::new("compile", "compile"))
                .step(Step::new("archive", "archive")),
        )
        .unwrap();
    pipeline.submit(Job::new("deploy").needs("build").step(Step::new("ship", "ship"))).unwrap();
    pipeline
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let ctx = RunContext::new(push_to_main());
    ctx.cancel();

    let executor = Arc::new(ScriptedExecutor::new());
    let run = run_with(&two_stage(), executor.clone(), ctx, &[]).await;

    assert_status(&run, ExecutionStatus::Cancelled);
    assert_outcome(&run, "build", Outcome::Cancelled);
    assert_outcome(&run, "deploy", Outcome::Cancelled);
    assert!(executor.calls().is_empty());
}

/// Cancellation lands at the next step boundary; the running step finishes
#[tokio::test]
async fn test_cancellation_stops_at_step_boundary() {
    let ctx = RunContext::new(push_to_main());
    let flag = ctx.cancellation_flag();

    let executor = Arc::new(ScriptedExecutor::new().on("compile", move |_| {
        flag.store(true, Ordering::SeqCst);
        StepOutput::success()
    }));
    let run = run_with(&two_stage(), executor.clone(), ctx, &[]).await;

    assert_status(&run, ExecutionStatus::Cancelled);
    assert_outcome(&run, "build", Outcome::Cancelled);
    assert_outcome(&run, "deploy", Outcome::Cancelled);

    let steps = &run.result.job("build").unwrap().instances[0].steps;
    assert_eq!(steps[0].status, StepStatus::Succeeded);
    assert_eq!(steps[1].status, StepStatus::NotRun);
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn test_step_exceeding_time_limit_fails() {
    let mut pipeline = Pipeline::new("slow");
    pipeline
        .submit(Job::new("integration").step(Step::new("suite", "suite").with_timeout(0)))
        .unwrap();

    let executor = Arc::new(ScriptedExecutor::new().delayed("suite", Duration::from_secs(5)));
    let run = run(&pipeline, executor).await;

    assert_outcome(&run, "integration", Outcome::Failure);
    let steps = &run.result.job("integration").unwrap().instances[0].steps;
    assert_eq!(
        steps[0].status,
        StepStatus::Failed {
            error: "timed out after 0 seconds".to_string()
        }
    );
}

/// A required job that failed before the cancellation still fails the run
#[tokio::test]
async fn test_failure_outranks_cancellation() {
    let ctx = RunContext::new(push_to_main());
    let flag = ctx.cancellation_flag();

    let executor = Arc::new(ScriptedExecutor::new().on("compile", move |_| {
        flag.store(true, Ordering::SeqCst);
        StepOutput::failure(2, "linker error")
    }));
    let run = run_with(&two_stage(), executor, ctx, &[]).await;

    assert_status(&run, ExecutionStatus::Failed);
    assert_outcome(&run, "build", Outcome::Failure);
    assert_outcome(&run, "deploy", Outcome::SkippedDependency);
}

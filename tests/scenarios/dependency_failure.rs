//! Test: failure propagation along dependencies and fail-fast matrices

use crate::helpers::*;
use pipeline_orchestrator::core::{ExecutionStatus, Job, JobState, Outcome, Pipeline, Step, StepStatus};
use pipeline_orchestrator::execution::StepOutput;
use std::sync::Arc;

/// A failed job skips every transitive dependent; unrelated jobs still run
#[tokio::test]
async fn test_failure_skips_transitive_dependents() {
    let mut pipeline = Pipeline::new("ci");
    pipeline.submit(Job::new("build").step(Step::new("compile", "compile"))).unwrap();
    pipeline.submit(Job::new("test").needs("build").step(Step::new("pytest", "pytest"))).unwrap();
    pipeline.submit(Job::new("publish").needs("test").step(Step::new("upload", "upload"))).unwrap();
    pipeline.submit(Job::new("docs").step(Step::new("sphinx", "sphinx"))).unwrap();

    let executor = Arc::new(ScriptedExecutor::new().failing("compile"));
    let run = run(&pipeline, executor.clone()).await;

    assert_status(&run, ExecutionStatus::Failed);
    assert_outcome(&run, "build", Outcome::Failure);
    assert_outcome(&run, "test", Outcome::SkippedDependency);
    assert_outcome(&run, "publish", Outcome::SkippedDependency);
    assert_outcome(&run, "docs", Outcome::Success);

    assert_eq!(
        run.result.job("test").unwrap().state,
        JobState::SkippedDependency {
            upstream: "build".to_string()
        }
    );
    assert!(executor.calls_for_job("test").is_empty());
    assert!(executor.calls_for_job("publish").is_empty());
}

/// Steps after the failing one are not run
#[tokio::test]
async fn test_steps_after_failure_are_not_run() {
    let mut pipeline = Pipeline::new("ci");
    pipeline
        .submit(
            Job::new("build")
                .step(Step::new("deps", "deps"))
                .step(Step::new("compile", "compile"))
                .step(Step::new("archive", "archive")),
        )
        .unwrap();

    let executor = Arc::new(
        ScriptedExecutor::new().on("compile", |_| StepOutput::failure(2, "error: missing header\n")),
    );
    let run = run(&pipeline, executor.clone()).await;

    let steps = &run.result.job("build").unwrap().instances[0].steps;
    assert_eq!(steps[0].status, StepStatus::Succeeded);
    assert_eq!(
        steps[1].status,
        StepStatus::Failed {
            error: "exited with code 2: error: missing header".to_string()
        }
    );
    assert_eq!(steps[2].status, StepStatus::NotRun);
    assert_eq!(executor.calls().len(), 2);
}

fn matrix_pipeline(fail_fast: bool) -> Pipeline {
    let mut job = Job::new("validate")
        .axis("python", ["3.11", "3.12", "3.13"])
        .step(Step::new("pytest", "pytest"));
    if fail_fast {
        job = job.fail_fast();
    }

    let mut pipeline = Pipeline::new("matrix");
    pipeline.submit(job).unwrap();
    // One worker so instances run in expansion order
    pipeline.settings.pool_size = Some(1);
    pipeline
}

fn first_instance_fails() -> ScriptedExecutor {
    ScriptedExecutor::new().on("pytest", |request| {
        if request.instance.index == 0 {
            StepOutput::failure(1, "collection error")
        } else {
            StepOutput::success()
        }
    })
}

#[tokio::test]
async fn test_fail_fast_stops_pending_siblings() {
    let executor = Arc::new(first_instance_fails());
    let run = run(&matrix_pipeline(true), executor.clone()).await;

    assert_outcome(&run, "validate", Outcome::Failure);
    assert_eq!(executor.calls().len(), 1);

    let instances = &run.result.job("validate").unwrap().instances;
    assert_eq!(instances[0].state.outcome(), Some(Outcome::Failure));
    assert_eq!(instances[1].state.outcome(), Some(Outcome::Cancelled));
    assert_eq!(instances[2].state.outcome(), Some(Outcome::Cancelled));
}

#[tokio::test]
async fn test_without_fail_fast_siblings_complete() {
    let executor = Arc::new(first_instance_fails());
    let run = run(&matrix_pipeline(false), executor.clone()).await;

    assert_outcome(&run, "validate", Outcome::Failure);
    assert_eq!(executor.calls().len(), 3);

    let instances = &run.result.job("validate").unwrap().instances;
    assert!(instances[1].state.is_success());
    assert!(instances[2].state.is_success());
}

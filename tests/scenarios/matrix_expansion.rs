//! Test: matrix expansion into independent instances

use crate::helpers::*;
use pipeline_orchestrator::core::{ExecutionStatus, Job, MatrixExpander, Outcome, Pipeline, Step};
use std::collections::HashSet;
use std::sync::Arc;

/// A 2x3 matrix runs six distinct instances, each exactly once
#[tokio::test]
async fn test_two_by_three_matrix_runs_six_instances() {
    let mut pipeline = Pipeline::new("matrix");
    pipeline
        .submit(
            Job::new("validate")
                .axis("os", ["linux", "windows"])
                .axis("python", ["3.10", "3.11", "3.12"])
                .step(Step::new("pytest", "pytest")),
        )
        .unwrap();

    let executor = Arc::new(ScriptedExecutor::new());
    let run = run(&pipeline, executor.clone()).await;

    assert_status(&run, ExecutionStatus::Completed);

    let calls = executor.calls();
    assert_eq!(calls.len(), 6);

    let tuples: HashSet<(String, String)> = calls
        .iter()
        .map(|c| (c.env["MATRIX_OS"].clone(), c.env["MATRIX_PYTHON"].clone()))
        .collect();
    assert_eq!(tuples.len(), 6);
    assert!(tuples.contains(&("windows".to_string(), "3.11".to_string())));

    let report = run.result.job("validate").unwrap();
    assert_eq!(report.instances.len(), 6);
    assert!(report.instances.iter().all(|i| i.state.is_success()));
}

/// A job without axes is a single instance named after the job
#[tokio::test]
async fn test_job_without_axes_runs_once() {
    let mut pipeline = Pipeline::new("single");
    pipeline.submit(Job::new("build").step(Step::new("compile", "compile"))).unwrap();

    let executor = Arc::new(ScriptedExecutor::new());
    let run = run(&pipeline, executor.clone()).await;

    assert_outcome(&run, "build", Outcome::Success);
    assert_eq!(executor.instances(), vec!["build"]);
    assert!(!executor.calls()[0].env.keys().any(|k| k.starts_with("MATRIX_")));
}

#[test]
fn test_instance_names_are_stable() {
    let job = Job::new("validate").axis("os", ["linux", "windows"]).axis("python", ["3.11", "3.12"]);

    let first: Vec<String> = MatrixExpander::expand(&job).into_iter().map(|i| i.name).collect();
    let second: Vec<String> = MatrixExpander::expand(&job).into_iter().map(|i| i.name).collect();

    assert_eq!(first, second);
    assert_eq!(first[0], "validate (os=linux, python=3.11)");
    assert_eq!(first[3], "validate (os=windows, python=3.12)");
}

/// One failing instance fails the job; the others still run to completion
#[tokio::test]
async fn test_failing_instance_fails_job_without_stopping_siblings() {
    let mut pipeline = Pipeline::new("matrix");
    pipeline
        .submit(
            Job::new("validate")
                .axis("python", ["3.11", "3.12", "3.13"])
                .step(Step::new("pytest", "pytest"))
                .step(Step::new("report", "report")),
        )
        .unwrap();

    let executor = Arc::new(ScriptedExecutor::new().on("pytest", |request| {
        if request.instance.values["python"] == "3.13" {
            pipeline_orchestrator::execution::StepOutput::failure(1, "2 tests failed")
        } else {
            pipeline_orchestrator::execution::StepOutput::success()
        }
    }));
    let run = run(&pipeline, executor.clone()).await;

    assert_status(&run, ExecutionStatus::Failed);
    assert_outcome(&run, "validate", Outcome::Failure);

    // Both healthy instances ran both steps, the failing one stopped after pytest
    assert_eq!(executor.calls().iter().filter(|c| c.step == "report").count(), 2);

    let outcomes: Vec<Outcome> = run.result.job("validate").unwrap()
        .instances
        .iter()
        .filter_map(|i| i.state.outcome())
        .collect();
    assert_eq!(outcomes, vec![Outcome::Success, Outcome::Success, Outcome::Failure]);
}

//! Test: coverage artifacts fanned in from matrix instances

use crate::helpers::*;
use pipeline_orchestrator::core::{
    CoverageReport, CoverageSpec, ExecutionStatus, Job, OutputValue, Outcome, Pipeline, Step,
};
use pipeline_orchestrator::execution::StepOutput;
use std::sync::Arc;

/// Each shard covers its own line of `pkg/core.py`; line 3 is never hit
fn shard_report(shard: &str) -> Vec<u8> {
    let mut report = CoverageReport::default();
    match shard {
        "a" => {
            report.record("pkg/core.py", 1, 4);
            report.record("pkg/core.py", 2, 0);
        }
        _ => {
            report.record("pkg/core.py", 2, 1);
            report.record("pkg/core.py", 3, 0);
        }
    }
    report.to_json().unwrap()
}

fn coverage_pipeline(shards: [&str; 2], advisory: bool) -> Pipeline {
    let mut pipeline = Pipeline::new("coverage");
    pipeline
        .submit(
            Job::new("test")
                .axis("shard", shards)
                .step(Step::new("pytest", "pytest").publishes("coverage", ".coverage")),
        )
        .unwrap();

    let mut coverage = Job::coverage("coverage", CoverageSpec::new("test", "coverage"));
    if advisory {
        coverage = coverage.advisory();
    }
    pipeline.submit(coverage).unwrap();
    pipeline
        .submit(Job::new("package").needs("coverage").step(Step::new("build", "build")))
        .unwrap();
    pipeline
}

fn publishing_executor() -> ScriptedExecutor {
    ScriptedExecutor::new().on("pytest", |request| {
        let shard = request.instance.values["shard"].clone();
        StepOutput::success().with_artifact("coverage", shard_report(&shard))
    })
}

#[tokio::test]
async fn test_coverage_is_merged_across_instances() {
    let run = run(&coverage_pipeline(["a", "b"], false), Arc::new(publishing_executor())).await;

    assert_status(&run, ExecutionStatus::Completed);
    assert_outcome(&run, "coverage", Outcome::Success);

    // Lines 1 and 2 are hit by some shard, line 3 by none
    let percent = run.result.output("coverage", "coverage").and_then(OutputValue::as_f64).unwrap();
    assert!((percent - 200.0 / 3.0).abs() < 1e-9, "got {}", percent);

    let merged = run.artifacts.fetch("coverage", "coverage", "coverage-report").await.unwrap();
    let report = CoverageReport::from_json(&merged.data).unwrap();
    assert_eq!(report.files["pkg/core.py"].lines[&2], 1);
    assert_eq!(report.files["pkg/core.py"].lines[&1], 4);
}

/// The merged report does not depend on instance order
#[tokio::test]
async fn test_merged_report_is_order_independent() {
    let forward = run(&coverage_pipeline(["a", "b"], false), Arc::new(publishing_executor())).await;
    let reverse = run(&coverage_pipeline(["b", "a"], false), Arc::new(publishing_executor())).await;

    let digest = |run: &pipeline_orchestrator::core::PipelineRun| {
        run.result.job("coverage").unwrap().instances[0].artifacts[0].digest.clone()
    };
    assert_eq!(digest(&forward), digest(&reverse));
    assert_eq!(
        forward.result.output("coverage", "coverage"),
        reverse.result.output("coverage", "coverage")
    );
}

/// No published coverage fails the aggregating job only
#[tokio::test]
async fn test_missing_coverage_fails_aggregation() {
    let run = run(&coverage_pipeline(["a", "b"], false), Arc::new(ScriptedExecutor::new())).await;

    assert_outcome(&run, "test", Outcome::Success);
    assert_outcome(&run, "coverage", Outcome::Failure);
    assert_outcome(&run, "package", Outcome::SkippedDependency);
    assert_status(&run, ExecutionStatus::Failed);
}

/// An advisory coverage job reports its failure but blocks nothing
#[tokio::test]
async fn test_advisory_coverage_failure_does_not_block() {
    let run = run(&coverage_pipeline(["a", "b"], true), Arc::new(ScriptedExecutor::new())).await;

    assert_outcome(&run, "coverage", Outcome::Failure);
    assert_outcome(&run, "package", Outcome::Success);
    assert_status(&run, ExecutionStatus::Completed);
}

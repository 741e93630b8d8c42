//! Test: the release gate and optional credentialed steps

use crate::helpers::*;
use pipeline_orchestrator::core::{
    ExecutionStatus, GateDecision, Job, Outcome, PathFilter, Pipeline, ReleaseGate, RunContext, StaticSecretProvider,
    Step, StepStatus, TriggerMetadata,
};
use std::sync::Arc;

fn gated_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new("release");
    pipeline.submit(Job::new("build").step(Step::new("wheel", "wheel"))).unwrap();
    pipeline
        .submit(
            Job::new("release")
                .needs("build")
                .step(Step::new("sign", "sign").requires_secret("SIGNING_KEY"))
                .step(Step::new("upload", "upload")),
        )
        .unwrap();
    pipeline.submit(Job::new("announce").needs("release").step(Step::new("post", "post"))).unwrap();

    let paths = PathFilter::new(&["src/**", "pyproject.toml"]).unwrap();
    pipeline.with_release(ReleaseGate::new("release", "push", "main", paths))
}

/// The release runs only for a push to main that touched watched paths
#[tokio::test]
async fn test_gate_truth_table() {
    for event in ["push", "pull_request"] {
        for branch in ["main", "feature/x"] {
            for changed in [&["src/pkg/core.py"][..], &["docs/index.md"][..]] {
                let ctx = RunContext::new(TriggerMetadata::new(event, branch));
                let executor = Arc::new(ScriptedExecutor::new());
                let run = run_with(&gated_pipeline(), executor.clone(), ctx, changed).await;

                let expected = event == "push" && branch == "main" && changed[0].starts_with("src/");
                let case = format!("{} on {} touching {:?}", event, branch, changed);

                assert_eq!(
                    run.result.release.as_ref().map(GateDecision::is_eligible),
                    Some(expected),
                    "{}",
                    case
                );
                assert_eq!(
                    !executor.calls_for_job("release").is_empty(),
                    expected,
                    "{}",
                    case
                );
                // A closed gate is never a failure
                assert_eq!(run.result.status, ExecutionStatus::Completed, "{}", case);
            }
        }
    }
}

/// Dependents of a gated-off release are skipped by the gate, not failed
#[tokio::test]
async fn test_closed_gate_skips_dependents() {
    let ctx = RunContext::new(TriggerMetadata::new("pull_request", "main"));
    let executor = Arc::new(ScriptedExecutor::new());
    let run = run_with(&gated_pipeline(), executor.clone(), ctx, &["src/pkg/core.py"]).await;

    assert_outcome(&run, "build", Outcome::Success);
    assert_outcome(&run, "release", Outcome::SkippedGate);
    assert_outcome(&run, "announce", Outcome::SkippedGate);
    assert_eq!(executor.instances(), vec!["build"]);

    match &run.result.release {
        Some(GateDecision::Skipped { unmet }) => {
            assert_eq!(unmet.len(), 1);
            assert!(unmet[0].contains("pull_request"));
        }
        other => panic!("expected a closed gate, got {:?}", other),
    }
}

/// Without a signing credential the release still succeeds, unsigned
#[tokio::test]
async fn test_release_without_credential_is_unsigned() {
    let executor = Arc::new(ScriptedExecutor::new());
    let run = run_with(
        &gated_pipeline(),
        executor.clone(),
        RunContext::new(push_to_main()),
        &["pyproject.toml"],
    )
    .await;

    assert_outcome(&run, "release", Outcome::Success);
    assert_outcome(&run, "announce", Outcome::Success);

    let steps: Vec<String> = executor.calls_for_job("release").into_iter().map(|c| c.step).collect();
    assert_eq!(steps, vec!["upload"]);

    let report = &run.result.job("release").unwrap().instances[0].steps;
    assert!(matches!(report[0].status, StepStatus::Skipped { .. }));
    assert_eq!(report[1].status, StepStatus::Succeeded);
}

/// A supplied credential runs the signing step and reaches its environment
#[tokio::test]
async fn test_release_with_credential_is_signed() {
    let secrets = StaticSecretProvider::new().with("SIGNING_KEY", "-----BEGIN KEY-----");
    let ctx = RunContext::new(push_to_main()).with_secrets(Arc::new(secrets));

    let executor = Arc::new(ScriptedExecutor::new());
    let run = run_with(&gated_pipeline(), executor.clone(), ctx, &["src/pkg/__init__.py"]).await;

    assert_outcome(&run, "release", Outcome::Success);

    let calls = executor.calls_for_job("release");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].step, "sign");
    assert_eq!(calls[0].env.get("SIGNING_KEY").map(String::as_str), Some("-----BEGIN KEY-----"));
    assert!(!calls[1].env.contains_key("SIGNING_KEY"));
}

/// Event and branch alone never open the gate: a change under watched paths
/// is always required, and an empty filter watches nothing
#[tokio::test]
async fn test_gate_without_watched_paths_stays_closed() {
    let mut pipeline = Pipeline::new("release");
    pipeline.submit(Job::new("release").step(Step::new("upload", "upload"))).unwrap();
    let pipeline = pipeline.with_release(ReleaseGate::new("release", "push", "main", PathFilter::default()));

    let executor = Arc::new(ScriptedExecutor::new());
    let run = run_with(&pipeline, executor.clone(), RunContext::new(push_to_main()), &["src/pkg/core.py"]).await;

    assert_ne!(run.result.release, Some(GateDecision::Eligible));
    assert_outcome(&run, "release", Outcome::SkippedGate);
    assert!(executor.calls().is_empty());
}

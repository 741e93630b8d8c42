//! Test: artifacts handed from producing jobs to the jobs that declare them

use crate::helpers::*;
use pipeline_orchestrator::core::config::PipelineConfig;
use pipeline_orchestrator::core::{ExecutionStatus, Job, JobState, Outcome, Pipeline, PipelineError, Step};
use pipeline_orchestrator::execution::StepOutput;
use std::sync::Arc;

fn build_and_release() -> Pipeline {
    let mut pipeline = Pipeline::new("ci");
    pipeline
        .submit(Job::new("build").step(Step::new("build", "build").publishes("dist", "dist/pkg.tar.gz")))
        .unwrap();
    pipeline.submit(Job::new("test").needs("build").step(Step::new("test", "test"))).unwrap();
    pipeline
        .submit(
            Job::new("release")
                .needs("test")
                .artifact("build", "dist")
                .step(Step::new("upload", "upload")),
        )
        .unwrap();
    pipeline
}

#[tokio::test]
async fn test_release_receives_built_distribution() {
    let executor = Arc::new(
        ScriptedExecutor::new().on("build", |_| StepOutput::success().with_artifact("dist", b"pkg-1.0".to_vec())),
    );
    let run = run(&build_and_release(), executor.clone()).await;

    assert_status(&run, ExecutionStatus::Completed);

    let upload = executor.calls_for_job("release");
    assert_eq!(upload.len(), 1);
    let artifacts = &upload[0].artifacts;
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].reference.job, "build");
    assert_eq!(artifacts[0].reference.name, "dist");
    assert_eq!(&artifacts[0].data[..], b"pkg-1.0");

    // Jobs that did not declare the artifact do not receive it
    assert!(executor.calls_for_job("test")[0].artifacts.is_empty());
}

#[tokio::test]
async fn test_matrix_artifacts_arrive_merged() {
    let mut pipeline = Pipeline::new("wheels");
    pipeline
        .submit(
            Job::new("wheel")
                .axis("os", ["linux", "macos", "windows"])
                .step(Step::new("build", "build-wheel").publishes("wheel", "dist/pkg.whl")),
        )
        .unwrap();
    pipeline
        .submit(
            Job::new("publish")
                .needs("wheel")
                .artifact("wheel", "wheel")
                .step(Step::new("upload", "upload")),
        )
        .unwrap();

    let executor = Arc::new(ScriptedExecutor::new().on("build-wheel", |request| {
        let os = request.instance.values["os"].clone();
        StepOutput::success().with_artifact("wheel", os.into_bytes())
    }));
    let run = run(&pipeline, executor.clone()).await;

    assert_status(&run, ExecutionStatus::Completed);
    let received: Vec<Vec<u8>> = executor.calls_for_job("publish")[0]
        .artifacts
        .iter()
        .map(|a| a.data.to_vec())
        .collect();
    assert_eq!(received, vec![b"linux".to_vec(), b"macos".to_vec(), b"windows".to_vec()]);
}

#[tokio::test]
async fn test_unpublished_artifact_fails_consumer_without_running_it() {
    let executor = Arc::new(ScriptedExecutor::new());
    let run = run(&build_and_release(), executor.clone()).await;

    assert_status(&run, ExecutionStatus::Failed);
    assert_outcome(&run, "build", Outcome::Success);
    match &run.result.job("release").unwrap().state {
        JobState::Failed { error, .. } => {
            assert_eq!(error, "required input 'build.dist' was not produced by 'build'")
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(executor.calls_for_job("release").is_empty());
}

#[test]
fn test_artifact_contract_checked_at_load() {
    let yaml = r#"
name: broken
jobs:
  - id: build
    steps:
      - name: build
        run: make
        publish:
          dist: dist/pkg.tar.gz
  - id: release
    needs: [build]
    artifacts: [build.sdist]
    steps:
      - name: upload
        run: twine upload
"#;
    assert!(matches!(
        PipelineConfig::from_yaml(yaml),
        Err(PipelineError::Contract { input, .. }) if input == "build.sdist"
    ));
}

/// Real shell steps: the consumer reads the artifact from `$PIPELINE_ARTIFACTS`,
/// not from the producer's working files
#[cfg(unix)]
#[tokio::test]
async fn test_shell_consumer_reads_artifact_from_store() {
    use pipeline_orchestrator::core::RunContext;
    use pipeline_orchestrator::execution::{ExecutionEngine, SchedulingStrategy, ShellExecutor};

    let workdir = std::env::temp_dir().join(format!("pipeline-artifacts-e2e-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&workdir).unwrap();

    let yaml = r#"
name: shell-artifacts
jobs:
  - id: build
    steps:
      - name: build
        run: mkdir -p dist && printf 'sdist' > dist/pkg.tar.gz
        publish:
          dist: dist/pkg.tar.gz
      - name: clean
        run: rm -rf dist
  - id: release
    needs: [build]
    artifacts: [build.dist]
    steps:
      - name: verify
        run: test ! -e dist && test "$(cat "$PIPELINE_ARTIFACTS/build/dist/build")" = sdist
"#;
    let pipeline = PipelineConfig::from_yaml(yaml).unwrap().to_pipeline().unwrap();
    let engine = ExecutionEngine::new(ShellExecutor::new(&workdir), SchedulingStrategy::Parallel);
    let run = engine.execute(&pipeline, RunContext::new(push_to_main())).await.unwrap();

    assert_status(&run, ExecutionStatus::Completed);
    assert_outcome(&run, "release", Outcome::Success);

    let _ = std::fs::remove_dir_all(&workdir);
}

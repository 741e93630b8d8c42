//! Shell step executor - runs step actions with `sh -c`

use crate::core::{artifact::Artifact, context::env_key, error::StepError};
use crate::execution::runner::{ProducedArtifact, StepExecutor, StepOutput, StepRequest};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Runs each step's `run` line in a shell.
///
/// The step sees its merged environment plus:
/// - `WITH_<KEY>` for every action parameter
/// - `PIPELINE_JOB` and `PIPELINE_INSTANCE`
/// - `PIPELINE_OUTPUT`, a file the step may append `name=value` lines to
/// - `PIPELINE_ARTIFACTS`, a directory holding the job's upstream artifacts
///   as `<job>/<artifact>/<producing instance>`
///
/// Declared `publish` paths are read (relative to the working directory)
/// after the command succeeds.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    workdir: PathBuf,
    shell: String,
}

impl ShellExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(&self, request: StepRequest<'_>) -> Result<StepOutput, StepError> {
        let output_file = std::env::temp_dir().join(format!("pipeline-output-{}", Uuid::new_v4()));
        let artifact_dir = std::env::temp_dir().join(format!("pipeline-artifacts-{}", Uuid::new_v4()));
        debug!("Running step {} of {}: {}", request.step.name, request.instance.name, request.step.action.run);

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&request.step.action.run)
            .current_dir(&self.workdir)
            .envs(request.env.iter())
            .env("PIPELINE_JOB", request.job)
            .env("PIPELINE_INSTANCE", &request.instance.name)
            .env("PIPELINE_OUTPUT", &output_file)
            .env("PIPELINE_ARTIFACTS", &artifact_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &request.step.action.with {
            command.env(format!("WITH_{}", env_key(key)), value);
        }

        let output = match materialize(&artifact_dir, request.artifacts).await {
            Ok(()) => command
                .output()
                .await
                .map_err(|e| StepError::Executor(format!("failed to spawn '{}': {}", self.shell, e))),
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_dir_all(&artifact_dir).await;
        let output = output?;

        let outputs = match tokio::fs::read_to_string(&output_file).await {
            Ok(content) => parse_output_file(&content),
            Err(_) => IndexMap::new(),
        };
        let _ = tokio::fs::remove_file(&output_file).await;

        let mut result = StepOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            artifacts: Vec::new(),
            outputs,
        };

        if result.exit_code == 0 {
            for (name, path) in &request.step.publish {
                let data = tokio::fs::read(self.workdir.join(path)).await.map_err(|e| {
                    StepError::Executor(format!("artifact '{}' not found at {}: {}", name, path, e))
                })?;
                result.artifacts.push(ProducedArtifact {
                    name: name.clone(),
                    data,
                });
            }
        }

        Ok(result)
    }
}

/// Write upstream artifacts under `dir` as `<job>/<artifact>/<instance>`
async fn materialize(dir: &Path, artifacts: &[Artifact]) -> Result<(), StepError> {
    let io_error = |path: &Path, e: std::io::Error| {
        StepError::Executor(format!("failed to write artifact to {}: {}", path.display(), e))
    };

    tokio::fs::create_dir_all(dir).await.map_err(|e| io_error(dir, e))?;
    for artifact in artifacts {
        let reference = &artifact.reference;
        let parent = dir.join(path_slug(&reference.job)).join(path_slug(&reference.name));
        tokio::fs::create_dir_all(&parent).await.map_err(|e| io_error(&parent, e))?;

        let path = parent.join(path_slug(&reference.instance));
        tokio::fs::write(&path, &artifact.data[..]).await.map_err(|e| io_error(&path, e))?;
    }

    Ok(())
}

/// Turn a name like `validate (os=A, py=1)` into one path component,
/// `validate-os-A-py-1`
fn path_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Parse `name=value` lines; later lines override earlier ones
fn parse_output_file(content: &str) -> IndexMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

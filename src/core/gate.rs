//! Release gate: decides whether the terminal release job runs at all

use crate::core::{config::ReleaseConfig, error::PipelineError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

/// Commit range of the triggering change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRange {
    /// Base revision; empty means "the head commit on its own"
    pub base: String,
    pub head: String,
}

/// Metadata of the event that triggered the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMetadata {
    /// Event type, e.g. `push` or `pull_request`
    pub event: String,
    pub branch: String,
    #[serde(default)]
    pub commit_range: CommitRange,
}

impl TriggerMetadata {
    pub fn new(event: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            branch: branch.into(),
            commit_range: CommitRange::default(),
        }
    }

    pub fn with_range(mut self, base: impl Into<String>, head: impl Into<String>) -> Self {
        self.commit_range = CommitRange {
            base: base.into(),
            head: head.into(),
        };
        self
    }
}

/// Ordered glob filters over repository paths. Entries starting with `!`
/// exclude; the last pattern matching a path decides whether it counts.
/// `**` crosses directories, `*` and `?` do not.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    patterns: Vec<(bool, Pattern, String)>,
}

const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl PathFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PipelineError> {
        let patterns = patterns
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                let (include, glob) = match raw.strip_prefix('!') {
                    Some(rest) => (false, rest),
                    None => (true, raw),
                };
                let pattern = Pattern::new(glob).map_err(|source| PipelineError::PathFilter {
                    pattern: raw.to_string(),
                    source,
                })?;
                Ok((include, pattern, raw.to_string()))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> Vec<&str> {
        self.patterns.iter().map(|(_, _, raw)| raw.as_str()).collect()
    }

    /// Whether a single path is selected by the filter
    pub fn matches(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .filter(|(_, pattern, _)| pattern.matches_with(path, PATH_MATCH))
            .last()
            .map(|(include, _, _)| *include)
            .unwrap_or(false)
    }

    /// Whether any of the changed paths is selected
    pub fn matches_any<S: AsRef<str>>(&self, paths: &[S]) -> bool {
        paths.iter().any(|p| self.matches(p.as_ref()))
    }
}

/// Change-detection predicate over a commit range
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    async fn has_changes(&self, filter: &PathFilter, range: &CommitRange) -> Result<bool>;
}

/// Change detection over a fixed list of changed paths
#[derive(Debug, Clone, Default)]
pub struct StaticChangeDetector {
    changed: Vec<String>,
}

impl StaticChangeDetector {
    pub fn new<I, S>(changed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            changed: changed.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ChangeDetector for StaticChangeDetector {
    async fn has_changes(&self, filter: &PathFilter, _range: &CommitRange) -> Result<bool> {
        Ok(filter.matches_any(&self.changed))
    }
}

/// Change detection by diffing the commit range with `git`
#[derive(Debug, Clone)]
pub struct GitChangeDetector {
    repo: PathBuf,
}

impl GitChangeDetector {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    async fn changed_paths(&self, range: &CommitRange) -> Result<Vec<String>> {
        let head = if range.head.is_empty() { "HEAD" } else { range.head.as_str() };

        let mut command = Command::new("git");
        command.current_dir(&self.repo);
        if range.base.is_empty() {
            command.args(["diff-tree", "--no-commit-id", "--name-only", "-r", head]);
        } else {
            command.args(["diff", "--name-only", range.base.as_str(), head]);
        }

        let output = command
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run git")?;

        if !output.status.success() {
            anyhow::bail!(
                "git exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("git produced non-UTF-8 output")?;
        Ok(stdout.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }
}

#[async_trait]
impl ChangeDetector for GitChangeDetector {
    async fn has_changes(&self, filter: &PathFilter, range: &CommitRange) -> Result<bool> {
        let changed = self.changed_paths(range).await?;
        debug!("git reports {} changed paths", changed.len());
        Ok(filter.matches_any(&changed))
    }
}

/// Inputs the gate condition is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct GateInputs<'a> {
    pub event: &'a str,
    pub branch: &'a str,
    pub paths_changed: bool,
}

/// Composable gate predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateCondition {
    EventIs(String),
    BranchIs(String),
    PathsChanged,
    All(Vec<GateCondition>),
}

impl GateCondition {
    /// Reasons the condition does not hold; empty when it holds
    pub fn unmet(&self, inputs: &GateInputs<'_>) -> Vec<String> {
        match self {
            GateCondition::EventIs(expected) if inputs.event != expected.as_str() => {
                vec![format!("event is '{}', not '{}'", inputs.event, expected)]
            }
            GateCondition::BranchIs(expected) if inputs.branch != expected.as_str() => {
                vec![format!("branch is '{}', not '{}'", inputs.branch, expected)]
            }
            GateCondition::PathsChanged if !inputs.paths_changed => {
                vec!["no watched paths changed".to_string()]
            }
            GateCondition::All(conditions) => conditions.iter().flat_map(|c| c.unmet(inputs)).collect(),
            _ => Vec::new(),
        }
    }

    pub fn holds(&self, inputs: &GateInputs<'_>) -> bool {
        self.unmet(inputs).is_empty()
    }
}

/// Outcome of gate evaluation, computed once per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Eligible,
    Skipped { unmet: Vec<String> },
}

impl GateDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, GateDecision::Eligible)
    }
}

/// Gate guarding one job of the pipeline
#[derive(Debug, Clone)]
pub struct ReleaseGate {
    job: String,
    condition: GateCondition,
    paths: PathFilter,
}

impl ReleaseGate {
    /// Gate on event, branch and a change under `paths`. An empty filter
    /// selects nothing, so such a gate never opens.
    pub fn new(
        job: impl Into<String>,
        event: impl Into<String>,
        branch: impl Into<String>,
        paths: PathFilter,
    ) -> Self {
        let conditions = vec![
            GateCondition::EventIs(event.into()),
            GateCondition::BranchIs(branch.into()),
            GateCondition::PathsChanged,
        ];

        Self {
            job: job.into(),
            condition: GateCondition::All(conditions),
            paths,
        }
    }

    pub fn from_config(config: &ReleaseConfig) -> Result<Self, PipelineError> {
        if config.paths.is_empty() {
            return Err(PipelineError::GateWithoutPaths(config.job.clone()));
        }

        Ok(Self::new(
            config.job.clone(),
            config.event.clone(),
            config.branch.clone(),
            PathFilter::new(&config.paths)?,
        ))
    }

    /// The gated job
    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn condition(&self) -> &GateCondition {
        &self.condition
    }

    /// Pure evaluation against known inputs
    pub fn evaluate(&self, inputs: &GateInputs<'_>) -> GateDecision {
        let unmet = self.condition.unmet(inputs);
        if unmet.is_empty() {
            GateDecision::Eligible
        } else {
            GateDecision::Skipped { unmet }
        }
    }

    /// Evaluate against trigger metadata, consulting the change detector for
    /// the path condition. A detector error keeps the gate closed.
    pub async fn decide(&self, trigger: &TriggerMetadata, detector: &dyn ChangeDetector) -> GateDecision {
        let mut detection_error = None;
        let paths_changed = if self.paths.is_empty() {
            false
        } else {
            match detector.has_changes(&self.paths, &trigger.commit_range).await {
                Ok(changed) => changed,
                Err(e) => {
                    warn!("Change detection failed for gate on {}: {:#}", self.job, e);
                    detection_error = Some(format!("change detection failed: {:#}", e));
                    false
                }
            }
        };

        let decision = self.evaluate(&GateInputs {
            event: &trigger.event,
            branch: &trigger.branch,
            paths_changed,
        });

        match (decision, detection_error) {
            (GateDecision::Skipped { mut unmet }, Some(error)) => {
                unmet.retain(|reason| reason != "no watched paths changed");
                unmet.push(error);
                GateDecision::Skipped { unmet }
            }
            (decision, _) => decision,
        }
    }
}

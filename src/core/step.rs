//! Step domain model

use crate::core::config::StepConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Opaque action descriptor handed to the step executor.
///
/// The core never interprets `run`; it is whatever the executor understands
/// (a shell line for [`ShellExecutor`](crate::execution::ShellExecutor), a
/// scripted key for test doubles).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub run: String,

    /// Free-form parameters for the action
    #[serde(default)]
    pub with: IndexMap<String, String>,
}

impl Action {
    pub fn new(run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            with: IndexMap::new(),
        }
    }
}

/// A single atomic unit of work inside a job
#[derive(Debug, Clone)]
pub struct Step {
    /// Step name, unique within its job
    pub name: String,

    /// What to execute
    pub action: Action,

    /// Per-step environment bindings (override job and run env)
    pub env: IndexMap<String, String>,

    /// Execution limit in seconds; exceeding it fails the step
    pub timeout_secs: u64,

    /// Artifacts the action produces: artifact name -> path
    pub publish: IndexMap<String, String>,

    /// Credential this step needs. A step with a credential requirement is
    /// optional: it is skipped when the credential is absent.
    pub secret: Option<String>,
}

impl Step {
    /// Create a step with default settings
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: Action::new(run),
            env: IndexMap::new(),
            timeout_secs: StepDefaults::default().timeout_secs,
            publish: IndexMap::new(),
            secret: None,
        }
    }

    /// Create a step from a step config
    pub fn from_config(config: &StepConfig, defaults: &StepDefaults) -> Self {
        Step {
            name: config.name.clone(),
            action: Action {
                run: config.run.clone(),
                with: config.with.clone(),
            },
            env: config.env.clone(),
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
            publish: config.publish.clone(),
            secret: config.secret.clone(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn publishes(mut self, artifact: impl Into<String>, path: impl Into<String>) -> Self {
        self.publish.insert(artifact.into(), path.into());
        self
    }

    /// Mark this step optional on the given credential
    pub fn requires_secret(mut self, name: impl Into<String>) -> Self {
        self.secret = Some(name.into());
        self
    }

    /// Whether the step is an optional sub-step gated on a credential
    pub fn is_optional(&self) -> bool {
        self.secret.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 3600, // 1 hour
        }
    }
}

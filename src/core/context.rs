//! Run-scoped and instance-scoped execution context
//!
//! Credentials, trigger metadata and resolved inputs are passed explicitly
//! into each job instance instead of leaking through ambient process state.

use crate::core::{
    artifact::Artifact,
    gate::TriggerMetadata,
    job::OutputValue,
    matrix::JobInstance,
    secrets::{Secret, SecretProvider, StaticSecretProvider},
    step::Step,
};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Context shared by every instance of one pipeline run
#[derive(Clone)]
pub struct RunContext {
    pub trigger: TriggerMetadata,

    /// Run-level environment bindings (lowest precedence)
    pub env: IndexMap<String, String>,

    secrets: Arc<dyn SecretProvider>,
    cancelled: Arc<AtomicBool>,
}

impl RunContext {
    /// Create a context with no credentials
    pub fn new(trigger: TriggerMetadata) -> Self {
        Self {
            trigger,
            env: IndexMap::new(),
            secrets: Arc::new(StaticSecretProvider::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Request cancellation. Running instances stop at their next step
    /// boundary; instances not yet started never start.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Shared flag, for wiring cancellation to a signal handler
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.secrets.get(name)
    }

    pub fn secret_provider_name(&self) -> &str {
        self.secrets.name()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("trigger", &self.trigger)
            .field("env", &self.env)
            .field("secrets", &self.secrets.name())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Context handed to one job instance at construction time
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub run: Arc<RunContext>,
    pub instance: JobInstance,

    /// Job-level environment bindings
    pub env: IndexMap<String, String>,

    /// Resolved upstream outputs, keyed `job.output`
    pub inputs: IndexMap<String, OutputValue>,

    /// Resolved upstream artifacts, every producing instance's copy
    pub artifacts: Vec<Artifact>,

    /// Set when a sibling instance of a fail-fast job failed
    abort: Arc<AtomicBool>,
}

impl InstanceContext {
    pub fn new(run: Arc<RunContext>, instance: JobInstance, abort: Arc<AtomicBool>) -> Self {
        Self {
            run,
            instance,
            env: IndexMap::new(),
            inputs: IndexMap::new(),
            artifacts: Vec::new(),
            abort,
        }
    }

    pub fn with_env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_inputs(mut self, inputs: IndexMap<String, OutputValue>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Signal siblings to stop at their next step boundary
    pub fn abort_siblings(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Why the instance must stop before its next step, if it must
    pub fn stop_reason(&self) -> Option<String> {
        if self.run.is_cancelled() {
            Some("run cancelled".to_string())
        } else if self.abort.load(Ordering::SeqCst) {
            Some("sibling instance failed (fail-fast)".to_string())
        } else {
            None
        }
    }

    /// Environment for one step. Later layers win: run env, job env, matrix
    /// values, inputs, step env, then the step's credential.
    pub fn step_env(&self, step: &Step) -> IndexMap<String, String> {
        let mut env = self.run.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        for (axis, value) in &self.instance.values {
            env.insert(format!("MATRIX_{}", env_key(axis)), value.clone());
        }

        for (reference, value) in &self.inputs {
            env.insert(format!("INPUT_{}", env_key(reference)), value.to_string());
        }

        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(name) = &step.secret {
            if let Some(secret) = self.run.secret(name) {
                env.insert(name.clone(), secret.expose().to_string());
            }
        }

        env
    }
}

/// Upper-case an identifier into an environment variable name
pub fn env_key(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

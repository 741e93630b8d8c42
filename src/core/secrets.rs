//! Secret providers for optional credential-gated steps

use std::collections::HashMap;
use std::fmt;

/// An opaque credential value. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Source of credentials. `None` means the credential was not supplied,
/// which is different from a supplied empty value.
pub trait SecretProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<Secret>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Reads credentials from process environment variables, optionally
/// prefixed (`<PREFIX>_<NAME>`)
#[derive(Debug, Clone, Default)]
pub struct EnvSecretProvider {
    prefix: Option<String>,
}

impl EnvSecretProvider {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    fn resolve_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{}_{}", p, name),
            None => name.to_string(),
        }
    }
}

impl SecretProvider for EnvSecretProvider {
    fn get(&self, name: &str) -> Option<Secret> {
        std::env::var(self.resolve_name(name)).ok().map(Secret)
    }

    fn name(&self) -> &str {
        "env"
    }
}

/// Fixed in-memory credentials
#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    secrets: HashMap<String, Secret>,
}

impl StaticSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(secrets: HashMap<String, String>) -> Self {
        Self {
            secrets: secrets.into_iter().map(|(k, v)| (k, Secret(v))).collect(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), Secret::new(value));
        self
    }
}

impl SecretProvider for StaticSecretProvider {
    fn get(&self, name: &str) -> Option<Secret> {
        self.secrets.get(name).cloned()
    }

    fn name(&self) -> &str {
        "static"
    }
}

//! Run-scoped artifact store
//!
//! Artifacts are keyed by (producer job, artifact name) and hold one entry per
//! producing instance, so sibling matrix instances publishing under the same
//! name merge instead of overwriting each other. Blobs are content-addressed
//! by their SHA-256 digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A published blob
#[derive(Debug, Clone)]
pub struct Artifact {
    pub reference: ArtifactRef,
    pub data: Arc<[u8]>,
}

/// Metadata of a published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Producer job ID
    pub job: String,

    /// Producer instance name
    pub instance: String,

    /// Artifact name
    pub name: String,

    /// Republish count for this (instance, name), starting at 1
    pub version: u32,

    /// Hex SHA-256 of the content
    pub digest: String,

    pub size: usize,

    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ArtifactKey {
    job: String,
    name: String,
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<ArtifactKey, Vec<Artifact>>,
    blobs: HashMap<String, Arc<[u8]>>,
}

/// Append-only artifact store shared by every job instance of one run
#[derive(Debug, Default)]
pub struct ArtifactStore {
    inner: RwLock<StoreInner>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex SHA-256 digest of a blob
    pub fn digest(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    /// Publish a blob. Safe to call concurrently from many instances.
    pub async fn publish(
        &self,
        job: &str,
        instance: &str,
        name: &str,
        data: Vec<u8>,
    ) -> ArtifactRef {
        let digest = Self::digest(&data);
        let size = data.len();

        let mut inner = self.inner.write().await;
        let blob = inner
            .blobs
            .entry(digest.clone())
            .or_insert_with(|| Arc::from(data))
            .clone();

        let entries = inner
            .entries
            .entry(ArtifactKey {
                job: job.to_string(),
                name: name.to_string(),
            })
            .or_default();

        let version = entries.iter().filter(|a| a.reference.instance == instance).count() as u32 + 1;
        let reference = ArtifactRef {
            job: job.to_string(),
            instance: instance.to_string(),
            name: name.to_string(),
            version,
            digest,
            size,
            published_at: Utc::now(),
        };

        debug!(
            "Published artifact {} v{} from {} ({} bytes)",
            name, version, instance, size
        );

        entries.push(Artifact {
            reference: reference.clone(),
            data: blob,
        });
        reference
    }

    /// Latest version of an artifact published by one instance
    pub async fn fetch(&self, job: &str, instance: &str, name: &str) -> Option<Artifact> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(&ArtifactKey {
                job: job.to_string(),
                name: name.to_string(),
            })?
            .iter()
            .rev()
            .find(|a| a.reference.instance == instance)
            .cloned()
    }

    /// Merge-multiple retrieval: the latest version from every instance of
    /// `job` that published `name`, ordered by instance name so the result
    /// does not depend on completion order.
    pub async fn fetch_merged(&self, job: &str, name: &str) -> Vec<Artifact> {
        let inner = self.inner.read().await;
        let Some(entries) = inner.entries.get(&ArtifactKey {
            job: job.to_string(),
            name: name.to_string(),
        }) else {
            return Vec::new();
        };

        let mut latest: HashMap<&str, &Artifact> = HashMap::new();
        for artifact in entries {
            latest.insert(artifact.reference.instance.as_str(), artifact);
        }

        let mut merged: Vec<Artifact> = latest.into_values().cloned().collect();
        merged.sort_by(|a, b| a.reference.instance.cmp(&b.reference.instance));
        merged
    }

    /// Content lookup by digest
    pub async fn fetch_by_digest(&self, digest: &str) -> Option<Arc<[u8]>> {
        self.inner.read().await.blobs.get(digest).cloned()
    }

    /// Every published artifact reference, oldest first
    pub async fn list(&self) -> Vec<ArtifactRef> {
        let inner = self.inner.read().await;
        let mut refs: Vec<ArtifactRef> = inner
            .entries
            .values()
            .flatten()
            .map(|a| a.reference.clone())
            .collect();
        refs.sort_by(|a, b| a.published_at.cmp(&b.published_at));
        refs
    }
}

//! Per-vertex result cache
//!
//! Entries are keyed by vertex id and an input fingerprint. The fingerprint
//! covers everything that can change a build's output: the component type, the
//! hash of its backing source, its static parameters and the resolved inputs.

use crate::components::BuildOutput;
use crate::core::Fields;
use crate::error::{CacheRestorationError, CacheStoreError};
use crate::sandbox::{full_digest, ComponentSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Snapshot of a built vertex
///
/// Every field is optional so a truncated or hand-edited entry still
/// deserializes; completeness is checked when the entry is restored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default)]
    pub built: Option<bool>,
    #[serde(default)]
    pub artifacts: Option<Fields>,
    #[serde(default)]
    pub built_object: Option<Fields>,
    #[serde(default)]
    pub built_result: Option<Fields>,
    #[serde(default)]
    pub full_data: Option<Fields>,
    #[serde(default)]
    pub results: Option<Fields>,
}

impl CacheEntry {
    pub fn from_output(output: &BuildOutput) -> Self {
        Self {
            built: Some(true),
            artifacts: Some(output.artifacts.clone()),
            built_object: Some(output.built_object.clone()),
            built_result: Some(output.built_result.clone()),
            full_data: Some(output.full_data.clone()),
            results: Some(output.results.clone()),
        }
    }

    /// Convert back into a build output, failing on the first missing field
    pub fn into_output(self) -> Result<BuildOutput, CacheRestorationError> {
        fn field(value: Option<Fields>, name: &str) -> Result<Fields, CacheRestorationError> {
            value.ok_or_else(|| CacheRestorationError::MissingField(name.to_string()))
        }

        match self.built {
            Some(true) => {}
            Some(false) => return Err(CacheRestorationError::NotBuilt),
            None => return Err(CacheRestorationError::MissingField("built".to_string())),
        }

        Ok(BuildOutput {
            artifacts: field(self.artifacts, "artifacts")?,
            built_object: field(self.built_object, "built_object")?,
            built_result: field(self.built_result, "built_result")?,
            full_data: field(self.full_data, "full_data")?,
            results: field(self.results, "results")?,
        })
    }
}

/// Input fingerprint of a vertex build
pub fn fingerprint(
    component_type: &str,
    source: Option<&ComponentSource>,
    params: &Fields,
    inputs: &Fields,
) -> String {
    let source_hash = source.map(|s| full_digest(&s.text));

    // Fields are BTreeMaps, so the serialized form is canonical
    let material = json!({
        "component_type": component_type,
        "source": source_hash,
        "params": params,
        "inputs": inputs,
    });

    let mut hasher = Sha256::new();
    hasher.update(material.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Storage backend for cache entries
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, vertex_id: &str, fingerprint: &str)
        -> Result<Option<CacheEntry>, CacheStoreError>;

    async fn put(
        &self,
        vertex_id: &str,
        fingerprint: &str,
        entry: CacheEntry,
    ) -> Result<(), CacheStoreError>;
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(
        &self,
        vertex_id: &str,
        fingerprint: &str,
    ) -> Result<Option<CacheEntry>, CacheStoreError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(vertex_id.to_string(), fingerprint.to_string()))
            .cloned())
    }

    async fn put(
        &self,
        vertex_id: &str,
        fingerprint: &str,
        entry: CacheEntry,
    ) -> Result<(), CacheStoreError> {
        self.entries
            .write()
            .await
            .insert((vertex_id.to_string(), fingerprint.to_string()), entry);
        Ok(())
    }
}

/// One JSON file per entry under `<dir>/<hex vertex id>/<fingerprint>.json`
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, vertex_id: &str, fingerprint: &str) -> PathBuf {
        self.dir
            .join(hex::encode(vertex_id))
            .join(format!("{}.json", fingerprint))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CacheStoreError {
    CacheStoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(
        &self,
        vertex_id: &str,
        fingerprint: &str,
    ) -> Result<Option<CacheEntry>, CacheStoreError> {
        let path = self.path_for(vertex_id, fingerprint);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn put(
        &self,
        vertex_id: &str,
        fingerprint: &str,
        entry: CacheEntry,
    ) -> Result<(), CacheStoreError> {
        let path = self.path_for(vertex_id, fingerprint);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(&entry)?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error(&path, e))
    }
}

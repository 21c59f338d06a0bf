//! Catalog index of shipped (core) components
//!
//! Two on-disk shapes are accepted:
//!
//! ```json
//! {"entries": [["category", {"Name": {"metadata": {"code_hash": "abc123def456"}}}]]}
//! ```
//!
//! and the per-version hash history:
//!
//! ```json
//! {"Name": {"versions": {"0.1.0": "abc123def456", "0.2.0": "0123456789ab"}}}
//! ```

use super::hash::ContentHash;
use crate::error::CatalogError;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Hash membership index built from the component catalog
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    hashes: HashSet<ContentHash>,
    names: HashMap<String, BTreeSet<ContentHash>>,
}

impl CatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a core component hash, optionally under its declared name
    pub fn insert(&mut self, name: Option<&str>, hash: ContentHash) {
        if let Some(name) = name {
            self.names
                .entry(name.to_string())
                .or_default()
                .insert(hash.clone());
        }
        self.hashes.insert(hash);
    }

    /// Build the index directly from source texts (used when packaging and in tests)
    pub fn from_sources<'a>(sources: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut index = Self::new();
        for (name, source) in sources {
            if let Ok(hash) = ContentHash::of(source) {
                index.insert(Some(name), hash);
            }
        }
        index
    }

    /// Parse either supported JSON layout
    pub fn from_json(value: &Value) -> Result<Self, CatalogError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) if map.contains_key("entries") => Self::from_component_index(value),
            Value::Object(_) => Self::from_hash_history(value),
            _ => Err(CatalogError::Corrupt(
                "top level must be an object".to_string(),
            )),
        }
    }

    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_json(&value)
    }

    /// `{"entries": [[category, {Name: {"metadata": {"code_hash": ...}}}]]}`
    pub fn from_component_index(value: &Value) -> Result<Self, CatalogError> {
        let entries = value
            .get("entries")
            .and_then(Value::as_array)
            .ok_or_else(|| CatalogError::Corrupt("'entries' must be an array".to_string()))?;

        let mut index = Self::new();
        for entry in entries {
            let components = entry
                .as_array()
                .and_then(|pair| pair.get(1))
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    CatalogError::Corrupt("entry must be a [category, components] pair".to_string())
                })?;

            for (name, component) in components {
                // Components without a recorded hash are not trusted
                let Some(hash) = component
                    .pointer("/metadata/code_hash")
                    .and_then(Value::as_str)
                    .filter(|h| !h.is_empty())
                else {
                    continue;
                };
                index.insert(Some(name.as_str()), ContentHash::from_hex(hash));
            }
        }
        Ok(index)
    }

    /// `{Name: {"versions": {version: hash}}}`
    pub fn from_hash_history(value: &Value) -> Result<Self, CatalogError> {
        let Some(history) = value.as_object() else {
            return Ok(Self::new());
        };

        let mut index = Self::new();
        for (name, record) in history {
            let versions = record
                .get("versions")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    CatalogError::Corrupt(format!("Missing 'versions' key for component {}", name))
                })?;

            for (version, hash) in versions {
                let hash = hash.as_str().filter(|h| !h.is_empty()).ok_or_else(|| {
                    CatalogError::Corrupt(format!(
                        "Empty hash for component {} version {}",
                        name, version
                    ))
                })?;
                index.insert(Some(name.as_str()), ContentHash::from_hex(hash));
            }
        }
        Ok(index)
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.hashes.contains(hash)
    }

    /// Hashes recorded for a declared component name
    pub fn hashes_for(&self, name: &str) -> Option<&BTreeSet<ContentHash>> {
        self.names.get(name)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Source of the catalog index, read once per process
pub trait CatalogLoader: Send + Sync {
    fn load(&self) -> Result<CatalogIndex, CatalogError>;
}

/// Reads the index from a JSON file produced by the packaging step
#[derive(Debug, Clone)]
pub struct FileCatalogLoader {
    path: PathBuf,
}

impl FileCatalogLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CatalogLoader for FileCatalogLoader {
    fn load(&self) -> Result<CatalogIndex, CatalogError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| CatalogError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        CatalogIndex::parse(&content)
    }
}

/// An index that is already in memory
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog(pub CatalogIndex);

impl CatalogLoader for StaticCatalog {
    fn load(&self) -> Result<CatalogIndex, CatalogError> {
        Ok(self.0.clone())
    }
}

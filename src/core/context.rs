//! Run-scoped context handed to every component build

use crate::sandbox::{Classification, IsolationPolicy, ValidatedSource};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Named values flowing between vertices
pub type Fields = BTreeMap<String, Value>;

/// Key/value store shared by all vertices of one run
///
/// Every access goes through a single mutex, so a reader never observes a
/// half-written entry and `update` is an atomic read-modify-write.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Store a value, returning the previous one
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value)
    }

    /// Replace the entry with `f(current)` under the lock and return the new value
    pub fn update<F>(&self, key: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let next = f(entries.get(key));
        entries.insert(key.to_string(), next.clone());
        next
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Everything a component may look at while building
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub vertex_id: String,
    pub display_name: String,
    /// Static parameters from the flow description
    pub params: Fields,
    pub shared: SharedContext,
    pub cancel: CancellationToken,
    /// Present when the vertex is backed by source text
    pub source: Option<ValidatedSource>,
    /// Capability list the build must respect; `None` for core code
    pub policy: Option<IsolationPolicy>,
}

impl BuildContext {
    pub fn classification(&self) -> Classification {
        match &self.source {
            Some(source) => source.classification,
            None => Classification::Core,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_remove() {
        let shared = SharedContext::new();
        assert!(shared.set("k", json!(1)).is_none());
        assert_eq!(shared.set("k", json!(2)), Some(json!(1)));
        assert_eq!(shared.get("k"), Some(json!(2)));
        assert_eq!(shared.remove("k"), Some(json!(2)));
        assert!(shared.get("k").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_atomic() {
        let shared = SharedContext::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    shared.update("counter", |v| {
                        json!(v.and_then(Value::as_u64).unwrap_or(0) + 1)
                    });
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(shared.get("counter"), Some(json!(1600)));
    }
}

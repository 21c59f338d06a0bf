//! Component code isolation - core/custom classification and sandbox policy
//!
//! Trust is decided by hash membership in the shipped catalog. The hash is
//! always taken over the source exactly as written; the default prelude is only
//! prepended afterwards (see [`ValidatedSource::executable_text`]), so rewriting
//! can never change the classification. Custom sources are statically scanned
//! against the [`IsolationPolicy`] for the requested level.

pub mod catalog;
pub mod hash;
pub mod policy;
pub mod scanner;

pub use catalog::{CatalogIndex, CatalogLoader, FileCatalogLoader, StaticCatalog};
pub use hash::{full_digest, ContentHash};
pub use policy::{IsolationLevel, IsolationPolicy, PolicyOverrides};

use crate::error::{SecurityViolationError, ViolationKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

/// Imports injected ahead of every component before execution
pub const DEFAULT_PRELUDE: &str = "from vertexflow.components import *\n";

/// Trust classification of a component source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Ships with the system; bypasses the sandbox
    Core,
    /// User-authored; must pass the isolation policy
    Custom,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// User-visible definition backing a vertex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSource {
    pub text: String,
    #[serde(default)]
    pub declared_name: Option<String>,
}

impl ComponentSource {
    pub fn new(text: impl Into<String>, declared_name: Option<&str>) -> Self {
        Self {
            text: text.into(),
            declared_name: declared_name.map(str::to_string),
        }
    }
}

/// Source that has been classified and, if custom, passed the policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSource {
    pub text: String,
    pub hash: Option<ContentHash>,
    pub classification: Classification,
    /// Modules referenced by a custom source (not collected for core)
    pub modules: Vec<String>,
}

impl ValidatedSource {
    /// Text handed to the runtime, with the default prelude prepended
    pub fn executable_text(&self) -> String {
        format!("{}{}", DEFAULT_PRELUDE, self.text)
    }
}

/// Full source digest and level; the truncated catalog hash is too short to key on
type EnforcementKey = (String, IsolationLevel);
type Enforcement = Result<Vec<String>, SecurityViolationError>;

/// Process-wide classification and enforcement service
///
/// The catalog index is loaded at most once, on first use or through
/// [`ComponentIsolation::preload`], and never mutated afterwards. A load
/// failure degrades every lookup to [`Classification::Custom`].
pub struct ComponentIsolation {
    loader: Box<dyn CatalogLoader>,
    index: OnceLock<Option<CatalogIndex>>,
    overrides: PolicyOverrides,
    classifications: RwLock<HashMap<ContentHash, Classification>>,
    enforcements: RwLock<HashMap<EnforcementKey, Enforcement>>,
}

impl ComponentIsolation {
    pub fn new(loader: impl CatalogLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            index: OnceLock::new(),
            overrides: PolicyOverrides::default(),
            classifications: RwLock::new(HashMap::new()),
            enforcements: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_index(index: CatalogIndex) -> Self {
        Self::new(StaticCatalog(index))
    }

    /// No shipped catalog: every source with code is custom
    pub fn without_catalog() -> Self {
        Self::from_index(CatalogIndex::new())
    }

    pub fn with_overrides(mut self, overrides: PolicyOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Load the index now; returns whether a usable index is available
    pub fn preload(&self) -> bool {
        self.index().is_some()
    }

    fn index(&self) -> Option<&CatalogIndex> {
        self.index
            .get_or_init(|| match self.loader.load() {
                Ok(index) => {
                    log::info!("Loaded component catalog with {} core hashes", index.len());
                    Some(index)
                }
                Err(e) => {
                    log::warn!("Component catalog unavailable, treating all code as custom: {}", e);
                    None
                }
            })
            .as_ref()
    }

    /// Effective policy for a level, including configured overrides
    pub fn policy(&self, level: IsolationLevel) -> IsolationPolicy {
        IsolationPolicy::for_level(level).with_overrides(&self.overrides)
    }

    /// Classify source as core or custom by its content hash
    pub fn classify(&self, source: &str, declared_name: Option<&str>) -> Classification {
        let hash = match ContentHash::of(source) {
            Ok(hash) => hash,
            Err(e) => {
                log::debug!("Cannot hash component source ({}), treating as custom", e);
                return Classification::Custom;
            }
        };

        if let Some(found) = self
            .classifications
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&hash)
        {
            return *found;
        }

        let classification = match self.index() {
            Some(index) if index.contains(&hash) => Classification::Core,
            Some(index) => {
                if let Some(name) = declared_name {
                    if index.hashes_for(name).is_some() {
                        log::info!(
                            "Component '{}' matches a core name but its code was edited (hash {})",
                            name,
                            hash
                        );
                    }
                }
                Classification::Custom
            }
            None => Classification::Custom,
        };

        *self
            .classifications
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(hash)
            .or_insert(classification)
    }

    /// Check custom source against the policy for `level`
    pub fn enforce(
        &self,
        source: &str,
        level: IsolationLevel,
    ) -> Result<ValidatedSource, SecurityViolationError> {
        let key = (full_digest(source), level);
        let cached = self
            .enforcements
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();

        let outcome = match cached {
            Some(outcome) => outcome,
            None => {
                let outcome = check_source(source, &self.policy(level));
                self.enforcements
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .entry(key)
                    .or_insert(outcome)
                    .clone()
            }
        };

        outcome.map(|modules| ValidatedSource {
            text: source.to_string(),
            hash: ContentHash::of(source).ok(),
            classification: Classification::Custom,
            modules,
        })
    }

    /// Classify, then enforce only when the source is custom
    pub fn validate(
        &self,
        source: &ComponentSource,
        level: IsolationLevel,
    ) -> Result<ValidatedSource, SecurityViolationError> {
        match self.classify(&source.text, source.declared_name.as_deref()) {
            Classification::Core => Ok(ValidatedSource {
                text: source.text.clone(),
                hash: ContentHash::of(&source.text).ok(),
                classification: Classification::Core,
                modules: Vec::new(),
            }),
            Classification::Custom => self.enforce(&source.text, level),
        }
    }
}

fn check_source(source: &str, policy: &IsolationPolicy) -> Enforcement {
    let scan = scanner::scan(source);

    for module in &scan.modules {
        if let Err(rule) = policy.check_module(&module.module) {
            return Err(SecurityViolationError {
                kind: ViolationKind::Module,
                name: module.module.clone(),
                rule,
                level: policy.level,
                line: module.line,
            });
        }
    }

    for name in &scan.names {
        let dunder = name.name.starts_with("__") && name.name.ends_with("__");
        if name.attribute && !dunder {
            continue;
        }
        if let Err(rule) = policy.check_builtin(&name.name) {
            return Err(SecurityViolationError {
                kind: ViolationKind::Builtin,
                name: name.name.clone(),
                rule,
                level: policy.level,
                line: name.line,
            });
        }
    }

    Ok(scan.module_names())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CORE_SOURCE: &str = "import os\n\nclass CoreComponent:\n    def build(self):\n        return os.getcwd()\n";

    struct CountingLoader {
        index: CatalogIndex,
        loads: Arc<AtomicUsize>,
    }

    impl CatalogLoader for CountingLoader {
        fn load(&self) -> Result<CatalogIndex, CatalogError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.index.clone())
        }
    }

    struct BrokenLoader;

    impl CatalogLoader for BrokenLoader {
        fn load(&self) -> Result<CatalogIndex, CatalogError> {
            Err(CatalogError::Corrupt("Index read error".to_string()))
        }
    }

    fn core_isolation() -> ComponentIsolation {
        ComponentIsolation::from_index(CatalogIndex::from_sources([("CoreComponent", CORE_SOURCE)]))
    }

    #[test]
    fn test_catalog_hash_classifies_core() {
        let isolation = core_isolation();
        assert_eq!(
            isolation.classify(CORE_SOURCE, Some("CoreComponent")),
            Classification::Core
        );
        // Hash alone decides; the declared name is irrelevant
        assert_eq!(isolation.classify(CORE_SOURCE, None), Classification::Core);
        assert_eq!(
            isolation.classify(CORE_SOURCE, Some("DifferentComponent")),
            Classification::Core
        );
    }

    #[test]
    fn test_edited_core_component_is_custom() {
        let isolation = core_isolation();
        let edited = CORE_SOURCE.replace("getcwd", "getpid");
        assert_eq!(
            isolation.classify(&edited, Some("CoreComponent")),
            Classification::Custom
        );
    }

    #[test]
    fn test_prelude_does_not_change_classification() {
        let isolation = core_isolation();
        let validated = isolation
            .validate(&ComponentSource::new(CORE_SOURCE, Some("CoreComponent")), IsolationLevel::Strict)
            .unwrap();
        assert_eq!(validated.classification, Classification::Core);
        assert!(validated.executable_text().starts_with(DEFAULT_PRELUDE));

        // Hashing the rewritten text would not match the catalog
        assert_eq!(
            isolation.classify(&validated.executable_text(), Some("CoreComponent")),
            Classification::Custom
        );
    }

    #[test]
    fn test_index_read_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let isolation = ComponentIsolation::new(CountingLoader {
            index: CatalogIndex::from_sources([("CoreComponent", CORE_SOURCE)]),
            loads: loads.clone(),
        });

        for _ in 0..5 {
            assert_eq!(isolation.classify(CORE_SOURCE, None), Classification::Core);
            assert_eq!(isolation.classify("x = 1\n", None), Classification::Custom);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_broken_index_defaults_to_custom() {
        let isolation = ComponentIsolation::new(BrokenLoader);
        assert!(!isolation.preload());
        assert_eq!(
            isolation.classify(CORE_SOURCE, Some("CoreComponent")),
            Classification::Custom
        );
        let err = isolation
            .validate(&ComponentSource::new(CORE_SOURCE, None), IsolationLevel::Moderate)
            .unwrap_err();
        assert_eq!(err.kind, ViolationKind::Module);
        assert_eq!(err.name, "os");
        assert!(err.to_string().starts_with("Module 'os' is blocked"));
    }

    #[test]
    fn test_empty_source_is_custom() {
        assert_eq!(core_isolation().classify("", None), Classification::Custom);
    }

    #[test]
    fn test_strict_blocks_eval_builtin() {
        let isolation = ComponentIsolation::without_catalog();
        let source = "class Custom:\n    value = eval(\"1+1\")\n";
        let err = isolation.enforce(source, IsolationLevel::Strict).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Builtin);
        assert_eq!(err.name, "eval");
        assert_eq!(err.line, 2);
        assert!(err.to_string().contains("Builtin 'eval' is blocked"));
    }

    #[test]
    fn test_identical_source_as_core_bypasses_policy() {
        let source = "import subprocess\nvalue = eval('1')\n";
        let custom = ComponentIsolation::without_catalog();
        assert!(custom
            .validate(&ComponentSource::new(source, None), IsolationLevel::Strict)
            .is_err());

        let core = ComponentIsolation::from_index(CatalogIndex::from_sources([("Tool", source)]));
        let validated = core
            .validate(&ComponentSource::new(source, None), IsolationLevel::Strict)
            .unwrap();
        assert_eq!(validated.classification, Classification::Core);
    }

    #[test]
    fn test_attribute_named_like_builtin_is_allowed() {
        let isolation = ComponentIsolation::without_catalog();
        let source = "import json\nresult = model.eval()\n";
        let validated = isolation.enforce(source, IsolationLevel::Moderate).unwrap();
        assert_eq!(validated.modules, vec!["json".to_string()]);
    }

    #[test]
    fn test_dunder_escape_blocked_as_attribute() {
        let isolation = ComponentIsolation::without_catalog();
        let source = "leak = ().__class__.__subclasses__()\n";
        let err = isolation.enforce(source, IsolationLevel::Moderate).unwrap_err();
        assert_eq!(err.name, "__subclasses__");
        assert_eq!(err.rule, "introspection escape");
    }

    #[test]
    fn test_truncated_hash_collision_is_enforced_separately() {
        let isolation = ComponentIsolation::without_catalog();
        let benign = "x = 1\n# 5803637\n";
        let blocked = "import subprocess\n# 418845\n";
        assert_eq!(ContentHash::of(benign).unwrap(), ContentHash::of(blocked).unwrap());

        assert!(isolation.enforce(benign, IsolationLevel::Strict).is_ok());
        let err = isolation.enforce(blocked, IsolationLevel::Strict).unwrap_err();
        assert_eq!(err.name, "subprocess");

        // Same text through validate also goes through the scanner
        assert!(isolation
            .validate(&ComponentSource::new(blocked, None), IsolationLevel::Strict)
            .is_err());
    }

    #[test]
    fn test_builtins_module_reached_through_attribute_is_blocked() {
        let isolation = ComponentIsolation::without_catalog();
        let source = "class Custom:\n    def build(self):\n        return len.__self__.eval(\"1+1\")\n";
        for level in [IsolationLevel::Strict, IsolationLevel::Moderate] {
            let err = isolation.enforce(source, level).unwrap_err();
            assert_eq!(err.name, "__self__");
            assert_eq!(err.rule, "introspection escape");
            assert_eq!(err.line, 3);
        }

        let err = isolation
            .enforce("ns = build.__dict__\n", IsolationLevel::Moderate)
            .unwrap_err();
        assert_eq!(err.name, "__dict__");
    }

    #[test]
    fn test_future_import_allowed_at_strict() {
        let isolation = ComponentIsolation::without_catalog();
        let source = "from __future__ import annotations\nimport json\n";
        let validated = isolation.enforce(source, IsolationLevel::Strict).unwrap();
        assert_eq!(validated.modules, vec!["__future__".to_string(), "json".to_string()]);
    }

    #[test]
    fn test_permissive_allows_dangerous_source() {
        let isolation = ComponentIsolation::without_catalog();
        let source = "import os\nimport socket\nx = eval('1')\n";
        assert!(isolation.enforce(source, IsolationLevel::Permissive).is_ok());
    }

    #[test]
    fn test_overrides_reach_enforcement() {
        let isolation = ComponentIsolation::without_catalog().with_overrides(PolicyOverrides {
            extra_allowed_modules: vec!["requests".to_string()],
            ..Default::default()
        });
        assert!(isolation
            .enforce("import requests\n", IsolationLevel::Moderate)
            .is_ok());
    }
}

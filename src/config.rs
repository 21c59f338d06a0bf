//! Engine configuration - YAML file plus environment overrides

use crate::core::SchedulerConfig;
use crate::run::RUNS_DIR;
use crate::sandbox::{IsolationLevel, PolicyOverrides};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_ISOLATION_LEVEL: &str = "VERTEXFLOW_ISOLATION_LEVEL";
pub const ENV_MAX_CONCURRENCY: &str = "VERTEXFLOW_MAX_CONCURRENCY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub isolation_level: IsolationLevel,
    /// Component index or hash history JSON; no catalog means all code is custom
    pub catalog_index: Option<PathBuf>,
    /// Enables the file cache store when set
    pub cache_dir: Option<PathBuf>,
    pub runs_dir: PathBuf,
    pub policy: PolicyOverrides,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            isolation_level: IsolationLevel::default(),
            catalog_index: None,
            cache_dir: None,
            runs_dir: PathBuf::from(RUNS_DIR),
            policy: PolicyOverrides::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// User-level config location
    pub fn user_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".vertexflow")
            .join("config.yml")
    }

    /// Auto-detect and load configuration
    /// Priority:
    /// 1. vertexflow.yml in the current directory
    /// 2. ~/.vertexflow/config.yml
    /// 3. defaults
    ///
    /// Environment overrides are applied on top.
    pub fn auto_load() -> Result<Self> {
        let local = Path::new("vertexflow.yml");
        let user = Self::user_path();

        let config = if local.exists() {
            Self::from_file(local)?
        } else if user.exists() {
            Self::from_file(&user)?
        } else {
            Self::default()
        };

        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `VERTEXFLOW_*` overrides read through `lookup`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_ISOLATION_LEVEL) {
            self.isolation_level = level
                .parse()
                .map_err(|e: String| anyhow::anyhow!("{}: {}", ENV_ISOLATION_LEVEL, e))?;
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENCY) {
            self.max_concurrency = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_MAX_CONCURRENCY))?;
        }
        Ok(self)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrency: self.max_concurrency.max(1),
            isolation_level: self.isolation_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.isolation_level, IsolationLevel::Moderate);
        assert_eq!(config.runs_dir, PathBuf::from(".vertexflow/runs"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vertexflow.yml");
        std::fs::write(
            &path,
            "isolation_level: strict\ncache_dir: /tmp/cache\npolicy:\n  extra_allowed_modules: [requests]\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.isolation_level, IsolationLevel::Strict);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(config.policy.extra_allowed_modules, vec!["requests".to_string()]);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_ISOLATION_LEVEL, "permissive"),
            (ENV_MAX_CONCURRENCY, "8"),
        ]);
        let config = EngineConfig::default()
            .with_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.isolation_level, IsolationLevel::Permissive);
        assert_eq!(config.max_concurrency, 8);
    }

    #[test]
    fn test_invalid_env_override() {
        let result = EngineConfig::default().with_env_overrides(|k| {
            (k == ENV_MAX_CONCURRENCY).then(|| "many".to_string())
        });
        assert!(result.is_err());

        let result = EngineConfig::default()
            .with_env_overrides(|k| (k == ENV_ISOLATION_LEVEL).then(|| "loose".to_string()));
        assert!(result.unwrap_err().to_string().contains("unknown isolation level"));
    }
}

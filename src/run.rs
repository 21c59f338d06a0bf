//! Run results - per-vertex outcomes of one scheduling pass and their history

use crate::core::{Fields, Vertex};
use crate::error::VertexError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default directory for saved runs
pub const RUNS_DIR: &str = ".vertexflow/runs";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Built,
    Failed,
    Cancelled,
}

/// Final state of one vertex in a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VertexOutcome {
    pub status: OutcomeStatus,
    #[serde(default)]
    pub reused_from_cache: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Short failure label, e.g. `blocked-by-dependency`
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub results: Fields,
}

impl VertexOutcome {
    /// Outcome of a vertex in a terminal state; `None` if it never got there
    pub fn from_vertex(vertex: &Vertex, duration_ms: u64) -> Option<Self> {
        let outcome = match vertex.result()? {
            Ok(result) => Self {
                status: OutcomeStatus::Built,
                reused_from_cache: result.used_frozen_result,
                error: None,
                cause: None,
                duration_ms,
                results: result.results.clone(),
            },
            Err(error) => Self::failed(error, duration_ms),
        };
        Some(outcome)
    }

    pub fn failed(error: &VertexError, duration_ms: u64) -> Self {
        let status = match error {
            VertexError::Cancelled => OutcomeStatus::Cancelled,
            _ => OutcomeStatus::Failed,
        };
        Self {
            status,
            reused_from_cache: false,
            error: Some(error.to_string()),
            cause: Some(error.cause().to_string()),
            duration_ms,
            results: Fields::new(),
        }
    }

    pub fn is_built(&self) -> bool {
        self.status == OutcomeStatus::Built
    }
}

/// Caller-chosen definition of a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuccessPolicy {
    /// Every vertex built
    #[default]
    AllBuilt,
    /// At least one terminal vertex built
    AnyTerminalBuilt,
}

/// Aggregated outcome of one scheduling pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    #[serde(default)]
    pub flow: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub order: Vec<String>,
    pub terminal: Vec<String>,
    pub outcomes: BTreeMap<String, VertexOutcome>,
}

impl RunResult {
    pub fn new(order: Vec<String>, terminal: Vec<String>) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: started_at.format("%Y-%m-%d-%H-%M-%S-%3f").to_string(),
            flow: None,
            started_at,
            ended_at: None,
            order,
            terminal,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, vertex_id: &str, outcome: VertexOutcome) {
        self.outcomes.insert(vertex_id.to_string(), outcome);
    }

    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn outcome(&self, vertex_id: &str) -> Option<&VertexOutcome> {
        self.outcomes.get(vertex_id)
    }

    pub fn built(&self) -> Vec<&str> {
        self.with_status(OutcomeStatus::Built)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.with_status(OutcomeStatus::Failed)
    }

    pub fn cancelled(&self) -> Vec<&str> {
        self.with_status(OutcomeStatus::Cancelled)
    }

    fn with_status(&self, status: OutcomeStatus) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.outcomes.get(*id).map(|o| o.status) == Some(status))
            .map(String::as_str)
            .collect()
    }

    pub fn is_success(&self, policy: SuccessPolicy) -> bool {
        match policy {
            SuccessPolicy::AllBuilt => {
                self.order.len() == self.outcomes.len()
                    && self.outcomes.values().all(VertexOutcome::is_built)
            }
            SuccessPolicy::AnyTerminalBuilt => self
                .terminal
                .iter()
                .any(|id| self.outcomes.get(id).is_some_and(VertexOutcome::is_built)),
        }
    }

    /// Save under `dir` and point `latest.json` at it
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let file_name = format!("{}.json", self.run_id);
        let path = dir.join(&file_name);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, &json)?;

        let latest_path = dir.join("latest.json");
        let _ = fs::remove_file(&latest_path);
        #[cfg(unix)]
        {
            use std::os::unix::fs as unix_fs;
            unix_fs::symlink(&file_name, &latest_path)?;
        }
        #[cfg(not(unix))]
        fs::write(&latest_path, &json)?;

        Ok(path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let run: RunResult = serde_json::from_str(&content)?;
        Ok(run)
    }

    pub fn load_latest(dir: &Path) -> Result<Self> {
        let latest_path = dir.join("latest.json");
        if !latest_path.exists() {
            anyhow::bail!("No saved run in {}", dir.display());
        }
        Self::load_from(&latest_path)
    }

    /// Saved run ids, most recent first
    pub fn list_runs(dir: &Path) -> Result<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if stem != "latest" {
                        runs.push(stem.to_string());
                    }
                }
            }
        }

        runs.sort();
        runs.reverse();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComponentBuildError;

    fn built() -> VertexOutcome {
        VertexOutcome {
            status: OutcomeStatus::Built,
            reused_from_cache: false,
            error: None,
            cause: None,
            duration_ms: 1,
            results: Fields::new(),
        }
    }

    fn run() -> RunResult {
        let order = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        RunResult::new(order, vec!["B".to_string(), "C".to_string()])
    }

    #[test]
    fn test_success_policies() {
        let mut result = run();
        result.record("A", built());
        result.record("B", built());
        result.record(
            "C",
            VertexOutcome::failed(&ComponentBuildError::new("boom").into(), 0),
        );

        assert!(!result.is_success(SuccessPolicy::AllBuilt));
        assert!(result.is_success(SuccessPolicy::AnyTerminalBuilt));
        assert_eq!(result.built(), vec!["A", "B"]);
        assert_eq!(result.failed(), vec!["C"]);
        assert_eq!(result.outcome("C").unwrap().cause.as_deref(), Some("build-error"));
    }

    #[test]
    fn test_cancelled_outcome_status() {
        let outcome = VertexOutcome::failed(&VertexError::Cancelled, 0);
        assert_eq!(outcome.status, OutcomeStatus::Cancelled);
    }

    #[test]
    fn test_save_load_and_list() {
        let dir = tempfile::tempdir().unwrap();

        let mut first = run();
        first.run_id = "2026-01-01-00-00-00-000".to_string();
        first.record("A", built());
        first.end();
        first.save_to(dir.path()).unwrap();

        let mut second = run();
        second.run_id = "2026-01-02-00-00-00-000".to_string();
        second.save_to(dir.path()).unwrap();

        assert_eq!(
            RunResult::list_runs(dir.path()).unwrap(),
            vec!["2026-01-02-00-00-00-000", "2026-01-01-00-00-00-000"]
        );
        let latest = RunResult::load_latest(dir.path()).unwrap();
        assert_eq!(latest.run_id, second.run_id);

        let loaded = RunResult::load_from(&dir.path().join("2026-01-01-00-00-00-000.json")).unwrap();
        assert_eq!(loaded.outcomes["A"], built());
        assert!(loaded.ended_at.is_some());
    }

    #[test]
    fn test_list_runs_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunResult::list_runs(&dir.path().join("none")).unwrap().is_empty());
    }
}

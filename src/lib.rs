//! vertexflow - Vertex build scheduler and component isolation core
//!
//! Orders and builds the vertices of a workflow graph, caches per-vertex
//! results across runs, and decides for each vertex whether its backing code
//! is trusted core code or sandboxed custom code.

pub mod cache;
pub mod components;
pub mod config;
pub mod core;
pub mod error;
pub mod run;
pub mod sandbox;
pub mod tracer;

// Re-exports
pub use cache::{CacheEntry, CacheStore, FileCacheStore, MemoryCacheStore};
pub use components::{BuildOutput, Component, ComponentRegistry};
pub use config::EngineConfig;
pub use self::core::{BuildContext, BuildEvent, Fields, Graph, Scheduler, SchedulerConfig, SharedContext, Vertex};
pub use error::{CycleError, SecurityViolationError, VertexError};
pub use run::{OutcomeStatus, RunResult, SuccessPolicy, VertexOutcome};
pub use sandbox::{Classification, ComponentIsolation, IsolationLevel};

use std::sync::Arc;

/// Result type alias
pub type Result<T> = anyhow::Result<T>;

/// Engine - wires configuration into the isolation service and scheduler
pub struct Engine {
    config: EngineConfig,
    isolation: Arc<ComponentIsolation>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let isolation = match &config.catalog_index {
            Some(path) => ComponentIsolation::new(sandbox::FileCatalogLoader::new(path)),
            None => ComponentIsolation::without_catalog(),
        }
        .with_overrides(config.policy.clone());

        Self {
            config,
            isolation: Arc::new(isolation),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn isolation(&self) -> &Arc<ComponentIsolation> {
        &self.isolation
    }

    /// Scheduler using the configured cache directory and a log tracer
    pub fn scheduler(&self) -> Scheduler {
        let scheduler = Scheduler::new(self.config.scheduler_config(), self.isolation.clone())
            .with_tracer(Arc::new(tracer::LogTracer::new()));
        match &self.config.cache_dir {
            Some(dir) => scheduler.with_cache(Arc::new(FileCacheStore::new(dir))),
            None => scheduler,
        }
    }
}

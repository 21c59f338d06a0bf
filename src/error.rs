//! Error types for vertexflow
//!
//! Structural errors (`CycleError`, `GraphError`) stop a run before dispatch.
//! Everything else is scoped to a single vertex and ends up in `VertexError`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::sandbox::IsolationLevel;

/// Cycle among non-loop vertices
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cycle detected among vertices: {}", .vertices.join(" -> "))]
pub struct CycleError {
    pub vertices: Vec<String>,
}

/// Errors raised while assembling a graph from a flow description
#[derive(Error, Debug)]
pub enum GraphError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Duplicate vertex id: {0}")]
    DuplicateVertex(String),

    #[error("Edge references unknown vertex: {0}")]
    UnknownVertex(String),

    #[error("Unknown component type '{component_type}' for vertex {vertex_id}")]
    UnknownComponent {
        vertex_id: String,
        component_type: String,
    },

    #[error("Vertex {vertex_id} ({component_type}) has no output named '{output}'")]
    UnknownOutput {
        vertex_id: String,
        component_type: String,
        output: String,
    },
}

/// What kind of reference tripped the isolation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    Module,
    Builtin,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => write!(f, "Module"),
            Self::Builtin => write!(f, "Builtin"),
        }
    }
}

/// Custom component source referenced something its isolation level forbids
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} '{name}' is blocked at {level} isolation ({rule}, line {line})")]
pub struct SecurityViolationError {
    pub kind: ViolationKind,
    pub name: String,
    pub rule: String,
    pub level: IsolationLevel,
    pub line: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("Empty source code cannot be hashed")]
    EmptySource,
}

/// Catalog index could not be read or is malformed
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog index {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog index is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Corrupt catalog index: {0}")]
    Corrupt(String),
}

/// Restoring a vertex from a cache entry failed; always recovered by a rebuild
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheRestorationError {
    #[error("Cache entry is missing field '{0}'")]
    MissingField(String),

    #[error("Cache entry was not marked built")]
    NotBuilt,

    #[error("Cached results are missing declared output '{0}'")]
    MissingOutput(String),
}

#[derive(Error, Debug)]
pub enum CacheStoreError {
    #[error("Cache IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raised by a component's own build logic
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ComponentBuildError {
    pub message: String,
}

impl ComponentBuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn missing_input(name: &str) -> Self {
        Self::new(format!("Missing required input '{}'", name))
    }

    pub fn missing_output(name: &str) -> Self {
        Self::new(format!("Build did not produce declared output '{}'", name))
    }
}

#[derive(Error, Debug)]
#[error("Tracer unavailable: {0}")]
pub struct TracerError(pub String);

/// Why a vertex ended in the `Failed` state
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexError {
    #[error("Error building component: {0}")]
    Build(#[from] ComponentBuildError),

    #[error(transparent)]
    Security(#[from] SecurityViolationError),

    #[error("Blocked by failed dependency {dependency}")]
    BlockedBy { dependency: String },

    #[error("Build cancelled")]
    Cancelled,
}

impl VertexError {
    /// Short machine-friendly label used in run summaries
    pub fn cause(&self) -> &'static str {
        match self {
            Self::Build(_) => "build-error",
            Self::Security(_) => "security-violation",
            Self::BlockedBy { .. } => "blocked-by-dependency",
            Self::Cancelled => "cancelled",
        }
    }
}

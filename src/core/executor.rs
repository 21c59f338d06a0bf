//! Vertex executor - drives one vertex through its build transitions
//!
//! The executor works on an owned copy of the vertex so builds can run on the
//! tokio pool while the scheduler keeps the graph; the finished vertex is
//! handed back and swapped into the graph.

use super::context::{BuildContext, Fields, SharedContext};
use super::vertex::{BuildPlan, RestorationFailed, Vertex};
use crate::cache::{fingerprint, CacheStore};
use crate::error::{SecurityViolationError, VertexError};
use crate::sandbox::{Classification, ComponentIsolation, IsolationLevel, ValidatedSource};
use crate::tracer::{SpanOutcome, Tracer};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Vertex build event
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Started { vertex_id: String },
    /// Result taken from the cache or kept from a previous pass
    Reused { vertex_id: String },
    Finished { vertex_id: String, duration_ms: u64 },
    Failed { vertex_id: String, error: String },
}

/// Vertex handed back by the executor
#[derive(Debug)]
pub struct Completed {
    pub vertex: Vertex,
    pub duration_ms: u64,
}

/// Builds vertices against one run's cache, tracer and isolation settings
#[derive(Clone)]
pub struct Executor {
    isolation: Arc<ComponentIsolation>,
    level: IsolationLevel,
    cache: Option<Arc<dyn CacheStore>>,
    tracer: Arc<dyn Tracer>,
    shared: SharedContext,
    cancel: CancellationToken,
    event_tx: Option<mpsc::UnboundedSender<BuildEvent>>,
}

impl Executor {
    pub fn new(
        isolation: Arc<ComponentIsolation>,
        level: IsolationLevel,
        tracer: Arc<dyn Tracer>,
        shared: SharedContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            isolation,
            level,
            cache: None,
            tracer,
            shared,
            cancel,
            event_tx: None,
        }
    }

    pub fn with_cache(mut self, cache: Option<Arc<dyn CacheStore>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_events(mut self, event_tx: Option<mpsc::UnboundedSender<BuildEvent>>) -> Self {
        self.event_tx = event_tx;
        self
    }

    pub(crate) fn emit(&self, event: BuildEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Run the restore-or-build transitions for one vertex
    pub async fn build_vertex(&self, mut vertex: Vertex, inputs: Fields) -> Completed {
        let started = Instant::now();
        self.emit(BuildEvent::Started {
            vertex_id: vertex.id.clone(),
        });
        if let Err(e) = self
            .tracer
            .start_span(&vertex.id, &vertex.display_name, &inputs)
        {
            log::warn!("Tracer failed to start span for {}: {}", vertex.id, e);
        }

        let fingerprint = fingerprint(
            &vertex.component_type,
            vertex.source.as_ref(),
            &vertex.params,
            &inputs,
        );

        // Isolation is resolved before any transition, cached or not
        let mut reused = false;
        match self.resolve_source(&vertex) {
            Err(violation) => vertex.fail(violation.into()),
            Ok(source) => {
                if vertex.plan() == BuildPlan::Restore {
                    reused = self.restore(&mut vertex, &fingerprint).await;
                }
                if !reused {
                    self.build(&mut vertex, inputs, source).await;
                    if vertex.built() && !vertex.is_loop {
                        self.store(&vertex, &fingerprint).await;
                    }
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let outcome = match vertex.error() {
            None => SpanOutcome::Built { reused },
            Some(VertexError::Cancelled) => SpanOutcome::Cancelled,
            Some(error) => SpanOutcome::Failed {
                error: error.to_string(),
            },
        };
        if let Err(e) = self.tracer.end_span(&vertex.id, &outcome) {
            log::warn!("Tracer failed to end span for {}: {}", vertex.id, e);
        }

        match vertex.error() {
            Some(error) => {
                log::warn!("Vertex {} failed: {}", vertex.id, error);
                self.emit(BuildEvent::Failed {
                    vertex_id: vertex.id.clone(),
                    error: error.to_string(),
                });
            }
            None if reused => self.emit(BuildEvent::Reused {
                vertex_id: vertex.id.clone(),
            }),
            None => {
                log::info!("Vertex {} built in {}ms", vertex.id, duration_ms);
                self.emit(BuildEvent::Finished {
                    vertex_id: vertex.id.clone(),
                    duration_ms,
                });
            }
        }

        Completed {
            vertex,
            duration_ms,
        }
    }

    /// Try the cache; returns whether the vertex ended up built from it
    async fn restore(&self, vertex: &mut Vertex, fingerprint: &str) -> bool {
        let entry = match &self.cache {
            Some(cache) => match cache.get(&vertex.id, fingerprint).await {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Cache read failed for {}, rebuilding: {}", vertex.id, e);
                    None
                }
            },
            None => None,
        };

        let Some(entry) = entry else {
            log::debug!("Cache miss for frozen vertex {}", vertex.id);
            vertex.mark_cache_miss();
            return false;
        };

        match vertex.restore(entry) {
            Ok(_) => {
                log::info!("Vertex {} restored from cache", vertex.id);
                true
            }
            Err(RestorationFailed(e)) => {
                log::warn!("Discarding cache entry for {}, rebuilding: {}", vertex.id, e);
                false
            }
        }
    }

    /// Classify the vertex source and check it against the current level
    pub(crate) fn resolve_source(
        &self,
        vertex: &Vertex,
    ) -> Result<Option<ValidatedSource>, SecurityViolationError> {
        vertex
            .source
            .as_ref()
            .map(|source| self.isolation.validate(source, self.level))
            .transpose()
    }

    async fn build(&self, vertex: &mut Vertex, inputs: Fields, source: Option<ValidatedSource>) {
        if self.cancel.is_cancelled() {
            vertex.fail(VertexError::Cancelled);
            return;
        }

        let policy = match source.as_ref().map(|s| s.classification) {
            Some(Classification::Custom) => Some(self.isolation.policy(self.level)),
            _ => None,
        };

        let ctx = BuildContext {
            vertex_id: vertex.id.clone(),
            display_name: vertex.display_name.clone(),
            params: vertex.params.clone(),
            shared: self.shared.clone(),
            cancel: self.cancel.child_token(),
            source,
            policy,
        };

        vertex.start_build();
        let component = vertex.component().clone();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(VertexError::Cancelled),
            result = component.build(&ctx, inputs) => result.map_err(VertexError::from),
        };
        vertex.complete_build(outcome);
    }

    async fn store(&self, vertex: &Vertex, fingerprint: &str) {
        let (Some(cache), Some(entry)) = (&self.cache, vertex.cache_entry()) else {
            return;
        };
        if let Err(e) = cache.put(&vertex.id, fingerprint, entry).await {
            log::warn!("Cache write failed for {}: {}", vertex.id, e);
        }
    }
}

//! Build scheduler - dependency-driven concurrent vertex builds

use super::context::SharedContext;
use super::executor::{BuildEvent, Completed, Executor};
use super::graph::Graph;
use super::vertex::BuildPlan;
use crate::cache::CacheStore;
use crate::error::{ComponentBuildError, CycleError, VertexError};
use crate::run::{RunResult, VertexOutcome};
use crate::sandbox::{ComponentIsolation, IsolationLevel};
use crate::tracer::{NoopTracer, Tracer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on builds in flight
    pub max_concurrency: usize,
    pub isolation_level: IsolationLevel,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            isolation_level: IsolationLevel::default(),
        }
    }
}

type JobResult = Result<Completed, (String, String)>;

/// Runs scheduling passes over a graph
pub struct Scheduler {
    config: SchedulerConfig,
    isolation: Arc<ComponentIsolation>,
    cache: Option<Arc<dyn CacheStore>>,
    tracer: Arc<dyn Tracer>,
    shared: SharedContext,
    cancel: CancellationToken,
    event_tx: Option<mpsc::UnboundedSender<BuildEvent>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, isolation: Arc<ComponentIsolation>) -> Self {
        Self {
            config,
            isolation,
            cache: None,
            tracer: Arc::new(NoopTracer),
            shared: SharedContext::new(),
            cancel: CancellationToken::new(),
            event_tx: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_shared_context(mut self, shared: SharedContext) -> Self {
        self.shared = shared;
        self
    }

    /// Receive build events for every following run
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<BuildEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_tx = Some(tx);
        rx
    }

    /// Cancelling the token stops dispatch for this and all later runs
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shared_context(&self) -> &SharedContext {
        &self.shared
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn executor(&self) -> Executor {
        Executor::new(
            self.isolation.clone(),
            self.config.isolation_level,
            self.tracer.clone(),
            self.shared.clone(),
            self.cancel.clone(),
        )
        .with_cache(self.cache.clone())
        .with_events(self.event_tx.clone())
    }

    /// Run one scheduling pass
    ///
    /// Only a cycle stops the run before dispatch; every other failure is
    /// recorded per vertex.
    pub async fn run(&self, graph: &mut Graph) -> Result<RunResult, CycleError> {
        let order = graph.build_order()?;
        let predecessors = graph.predecessor_map();
        graph.begin_pass();

        let mut run = RunResult::new(order.clone(), graph.terminal_vertices());
        let executor = self.executor();
        let max_concurrency = self.config.max_concurrency.max(1);
        let mut pending = order;
        let mut join_set: JoinSet<JobResult> = JoinSet::new();

        log::info!(
            "Starting run {} over {} vertices (concurrency {})",
            run.run_id,
            pending.len(),
            max_concurrency
        );

        loop {
            if !self.cancel.is_cancelled() {
                self.dispatch(
                    graph,
                    &predecessors,
                    &mut pending,
                    &mut join_set,
                    &executor,
                    &mut run,
                );
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            match joined {
                Ok(Ok(Completed { vertex, duration_ms })) => {
                    let id = vertex.id.clone();
                    if let Some(outcome) = VertexOutcome::from_vertex(&vertex, duration_ms) {
                        run.record(&id, outcome);
                    }
                    if let Some(slot) = graph.vertex_mut(&id) {
                        *slot = vertex;
                    }
                }
                Ok(Err((id, panic))) => {
                    log::error!("Build task for vertex {} panicked: {}", id, panic);
                    let error: VertexError =
                        ComponentBuildError::new(format!("build panicked: {}", panic)).into();
                    run.record(&id, VertexOutcome::failed(&error, 0));
                    if let Some(vertex) = graph.vertex_mut(&id) {
                        vertex.fail(error);
                    }
                }
                Err(e) => log::error!("Build task join error: {}", e),
            }
        }

        for id in pending.drain(..) {
            if let Some(vertex) = graph.vertex_mut(&id) {
                vertex.fail(VertexError::Cancelled);
            }
            run.record(&id, VertexOutcome::failed(&VertexError::Cancelled, 0));
        }

        run.end();
        log::info!(
            "Run {} finished: {} built, {} failed, {} cancelled",
            run.run_id,
            run.built().len(),
            run.failed().len(),
            run.cancelled().len()
        );
        Ok(run)
    }

    /// Start every ready vertex, in build-order priority, up to the ceiling
    fn dispatch(
        &self,
        graph: &mut Graph,
        predecessors: &HashMap<String, Vec<String>>,
        pending: &mut Vec<String>,
        join_set: &mut JoinSet<JobResult>,
        executor: &Executor,
        run: &mut RunResult,
    ) {
        let max_concurrency = self.config.max_concurrency.max(1);
        let mut i = 0;
        while i < pending.len() && join_set.len() < max_concurrency {
            let needs = predecessors
                .get(&pending[i])
                .map(Vec::as_slice)
                .unwrap_or_default();
            let waiting = needs
                .iter()
                .any(|p| graph.vertex(p).map(|v| !v.is_terminal()).unwrap_or(false));
            if waiting {
                i += 1;
                continue;
            }

            let id = pending.remove(i);
            let failed_dependency = needs
                .iter()
                .find(|p| graph.vertex(p).map(|v| !v.built()).unwrap_or(false))
                .cloned();
            let Some(vertex) = graph.vertex_mut(&id) else {
                continue;
            };

            let blocked = match failed_dependency {
                Some(dependency) => Some(VertexError::BlockedBy { dependency }),
                None if vertex.plan() == BuildPlan::Reuse => {
                    executor.resolve_source(vertex).err().map(VertexError::from)
                }
                None => None,
            };
            if let Some(error) = blocked {
                log::warn!("Vertex {} not built: {}", id, error);
                executor.emit(BuildEvent::Failed {
                    vertex_id: id.clone(),
                    error: error.to_string(),
                });
                run.record(&id, VertexOutcome::failed(&error, 0));
                vertex.fail(error);
                continue;
            }

            if vertex.plan() == BuildPlan::Reuse {
                log::debug!("Reusing frozen vertex {} from previous pass", id);
                vertex.reuse();
                if let Some(outcome) = VertexOutcome::from_vertex(vertex, 0) {
                    run.record(&id, outcome);
                }
                executor.emit(BuildEvent::Reused { vertex_id: id });
                continue;
            }

            let vertex = vertex.clone();
            let inputs = graph.inputs_for(&id);
            let executor = executor.clone();
            log::debug!("Dispatching vertex {}", id);

            join_set.spawn(async move {
                let handle = tokio::spawn(async move { executor.build_vertex(vertex, inputs).await });
                handle.await.map_err(|e| (id, e.to_string()))
            });
        }
    }
}

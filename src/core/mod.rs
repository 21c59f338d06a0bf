//! Core engine - graph model, vertex state machine, build scheduling

mod context;
mod executor;
mod graph;
mod scheduler;
mod vertex;

pub use context::{BuildContext, Fields, SharedContext};
pub use executor::{BuildEvent, Completed, Executor};
pub use graph::{Edge, EdgeDescription, FlowDescription, Graph, NodeDescription};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use vertex::{BuildPhase, BuildPlan, RestorationFailed, Restored, ResultData, Vertex, VertexState};

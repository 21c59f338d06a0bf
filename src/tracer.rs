//! Build tracing hooks
//!
//! A tracer observes vertex builds. Tracer failures are logged by the caller
//! and never affect the build outcome.

use crate::core::Fields;
use crate::error::TracerError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// How a traced build ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanOutcome {
    Built { reused: bool },
    Failed { error: String },
    Cancelled,
}

pub trait Tracer: Send + Sync {
    fn start_span(&self, vertex_id: &str, name: &str, inputs: &Fields) -> Result<(), TracerError>;

    fn end_span(&self, vertex_id: &str, outcome: &SpanOutcome) -> Result<(), TracerError>;
}

/// Discards every span
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, _vertex_id: &str, _name: &str, _inputs: &Fields) -> Result<(), TracerError> {
        Ok(())
    }

    fn end_span(&self, _vertex_id: &str, _outcome: &SpanOutcome) -> Result<(), TracerError> {
        Ok(())
    }
}

/// Writes spans to the `log` facade with their wall-clock duration
#[derive(Debug, Default)]
pub struct LogTracer {
    open: Mutex<HashMap<String, (String, Instant)>>,
}

impl LogTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for LogTracer {
    fn start_span(&self, vertex_id: &str, name: &str, inputs: &Fields) -> Result<(), TracerError> {
        log::debug!("span start: {} ({}) with {} inputs", vertex_id, name, inputs.len());
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(vertex_id.to_string(), (name.to_string(), Instant::now()));
        Ok(())
    }

    fn end_span(&self, vertex_id: &str, outcome: &SpanOutcome) -> Result<(), TracerError> {
        let (name, started) = self
            .open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(vertex_id)
            .ok_or_else(|| TracerError(format!("no open span for vertex {}", vertex_id)))?;

        log::info!(
            "span end: {} ({}) {:?} in {}ms",
            vertex_id,
            name,
            outcome,
            started.elapsed().as_millis()
        );
        Ok(())
    }
}

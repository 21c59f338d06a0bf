//! Vertex - one component instance and its build state
//!
//! `built` and `result` are not stored flags; both are read off [`VertexState`],
//! so a vertex can only report `built() == true` while it owns a result.
//! Cache restoration stages the cached output in `CacheHit` and commits it to
//! `Built` only after `finalize_build` accepts it. Any failure moves the vertex
//! to `CacheMiss`, which is exactly where a vertex without a cache entry is.

use super::context::Fields;
use crate::cache::CacheEntry;
use crate::components::{BuildOutput, Component};
use crate::error::{CacheRestorationError, ComponentBuildError, VertexError};
use crate::sandbox::ComponentSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Outcome data of a built vertex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultData {
    pub vertex_id: String,
    pub display_name: String,
    pub results: Fields,
    pub artifacts: Fields,
    /// Result came from the cache or from a previous pass, not a fresh build
    pub used_frozen_result: bool,
}

/// Build state of a vertex within one scheduling pass
#[derive(Debug, Clone, PartialEq)]
pub enum VertexState {
    Unbuilt,
    /// Cached output restored, waiting for `finalize_build`
    CacheHit(BuildOutput),
    /// No usable cache entry; carries the restoration error if there was one
    CacheMiss(Option<CacheRestorationError>),
    Building,
    Built { output: BuildOutput, result: ResultData },
    Failed(VertexError),
}

impl VertexState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unbuilt => "unbuilt",
            Self::CacheHit(_) => "cache-hit",
            Self::CacheMiss(_) => "cache-miss",
            Self::Building => "building",
            Self::Built { .. } => "built",
            Self::Failed(_) => "failed",
        }
    }
}

/// Transitions a vertex went through in the current pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildPhase {
    CacheHit,
    CacheMiss,
    RestorationFailed,
    Reused,
    Building,
    Built,
    Failed,
}

/// What the scheduler should do with a vertex this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPlan {
    /// Frozen and already built in memory
    Reuse,
    /// Frozen, try the cache first
    Restore,
    /// Build from scratch
    Build,
}

/// Cached output was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restored;

/// Cached output was rejected; the vertex is back to `CacheMiss`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorationFailed(pub CacheRestorationError);

#[derive(Clone)]
pub struct Vertex {
    pub id: String,
    pub component_type: String,
    pub display_name: String,
    pub is_loop: bool,
    pub frozen: bool,
    pub params: Fields,
    pub source: Option<ComponentSource>,
    component: Arc<dyn Component>,
    state: VertexState,
    phases: Vec<BuildPhase>,
}

impl Vertex {
    pub fn new(
        id: impl Into<String>,
        component_type: impl Into<String>,
        display_name: impl Into<String>,
        component: Arc<dyn Component>,
    ) -> Self {
        let display_name = display_name.into();
        Self {
            id: id.into(),
            component_type: component_type.into(),
            is_loop: component.is_loop() || display_name == "Loop",
            display_name,
            frozen: false,
            params: Fields::new(),
            source: component.source(),
            component,
            state: VertexState::Unbuilt,
            phases: Vec::new(),
        }
    }

    pub fn with_frozen(mut self, frozen: bool) -> Self {
        self.frozen = frozen;
        self
    }

    pub fn with_params(mut self, params: Fields) -> Self {
        self.params = params;
        self
    }

    /// Override the component's own source, e.g. with user-edited code
    pub fn with_source(mut self, source: ComponentSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_loop(mut self, is_loop: bool) -> Self {
        self.is_loop = self.is_loop || is_loop;
        self
    }

    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }

    pub fn outputs(&self) -> Vec<String> {
        self.component.outputs()
    }

    pub fn state(&self) -> &VertexState {
        &self.state
    }

    pub fn phases(&self) -> &[BuildPhase] {
        &self.phases
    }

    pub fn built(&self) -> bool {
        matches!(self.state, VertexState::Built { .. })
    }

    /// Success or error outcome; `None` until the vertex reaches a terminal state
    pub fn result(&self) -> Option<Result<&ResultData, &VertexError>> {
        match &self.state {
            VertexState::Built { result, .. } => Some(Ok(result)),
            VertexState::Failed(error) => Some(Err(error)),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.result().is_some()
    }

    /// Artifacts of the completed build
    pub fn output(&self) -> Option<&BuildOutput> {
        match &self.state {
            VertexState::Built { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn results(&self) -> Option<&Fields> {
        self.output().map(|o| &o.results)
    }

    pub fn error(&self) -> Option<&VertexError> {
        match &self.state {
            VertexState::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Snapshot for the cache store; only built vertices have one
    pub fn cache_entry(&self) -> Option<CacheEntry> {
        self.output().map(CacheEntry::from_output)
    }

    /// Reset for a new scheduling pass
    ///
    /// Frozen vertices keep a successful build from the previous pass;
    /// everything else starts over.
    pub fn begin_pass(&mut self) {
        self.phases.clear();
        if !(self.frozen && self.built()) {
            self.state = VertexState::Unbuilt;
        }
    }

    pub fn plan(&self) -> BuildPlan {
        if !self.frozen || self.is_loop {
            BuildPlan::Build
        } else if self.built() {
            BuildPlan::Reuse
        } else {
            BuildPlan::Restore
        }
    }

    /// Keep the in-memory result of a frozen vertex
    pub fn reuse(&mut self) {
        if let VertexState::Built { result, .. } = &mut self.state {
            result.used_frozen_result = true;
            self.phases.push(BuildPhase::Reused);
        }
    }

    pub fn mark_cache_miss(&mut self) {
        self.state = VertexState::CacheMiss(None);
        self.phases.push(BuildPhase::CacheMiss);
    }

    /// Apply a cache entry; on any failure the vertex is left unbuilt
    pub fn restore(&mut self, entry: CacheEntry) -> Result<Restored, RestorationFailed> {
        self.phases.push(BuildPhase::CacheHit);

        let staged = match entry.into_output() {
            Ok(output) => output,
            Err(e) => return Err(self.reject_restoration(e)),
        };
        self.state = VertexState::CacheHit(staged.clone());

        match self.finalize_build(&staged, true) {
            Ok(result) => {
                self.state = VertexState::Built {
                    output: staged,
                    result,
                };
                self.phases.push(BuildPhase::Built);
                Ok(Restored)
            }
            Err(missing) => Err(self.reject_restoration(CacheRestorationError::MissingOutput(missing))),
        }
    }

    fn reject_restoration(&mut self, error: CacheRestorationError) -> RestorationFailed {
        log::debug!("Cache restoration failed for vertex {}: {}", self.id, error);
        self.state = VertexState::CacheMiss(Some(error.clone()));
        self.phases.push(BuildPhase::RestorationFailed);
        RestorationFailed(error)
    }

    pub fn start_build(&mut self) {
        self.state = VertexState::Building;
        self.phases.push(BuildPhase::Building);
    }

    /// Record the component's build outcome
    pub fn complete_build(&mut self, outcome: Result<BuildOutput, VertexError>) {
        match outcome {
            Ok(output) => match self.finalize_build(&output, false) {
                Ok(result) => {
                    self.state = VertexState::Built { output, result };
                    self.phases.push(BuildPhase::Built);
                }
                Err(missing) => {
                    self.fail(ComponentBuildError::missing_output(&missing).into());
                }
            },
            Err(error) => self.fail(error),
        }
    }

    pub fn fail(&mut self, error: VertexError) {
        self.state = VertexState::Failed(error);
        self.phases.push(BuildPhase::Failed);
    }

    /// Check the output is consumable and produce the result record
    ///
    /// Returns the name of the first declared output missing from `results`.
    fn finalize_build(&self, output: &BuildOutput, reused: bool) -> Result<ResultData, String> {
        if let Some(missing) = self
            .component
            .outputs()
            .into_iter()
            .find(|name| !output.results.contains_key(name))
        {
            return Err(missing);
        }

        Ok(ResultData {
            vertex_id: self.id.clone(),
            display_name: self.display_name.clone(),
            results: output.results.clone(),
            artifacts: output.artifacts.clone(),
            used_frozen_result: reused,
        })
    }
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id)
            .field("component_type", &self.component_type)
            .field("display_name", &self.display_name)
            .field("is_loop", &self.is_loop)
            .field("frozen", &self.frozen)
            .field("state", &self.state.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Constant, Counter};
    use serde_json::json;

    fn constant_vertex(frozen: bool) -> Vertex {
        Vertex::new("A", "Constant", "A", Arc::new(Constant)).with_frozen(frozen)
    }

    fn full_entry() -> CacheEntry {
        CacheEntry::from_output(&BuildOutput::new().with_result("value", json!(7)))
    }

    #[test]
    fn test_plan_transitions() {
        assert_eq!(constant_vertex(false).plan(), BuildPlan::Build);
        assert_eq!(constant_vertex(true).plan(), BuildPlan::Restore);

        let mut frozen = constant_vertex(true);
        frozen.restore(full_entry()).unwrap();
        assert_eq!(frozen.plan(), BuildPlan::Reuse);

        let mut looped = Vertex::new("L", "Loop", "Loop", Arc::new(Counter)).with_frozen(true);
        assert_eq!(looped.plan(), BuildPlan::Build);
        looped.start_build();
        looped.complete_build(Ok(BuildOutput::new()
            .with_result("item", json!(1))
            .with_result("done", json!(false))));
        assert!(looped.built());
        assert_eq!(looped.plan(), BuildPlan::Build);
    }

    #[test]
    fn test_display_name_loop_is_loop() {
        let v = Vertex::new("x", "Constant", "Loop", Arc::new(Constant));
        assert!(v.is_loop);
    }

    #[test]
    fn test_successful_restore_marks_frozen_result() {
        let mut v = constant_vertex(true);
        assert_eq!(v.restore(full_entry()), Ok(Restored));
        assert!(v.built());
        let result = v.result().unwrap().unwrap();
        assert!(result.used_frozen_result);
        assert_eq!(result.results["value"], json!(7));
        assert_eq!(v.phases(), &[BuildPhase::CacheHit, BuildPhase::Built]);
    }

    #[test]
    fn test_incomplete_entry_resets_built() {
        let mut v = constant_vertex(true);
        let mut entry = full_entry();
        entry.results = None;

        let err = v.restore(entry).unwrap_err();
        assert_eq!(err.0, CacheRestorationError::MissingField("results".to_string()));
        assert!(!v.built());
        assert!(v.result().is_none());
        assert!(matches!(v.state(), VertexState::CacheMiss(Some(_))));
    }

    #[test]
    fn test_finalize_failure_resets_built() {
        let mut v = constant_vertex(true);
        // Complete entry, but the declared output is missing
        let entry = CacheEntry::from_output(&BuildOutput::new().with_result("other", json!(1)));

        let err = v.restore(entry).unwrap_err();
        assert_eq!(err.0, CacheRestorationError::MissingOutput("value".to_string()));
        assert!(!v.built());
        assert_eq!(v.plan(), BuildPlan::Restore);
        assert_eq!(
            v.phases(),
            &[BuildPhase::CacheHit, BuildPhase::RestorationFailed]
        );

        // The rebuild that follows goes all the way through
        v.start_build();
        v.complete_build(Ok(BuildOutput::new().with_result("value", json!(1))));
        assert!(v.built());
        assert!(!v.result().unwrap().unwrap().used_frozen_result);
    }

    #[test]
    fn test_build_missing_declared_output_fails() {
        let mut v = constant_vertex(false);
        v.start_build();
        v.complete_build(Ok(BuildOutput::new()));
        assert!(!v.built());
        let err = v.result().unwrap().unwrap_err();
        assert!(err.to_string().contains("declared output 'value'"));
    }

    #[test]
    fn test_begin_pass_keeps_only_frozen_builds() {
        let mut frozen = constant_vertex(true);
        frozen.restore(full_entry()).unwrap();
        frozen.begin_pass();
        assert!(frozen.built());
        assert!(frozen.phases().is_empty());

        let mut live = constant_vertex(false);
        live.start_build();
        live.complete_build(Ok(BuildOutput::new().with_result("value", json!(1))));
        live.begin_pass();
        assert!(!live.built());
        assert_eq!(live.state(), &VertexState::Unbuilt);
    }
}

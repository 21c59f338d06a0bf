//! Component contract and the built-in component registry
//!
//! Every vertex is backed by a [`Component`]. Integrations live outside this
//! crate; the built-ins here are the small generic pieces flows need to be
//! runnable from the CLI.

use crate::core::{BuildContext, Fields};
use crate::error::ComponentBuildError;
use crate::sandbox::ComponentSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a successful build produces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub artifacts: Fields,
    pub built_object: Fields,
    pub built_result: Fields,
    pub full_data: Fields,
    /// Named outputs consumed by downstream edges
    pub results: Fields,
}

impl BuildOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a named output, mirroring it into `built_result`
    pub fn with_result(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        self.built_result.insert(name.clone(), value.clone());
        self.results.insert(name, value);
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, value: Value) -> Self {
        self.artifacts.insert(name.into(), value);
        self
    }
}

/// Contract implemented by every vertex's backing code
#[async_trait]
pub trait Component: Send + Sync {
    /// Output field names, known before execution so edges can be validated
    fn outputs(&self) -> Vec<String>;

    fn is_loop(&self) -> bool {
        false
    }

    /// Source text backing this component, if any
    fn source(&self) -> Option<ComponentSource> {
        None
    }

    async fn build(
        &self,
        ctx: &BuildContext,
        inputs: Fields,
    ) -> Result<BuildOutput, ComponentBuildError>;
}

/// Component types available to a flow
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    components: HashMap<String, Arc<dyn Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in components
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("Constant", Constant);
        registry.register("Passthrough", Passthrough);
        registry.register("Merge", Merge);
        registry.register("Loop", Counter);
        registry
    }

    pub fn register(&mut self, component_type: impl Into<String>, component: impl Component + 'static) {
        self.components
            .insert(component_type.into(), Arc::new(component));
    }

    pub fn register_arc(&mut self, component_type: impl Into<String>, component: Arc<dyn Component>) {
        self.components.insert(component_type.into(), component);
    }

    pub fn get(&self, component_type: &str) -> Option<Arc<dyn Component>> {
        self.components.get(component_type).cloned()
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.components.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("types", &self.types())
            .finish()
    }
}

/// Emits its `value` parameter
pub struct Constant;

#[async_trait]
impl Component for Constant {
    fn outputs(&self) -> Vec<String> {
        vec!["value".to_string()]
    }

    async fn build(&self, ctx: &BuildContext, _inputs: Fields) -> Result<BuildOutput, ComponentBuildError> {
        let value = ctx.params.get("value").cloned().unwrap_or(Value::Null);
        Ok(BuildOutput::new().with_result("value", value))
    }
}

/// Forwards its `input` to `output`
pub struct Passthrough;

#[async_trait]
impl Component for Passthrough {
    fn outputs(&self) -> Vec<String> {
        vec!["output".to_string()]
    }

    async fn build(&self, _ctx: &BuildContext, inputs: Fields) -> Result<BuildOutput, ComponentBuildError> {
        let value = inputs
            .get("input")
            .cloned()
            .ok_or_else(|| ComponentBuildError::missing_input("input"))?;
        Ok(BuildOutput::new().with_result("output", value))
    }
}

/// Collects every input into one object
pub struct Merge;

#[async_trait]
impl Component for Merge {
    fn outputs(&self) -> Vec<String> {
        vec!["merged".to_string()]
    }

    async fn build(&self, _ctx: &BuildContext, inputs: Fields) -> Result<BuildOutput, ComponentBuildError> {
        let merged: serde_json::Map<String, Value> = inputs.into_iter().collect();
        Ok(BuildOutput::new()
            .with_artifact("count", json!(merged.len()))
            .with_result("merged", Value::Object(merged)))
    }
}

/// Loop component: advances a per-vertex counter kept in the shared context
pub struct Counter;

#[async_trait]
impl Component for Counter {
    fn outputs(&self) -> Vec<String> {
        vec!["item".to_string(), "done".to_string()]
    }

    fn is_loop(&self) -> bool {
        true
    }

    async fn build(&self, ctx: &BuildContext, _inputs: Fields) -> Result<BuildOutput, ComponentBuildError> {
        let limit = ctx.params.get("limit").and_then(Value::as_u64).unwrap_or(u64::MAX);
        let key = format!("{}.iteration", ctx.vertex_id);
        let iteration = ctx
            .shared
            .update(&key, |v| json!(v.and_then(Value::as_u64).unwrap_or(0) + 1))
            .as_u64()
            .unwrap_or(0);

        Ok(BuildOutput::new()
            .with_result("item", json!(iteration))
            .with_result("done", json!(iteration >= limit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SharedContext;
    use tokio_util::sync::CancellationToken;

    fn ctx(params: Fields) -> BuildContext {
        BuildContext {
            vertex_id: "v1".to_string(),
            display_name: "V1".to_string(),
            params,
            shared: SharedContext::new(),
            cancel: CancellationToken::new(),
            source: None,
            policy: None,
        }
    }

    #[tokio::test]
    async fn test_constant_and_passthrough() {
        let mut params = Fields::new();
        params.insert("value".to_string(), json!("hello"));
        let out = Constant.build(&ctx(params), Fields::new()).await.unwrap();
        assert_eq!(out.results["value"], json!("hello"));

        let mut inputs = Fields::new();
        inputs.insert("input".to_string(), json!(42));
        let out = Passthrough.build(&ctx(Fields::new()), inputs).await.unwrap();
        assert_eq!(out.results["output"], json!(42));

        let err = Passthrough.build(&ctx(Fields::new()), Fields::new()).await.unwrap_err();
        assert!(err.message.contains("input"));
    }

    #[tokio::test]
    async fn test_counter_advances_per_build() {
        let mut params = Fields::new();
        params.insert("limit".to_string(), json!(2));
        let context = ctx(params);
        let first = Counter.build(&context, Fields::new()).await.unwrap();
        let second = Counter.build(&context, Fields::new()).await.unwrap();
        assert_eq!(first.results["item"], json!(1));
        assert_eq!(first.results["done"], json!(false));
        assert_eq!(second.results["done"], json!(true));
    }

    #[test]
    fn test_registry_builtins() {
        let registry = ComponentRegistry::with_builtins();
        assert_eq!(registry.types(), vec!["Constant", "Loop", "Merge", "Passthrough"]);
        assert!(registry.get("Loop").unwrap().is_loop());
        assert!(registry.get("Missing").is_none());
    }
}

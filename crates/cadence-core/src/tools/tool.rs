//! Per-tool trait, closure-based tool wrapper and a name-dispatching registry.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::arguments::ToolArguments;
use super::catalog::{ToolCatalog, ToolSpec};
use super::runner::{RunnerContext, ToolRunner};
use crate::error::CadenceError;

/// Core tool trait -- implement to plug a concrete side effect into a
/// [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declared name, parameters and description.
    fn spec(&self) -> &ToolSpec;

    /// Tool name (must match the tag or JSON `name` the model emits).
    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Execute the tool with parsed arguments.
    async fn execute(&self, args: &ToolArguments, ctx: &RunnerContext) -> Result<Value, CadenceError>;
}

/// Type alias for the tool handler function.
type ToolHandler = dyn Fn(
        ToolArguments,
        RunnerContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CadenceError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool for quick tool creation.
pub struct FnTool {
    spec: ToolSpec,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    /// Create a tool from a closure.
    pub fn new<F, Fut>(spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(ToolArguments, RunnerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CadenceError>> + Send + 'static,
    {
        Self {
            spec,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: &ToolArguments, ctx: &RunnerContext) -> Result<Value, CadenceError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.spec.name)
            .field("description", &self.spec.description)
            .finish()
    }
}

/// [`ToolRunner`] that dispatches to registered [`Tool`]s by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Catalogue of every registered tool, for the parser and validation.
    pub fn catalog(&self) -> ToolCatalog {
        self.tools.values().map(|tool| tool.spec().clone()).collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

#[async_trait]
impl ToolRunner for ToolRegistry {
    async fn run(
        &self,
        name: &str,
        params: &BTreeMap<String, String>,
        ctx: &RunnerContext,
    ) -> Result<Value, CadenceError> {
        let Some(tool) = self.tools.get(name) else {
            return Err(CadenceError::tool(name, format!("Tool '{name}' not found")));
        };
        let args = ToolArguments::new(params.clone());
        tool.execute(&args, ctx).await
    }
}

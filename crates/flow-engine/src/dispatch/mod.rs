//! Step Dispatcher (§4.D): routes a step to its handler by type tag.
//!
//! A registry mapping string → handler, not an exhaustive match — keeps
//! per-step lookup O(1) and lets callers register handlers for step types
//! the core knows nothing about (custom blocks, tenant integrations).
//! Unknown types fall through to the registered custom-block fallback, if any.

pub mod adapters;
pub mod handlers;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use async_trait::async_trait;
use flow_model::Step;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Every step handler implements this. Handlers must not write to the
/// execution context directly — the Graph Executor performs all writes
/// after a handler returns.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError>;
}

pub struct StepDispatcher {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    fallback: Option<Arc<dyn StepHandler>>,
}

impl StepDispatcher {
    /// A dispatcher with only the control-flow-adjacent, dependency-free
    /// handlers registered (start, note, log, condition, map, wait, filter,
    /// switch, aggregate, split, error, subflow). Callers register handlers
    /// backed by external collaborators (function, tool, llm, router,
    /// human-in-loop, custom-block) separately via [`Self::register`].
    pub fn new() -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
            fallback: None,
        };
        dispatcher.register("start", Arc::new(handlers::StartHandler));
        dispatcher.register("note", Arc::new(handlers::NoteHandler));
        dispatcher.register("log", Arc::new(handlers::LogHandler));
        dispatcher.register("condition", Arc::new(handlers::ConditionHandler));
        dispatcher.register("map", Arc::new(handlers::MapHandler));
        dispatcher.register("wait", Arc::new(handlers::WaitHandler));
        dispatcher.register("filter", Arc::new(handlers::FilterHandler));
        dispatcher.register("switch", Arc::new(handlers::SwitchHandler));
        dispatcher.register("aggregate", Arc::new(handlers::AggregateHandler));
        dispatcher.register("split", Arc::new(handlers::SplitHandler));
        dispatcher.register("error", Arc::new(handlers::ErrorHandler));
        dispatcher.register("subflow", Arc::new(handlers::SubflowHandler));
        dispatcher
    }

    pub fn register(&mut self, step_type: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(step_type.into(), handler);
    }

    /// Installs the handler invoked when `step_type` matches nothing
    /// registered — the custom-block-by-slug path (§4.D).
    pub fn set_fallback(&mut self, handler: Arc<dyn StepHandler>) {
        self.fallback = Some(handler);
    }

    pub fn is_registered(&self, step_type: &str) -> bool {
        self.handlers.contains_key(step_type)
    }

    async fn run_handler(&self, exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        match self.handlers.get(&step.step_type) {
            Some(handler) => handler.execute(exec_ctx, step, input).await,
            None => match &self.fallback {
                Some(handler) => handler.execute(exec_ctx, step, input).await,
                None => Err(EngineError::HandlerNotFound(step.step_type.clone())),
            },
        }
    }

    /// Dispatches a step and extracts its effective output port from the raw
    /// handler output, per the dispatch-level port extraction rules in §4.D.
    pub async fn dispatch(&self, exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<(Value, String), EngineError> {
        let raw = self.run_handler(exec_ctx, step, input).await?;
        Ok(extract_port(raw, step))
    }
}

impl Default for StepDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts `(output, port)` from a handler's raw return value:
/// - a `{ port, data }` object where `port` is one of the step's declared
///   `custom_output_ports` unwraps to `(data, port)`
/// - an object carrying a top-level `__port` string strips that key and
///   uses it as the port
/// - otherwise the default `"output"` port, output unchanged
pub fn extract_port(raw: Value, step: &Step) -> (Value, String) {
    if let (Some(custom_ports), Value::Object(map)) = (&step.custom_output_ports, &raw) {
        if let (Some(Value::String(port)), Some(data)) = (map.get("port"), map.get("data")) {
            if custom_ports.contains(port) {
                return (data.clone(), port.clone());
            }
        }
    }

    if let Value::Object(mut map) = raw.clone() {
        if let Some(Value::String(port)) = map.remove("__port") {
            return (Value::Object(map), port);
        }
    }

    (raw, flow_model::DEFAULT_PORT.to_string())
}

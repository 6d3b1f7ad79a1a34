//! Contracts for external collaborators the dispatcher calls into.
//!
//! Every trait here stands in for a system explicitly out of scope of this
//! crate (the JS sandbox, LLM providers, tool adapters, approval UI, block
//! storage) — the core only depends on the narrow capability it needs.

use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::Value;

/// The embedded JavaScript sandbox. `services` is the fixed per-call service
/// surface (HTTP, LLM, vector store, tenant-scoped lookups) injected by the
/// caller, not owned by the sandbox.
#[async_trait]
pub trait JsSandbox: Send + Sync {
    async fn execute(&self, code: &str, input: Value, services: Value) -> Result<Value, EngineError>;
}

/// A generic tool/adapter surface keyed by tool name, backing the `tool` step type.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn call(&self, tool_name: &str, config: &Value, input: Value) -> Result<Value, EngineError>;
}

/// Metadata handed to the usage hook after an LLM-bearing handler runs.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageMetadata {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// An LLM provider client, backing the `llm` and `router` step types.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Returns the completion text/value plus usage metadata for the usage hook.
    async fn complete(&self, config: &Value, input: Value) -> Result<(Value, UsageMetadata), EngineError>;

    /// Whether this adapter can serve the given provider name — used by the
    /// `router` handler to decide whether to fall back.
    fn is_registered(&self, provider: &str) -> bool {
        let _ = provider;
        true
    }
}

/// Handles `human-in-loop` steps outside test mode: parks the step and
/// returns a pending-approval descriptor.
#[async_trait]
pub trait ApprovalSink: Send + Sync {
    async fn request_approval(&self, step_id: &str, input: &Value) -> Result<(String, String), EngineError>;
}

/// A block definition resolved by slug or ID, inherited chain included.
#[derive(Debug, Clone, Default)]
pub struct BlockDefinition {
    pub tenant_id: Option<String>,
    pub config_defaults: Value,
    /// Pre-process hook code, root to child.
    pub pre_process_chain: Vec<String>,
    /// Post-process hook code, root to child.
    pub post_process_chain: Vec<String>,
    /// Internal steps, identified by slug, with the output key results accumulate under.
    pub internal_steps: Vec<InternalStepRef>,
    pub main_code: Option<String>,
    pub output_schema: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct InternalStepRef {
    pub slug: String,
    pub output_key: String,
}

/// Resolves a block definition by slug or ID, optionally tenant-scoped.
#[async_trait]
pub trait BlockResolver: Send + Sync {
    async fn resolve(&self, tenant_id: Option<&str>, slug: &str) -> Result<Option<BlockDefinition>, EngineError>;
}

//! Usage Hook (§4.K): opaque callback invoked after LLM-bearing handlers.
//!
//! Hook failure must never fail the step it was reporting on — callers of
//! [`invoke_usage_hook`] log and discard the hook's error.

use crate::dispatch::adapters::UsageMetadata;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait UsageHook: Send + Sync {
    async fn record(
        &self,
        tenant_id: &str,
        workflow_id: &str,
        run_id: &str,
        step_id: &str,
        metadata: &UsageMetadata,
        latency: Duration,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), String>;
}

pub async fn invoke_usage_hook(
    hook: Option<&(dyn UsageHook)>,
    tenant_id: &str,
    workflow_id: &str,
    run_id: &str,
    step_id: &str,
    metadata: &UsageMetadata,
    latency: Duration,
    success: bool,
    error: Option<&str>,
) {
    let Some(hook) = hook else { return };
    if let Err(err) = hook
        .record(tenant_id, workflow_id, run_id, step_id, metadata, latency, success, error)
        .await
    {
        tracing::warn!(step_id, error = %err, "usage hook failed");
    }
}

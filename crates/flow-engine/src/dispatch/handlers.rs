//! Built-in step handlers (§4.D).

use super::adapters::{ApprovalSink, BlockResolver, JsSandbox, LlmAdapter, ToolAdapter, UsageMetadata};
use super::StepHandler;
use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::expression::path_condition::{evaluate, evaluate_checked};
use crate::expression::template::{expand, NullScopeResolver};
use crate::usage::{invoke_usage_hook, UsageHook};
use async_trait::async_trait;
use flow_model::Step;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Maximum a `wait` step may sleep for, per §5.
const MAX_WAIT_MS: u64 = 3_600_000;

/// Identity: returns the input unchanged. Used for `start` and `note`.
pub struct StartHandler;

#[async_trait]
impl StepHandler for StartHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, _step: &Step, input: Value) -> Result<Value, EngineError> {
        Ok(input)
    }
}

pub struct NoteHandler;

#[async_trait]
impl StepHandler for NoteHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, _step: &Step, input: Value) -> Result<Value, EngineError> {
        Ok(input)
    }
}

/// Logs the step's configured message (template-expanded against input) and
/// passes the input through unchanged.
pub struct LogHandler;

#[async_trait]
impl StepHandler for LogHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let message = step
            .config
            .get("message")
            .cloned()
            .unwrap_or(Value::String(String::new()));
        let expanded = expand(&message, &input, &NullScopeResolver);
        tracing::info!(step = %step.name, message = %expanded, "log step");
        Ok(input)
    }
}

/// Evaluates `config.expression` against the input, emitting
/// `{ result, expression, [evaluation_error, defaulted] }`.
pub struct ConditionHandler;

#[async_trait]
impl StepHandler for ConditionHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let expression = step.config.get("expression").and_then(Value::as_str);
        match expression {
            Some(expr) => match evaluate_checked(expr, &input) {
                Ok(result) => Ok(json!({ "result": result, "expression": expr })),
                Err(e) => Ok(json!({
                    "result": true,
                    "expression": expr,
                    "evaluation_error": e.to_string(),
                    "defaulted": true,
                })),
            },
            None => Ok(json!({
                "result": true,
                "expression": Value::Null,
                "evaluation_error": "missing `expression` in step config",
                "defaulted": true,
            })),
        }
    }
}

/// Expands `config.template` against the input — a structural transform, not
/// a side-effecting action (analogous to a field-mapping "set" step).
pub struct MapHandler;

#[async_trait]
impl StepHandler for MapHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let template = step.config.get("template").cloned().unwrap_or(Value::Null);
        Ok(expand(&template, &input, &NullScopeResolver))
    }
}

/// Sleeps for `duration_ms` (capped at 1 hour) or until an absolute ISO-8601
/// `until` timestamp, honoring cancellation.
pub struct WaitHandler;

#[async_trait]
impl StepHandler for WaitHandler {
    async fn execute(&self, exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let wait_for = if let Some(until) = step.config.get("until").and_then(Value::as_str) {
            let target = chrono::DateTime::parse_from_rfc3339(until)
                .map_err(|e| EngineError::InvalidState(format!("invalid `until` timestamp: {e}")))?;
            let now = chrono::Utc::now();
            let millis = (target.with_timezone(&chrono::Utc) - now).num_milliseconds().max(0) as u64;
            millis
        } else {
            step.config.get("duration_ms").and_then(Value::as_u64).unwrap_or(0)
        };
        let capped = wait_for.min(MAX_WAIT_MS);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(capped)) => {}
            _ = exec_ctx.cancel_token().cancelled() => {
                return Err(EngineError::Cancelled);
            }
        }

        Ok(input)
    }
}

/// Routes to a named output port by matching the first configured case
/// expression that evaluates truthy, or `config.default_port` otherwise.
pub struct SwitchHandler;

#[async_trait]
impl StepHandler for SwitchHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let cases = step.config.get("cases").and_then(Value::as_array).cloned().unwrap_or_default();
        for case in &cases {
            let expr = case.get("expression").and_then(Value::as_str).unwrap_or("false");
            let port = case.get("port").and_then(Value::as_str).unwrap_or("output");
            if evaluate(expr, &input) {
                return Ok(with_port(input, port));
            }
        }
        let default_port = step.config.get("default_port").and_then(Value::as_str).unwrap_or("output");
        Ok(with_port(input, default_port))
    }
}

/// Keeps only the items of `input.items` (or `input` itself, if already an
/// array) for which `config.expression` evaluates truthy.
pub struct FilterHandler;

#[async_trait]
impl StepHandler for FilterHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let expr = step.config.get("expression").and_then(Value::as_str).unwrap_or("true");
        let items = items_of(&input);
        let kept: Vec<Value> = items.into_iter().filter(|item| evaluate(expr, item)).collect();
        Ok(wrap_items(&input, kept))
    }
}

/// Splits `input.items` (or `input` itself) into batches of `config.batch_size`.
pub struct SplitHandler;

#[async_trait]
impl StepHandler for SplitHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let batch_size = step.config.get("batch_size").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
        let items = items_of(&input);
        let batches: Vec<Value> = items.chunks(batch_size).map(|chunk| Value::Array(chunk.to_vec())).collect();
        Ok(json!({ "batches": batches, "count": batches.len() }))
    }
}

/// Reduces `input.items` (or `input` itself) per `config.operation`, writing
/// the result to `config.output_field` (default `"result"`).
pub struct AggregateHandler;

#[async_trait]
impl StepHandler for AggregateHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let operation = step.config.get("operation").and_then(Value::as_str).unwrap_or("count");
        let output_field = step.config.get("output_field").and_then(Value::as_str).unwrap_or("result");
        let items = items_of(&input);

        let numeric: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();

        let result = match operation {
            "sum" => json!(numeric.iter().sum::<f64>()),
            "avg" => {
                if numeric.is_empty() {
                    Value::Null
                } else {
                    json!(numeric.iter().sum::<f64>() / numeric.len() as f64)
                }
            }
            "min" => numeric.iter().cloned().fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v)))).map(|v| json!(v)).unwrap_or(Value::Null),
            "max" => numeric.iter().cloned().fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v)))).map(|v| json!(v)).unwrap_or(Value::Null),
            "first" => items.first().cloned().unwrap_or(Value::Null),
            "last" => items.last().cloned().unwrap_or(Value::Null),
            "concat" => Value::Array(items.clone()),
            _ => json!(items.len()),
        };

        let mut out = Map::new();
        out.insert(output_field.to_string(), result);
        Ok(Value::Object(out))
    }
}

/// Always fails, carrying `{ type, code, message }` from `config`.
pub struct ErrorHandler;

#[async_trait]
impl StepHandler for ErrorHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, _input: Value) -> Result<Value, EngineError> {
        let message = step.config.get("message").and_then(Value::as_str).unwrap_or("workflow error").to_string();
        Err(EngineError::StepExecution { step: step.name.clone(), message })
    }
}

/// Explicit "not implemented" sentinel — breaks loudly per §7.
pub struct SubflowHandler;

#[async_trait]
impl StepHandler for SubflowHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, _input: Value) -> Result<Value, EngineError> {
        Err(EngineError::StepExecution {
            step: step.name.clone(),
            message: "subflow execution is not implemented".to_string(),
        })
    }
}

/// Invokes the embedded JS sandbox with `config.code`.
pub struct FunctionHandler {
    sandbox: Arc<dyn JsSandbox>,
}

impl FunctionHandler {
    pub fn new(sandbox: Arc<dyn JsSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl StepHandler for FunctionHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let code = step.config.get("code").and_then(Value::as_str).unwrap_or("");
        self.sandbox.execute(code, input, Value::Null).await
    }
}

/// Delegates to a configured tool adapter.
pub struct ToolHandler {
    adapter: Arc<dyn ToolAdapter>,
}

impl ToolHandler {
    pub fn new(adapter: Arc<dyn ToolAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl StepHandler for ToolHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let tool_name = step.config.get("tool").and_then(Value::as_str).unwrap_or("");
        self.adapter.call(tool_name, &step.config, input).await
    }
}

/// Calls the configured LLM adapter, then fires the usage hook — whose
/// failure must never fail this step.
pub struct LlmHandler {
    adapter: Arc<dyn LlmAdapter>,
    usage_hook: Option<Arc<dyn UsageHook>>,
}

impl LlmHandler {
    pub fn new(adapter: Arc<dyn LlmAdapter>, usage_hook: Option<Arc<dyn UsageHook>>) -> Self {
        Self { adapter, usage_hook }
    }
}

#[async_trait]
impl StepHandler for LlmHandler {
    async fn execute(&self, exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let run = exec_ctx.run_snapshot();
        let started = Instant::now();
        let outcome = self.adapter.complete(&step.config, input).await;

        let metadata = match &outcome {
            Ok((_, metadata)) => metadata.clone(),
            Err(_) => UsageMetadata::default(),
        };
        let error_text = outcome.as_ref().err().map(ToString::to_string);

        invoke_usage_hook(
            self.usage_hook.as_deref(),
            &run.tenant_id,
            &run.workflow_id,
            &run.id,
            &step.id,
            &metadata,
            started.elapsed(),
            outcome.is_ok(),
            error_text.as_deref(),
        )
        .await;

        outcome.map(|(value, _)| value)
    }
}

/// Builds a classification prompt from `config.routes`, invokes the LLM
/// adapter, and matches the first route name appearing (case-insensitively)
/// in the response. Any failure — unregistered provider, adapter error, no
/// route matched — falls back to the first configured route.
pub struct RouterHandler {
    adapter: Arc<dyn LlmAdapter>,
}

impl RouterHandler {
    pub fn new(adapter: Arc<dyn LlmAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl StepHandler for RouterHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let routes = step.config.get("routes").and_then(Value::as_array).cloned().unwrap_or_default();
        let route_names: Vec<String> = routes
            .iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();

        let fallback = || {
            json!({
                "selected_route": route_names.first().cloned().unwrap_or_default(),
                "fallback": true,
            })
        };

        if route_names.is_empty() {
            return Ok(fallback());
        }

        let provider = step.config.get("provider").and_then(Value::as_str).unwrap_or("default");
        if !self.adapter.is_registered(provider) {
            return Ok(fallback());
        }

        match self.adapter.complete(&step.config, input).await {
            Ok((response, _)) => {
                let text = response.as_str().map(str::to_string).unwrap_or_else(|| response.to_string());
                let lower = text.to_lowercase();
                match route_names.iter().find(|name| lower.contains(&name.to_lowercase())) {
                    Some(name) => Ok(json!({ "selected_route": name, "fallback": false })),
                    None => Ok(fallback()),
                }
            }
            Err(_) => Ok(fallback()),
        }
    }
}

/// In test mode, auto-approves immediately. Otherwise parks the step and
/// returns a pending-approval descriptor.
pub struct HumanInLoopHandler {
    approval_sink: Arc<dyn ApprovalSink>,
    test_mode: bool,
}

impl HumanInLoopHandler {
    pub fn new(approval_sink: Arc<dyn ApprovalSink>, test_mode: bool) -> Self {
        Self { approval_sink, test_mode }
    }
}

#[async_trait]
impl StepHandler for HumanInLoopHandler {
    async fn execute(&self, _exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        if self.test_mode {
            return Ok(json!({ "approved": true, "auto_approved": true, "input": input }));
        }
        let (approval_id, approval_url) = self.approval_sink.request_approval(&step.id, &input).await?;
        Ok(json!({ "status": "pending", "approval_id": approval_id, "approval_url": approval_url }))
    }
}

/// Resolves and runs a custom block by slug, per the pipeline in §4.D:
/// tenant validation, config-default merge, pre/post hook chains, internal
/// step recursion, main code, output-schema filtering.
pub struct CustomBlockHandler {
    resolver: Arc<dyn BlockResolver>,
    sandbox: Arc<dyn JsSandbox>,
}

impl CustomBlockHandler {
    pub fn new(resolver: Arc<dyn BlockResolver>, sandbox: Arc<dyn JsSandbox>) -> Self {
        Self { resolver, sandbox }
    }

    fn merge_config(defaults: &Value, step_config: &Value) -> Value {
        match (defaults, step_config) {
            (Value::Object(d), Value::Object(s)) => {
                let mut merged = d.clone();
                for (k, v) in s {
                    merged.insert(k.clone(), v.clone());
                }
                Value::Object(merged)
            }
            (_, s) => s.clone(),
        }
    }
}

#[async_trait]
impl StepHandler for CustomBlockHandler {
    async fn execute(&self, exec_ctx: &ExecutionContext, step: &Step, input: Value) -> Result<Value, EngineError> {
        let slug = &step.step_type;
        let run = exec_ctx.run_snapshot();

        let block = self
            .resolver
            .resolve(Some(run.tenant_id.as_str()), slug)
            .await?
            .ok_or_else(|| EngineError::HandlerNotFound(slug.clone()))?;

        if let Some(required_tenant) = &block.tenant_id {
            if required_tenant != &run.tenant_id {
                return Err(EngineError::InvalidState(format!(
                    "tenant mismatch: block {slug} requires tenant {required_tenant}, got {}",
                    run.tenant_id
                )));
            }
        }

        let config = Self::merge_config(&block.config_defaults, &step.config);

        let mut current = input.clone();
        for hook in &block.pre_process_chain {
            current = self.sandbox.execute(hook, current, Value::Null).await?;
        }

        let mut internal_results = Map::new();
        for internal in &block.internal_steps {
            let internal_block = self
                .resolver
                .resolve(Some(run.tenant_id.as_str()), &internal.slug)
                .await?
                .ok_or_else(|| EngineError::HandlerNotFound(internal.slug.clone()))?;

            let merged_input = merge_objects(&current, &Value::Object(internal_results.clone()));
            let result = self.run_internal(&internal_block, merged_input).await?;
            internal_results.insert(internal.output_key.clone(), result);
        }

        let mut out = current.clone();
        if let Some(code) = &block.main_code {
            let mut input_with_config = as_object(&out);
            input_with_config.insert("__config".to_string(), config.clone());
            if !internal_results.is_empty() {
                input_with_config.insert("__internal_results".to_string(), Value::Object(internal_results.clone()));
            }
            let code_result = self
                .sandbox
                .execute(code, Value::Object(input_with_config), Value::Null)
                .await?;
            let mut merged = as_object(&out);
            merged.insert("_code_result".to_string(), code_result);
            if !internal_results.is_empty() {
                merged.insert("__internal_results".to_string(), Value::Object(internal_results));
            }
            out = Value::Object(merged);
        } else if !internal_results.is_empty() {
            let mut merged = as_object(&out);
            merged.insert("__internal_results".to_string(), Value::Object(internal_results));
            out = Value::Object(merged);
        }

        for hook in &block.post_process_chain {
            out = self.sandbox.execute(hook, out, Value::Null).await?;
        }

        if let Some(schema) = &block.output_schema {
            out = filter_by_schema(&out, schema);
        }

        Ok(out)
    }
}

impl CustomBlockHandler {
    async fn run_internal(&self, block: &super::adapters::BlockDefinition, input: Value) -> Result<Value, EngineError> {
        let mut current = input;
        for hook in &block.pre_process_chain {
            current = self.sandbox.execute(hook, current, Value::Null).await?;
        }
        if let Some(code) = &block.main_code {
            current = self.sandbox.execute(code, current, Value::Null).await?;
        }
        for hook in &block.post_process_chain {
            current = self.sandbox.execute(hook, current, Value::Null).await?;
        }
        Ok(current)
    }
}

fn as_object(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    }
}

fn merge_objects(a: &Value, b: &Value) -> Value {
    let mut merged = as_object(a);
    if let Value::Object(b_map) = b {
        for (k, v) in b_map {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

fn filter_by_schema(value: &Value, schema: &Value) -> Value {
    match (value, schema.get("properties")) {
        (Value::Object(map), Some(Value::Object(props))) => {
            let mut filtered = Map::new();
            for key in props.keys() {
                if let Some(v) = map.get(key) {
                    filtered.insert(key.clone(), v.clone());
                }
            }
            Value::Object(filtered)
        }
        _ => value.clone(),
    }
}

fn with_port(input: Value, port: &str) -> Value {
    let mut map = as_object(&input);
    map.insert("__port".to_string(), Value::String(port.to_string()));
    Value::Object(map)
}

/// Extracts the item array: `input.items` if present, else `input` itself if
/// it's already an array, else a single-element array wrapping `input`.
fn items_of(input: &Value) -> Vec<Value> {
    if let Some(Value::Array(items)) = input.get("items") {
        return items.clone();
    }
    match input {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn wrap_items(original: &Value, items: Vec<Value>) -> Value {
    if original.get("items").is_some() {
        let mut map = as_object(original);
        map.insert("items".to_string(), Value::Array(items));
        Value::Object(map)
    } else {
        Value::Array(items)
    }
}

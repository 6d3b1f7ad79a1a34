//! Block-Group Executor (§4.E): six control-flow interpreters sharing one
//! entry point, [`execute_group`]. Each parses its own config, partitions
//! contained steps by `group_role`, and calls back into [`step_exec`] for
//! every contained step — never into the Graph Executor directly, which is
//! what keeps the two from owning each other (§9 design note).

use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::dispatch::adapters::JsSandbox;
use crate::dispatch::StepDispatcher;
use crate::error::EngineError;
use crate::expression::path_condition::evaluate;
use crate::graph::Graph;
use crate::step_exec::dispatch_step;
use flow_model::{group::roles, BlockGroup, BlockGroupType, Step};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};

/// The default port a group emits unless its interpreter overrides it.
/// Deliberately distinct from a step's default port `"output"` — see the
/// routing-rule note in §9.
pub const GROUP_DEFAULT_PORT: &str = "out";

pub async fn execute_group(
    group: &BlockGroup,
    graph: &Graph,
    dispatcher: &StepDispatcher,
    exec_ctx: &ExecutionContext,
    config: &RuntimeConfig,
    sandbox: Option<&dyn JsSandbox>,
    input: Value,
) -> Result<(Value, String), EngineError> {
    let interpreter_input = match (&group.pre_process, sandbox) {
        (Some(code), Some(sandbox)) => sandbox
            .execute(code, input, Value::Null)
            .await
            .map_err(|e| EngineError::InvalidState(format!("pre_process failed: {e}")))?,
        (Some(_), None) => {
            return Err(EngineError::InvalidState(
                "group declares pre_process but no sandbox is configured".to_string(),
            ))
        }
        (None, _) => input,
    };

    let (mut output, port) = match group.group_type {
        BlockGroupType::Parallel => run_parallel(group, graph, dispatcher, exec_ctx, interpreter_input).await?,
        BlockGroupType::TryCatch => run_try_catch(group, graph, dispatcher, exec_ctx, interpreter_input).await?,
        BlockGroupType::IfElse => run_if_else(group, graph, dispatcher, exec_ctx, interpreter_input).await?,
        BlockGroupType::SwitchCase => run_switch_case(group, graph, dispatcher, exec_ctx, interpreter_input).await?,
        BlockGroupType::Foreach => run_foreach(group, graph, dispatcher, exec_ctx, config, interpreter_input).await?,
        BlockGroupType::While => run_while(group, graph, dispatcher, exec_ctx, config, interpreter_input).await?,
    };

    if let Some(code) = &group.post_process {
        let sandbox = sandbox.ok_or_else(|| {
            EngineError::InvalidState("group declares post_process but no sandbox is configured".to_string())
        })?;
        output = sandbox
            .execute(code, output, Value::Null)
            .await
            .map_err(|e| EngineError::InvalidState(format!("post_process failed: {e}")))?;
    }

    Ok(extract_group_override(output, port))
}

/// Groups may embed `__port` in their output map to override the interpreter's port.
fn extract_group_override(output: Value, port: String) -> (Value, String) {
    if let Value::Object(mut map) = output.clone() {
        if let Some(Value::String(overridden)) = map.remove("__port") {
            return (Value::Object(map), overridden);
        }
    }
    (output, port)
}

/// Runs `steps` in sequence, feeding each step's output as the next step's
/// input. Returns the last output, or `{}` if `steps` was empty.
async fn run_chain(
    steps: &[&Step],
    graph: &Graph,
    dispatcher: &StepDispatcher,
    exec_ctx: &ExecutionContext,
    input: Value,
) -> Result<Value, EngineError> {
    let mut current = input;
    for step in steps.iter().copied() {
        let (output, _port) = dispatch_step(dispatcher, graph, exec_ctx, step, current).await?;
        current = output;
    }
    Ok(current)
}

fn role_or_fallback<'a>(graph: &'a Graph, group_id: &str, role: &str, fallback: &str) -> Vec<&'a Step> {
    let primary = graph.group_members_with_role(group_id, role);
    if !primary.is_empty() {
        primary
    } else {
        graph.group_members_with_role(group_id, fallback)
    }
}

async fn run_parallel(
    group: &BlockGroup,
    graph: &Graph,
    dispatcher: &StepDispatcher,
    exec_ctx: &ExecutionContext,
    input: Value,
) -> Result<(Value, String), EngineError> {
    let body = role_or_fallback(graph, &group.id, roles::BODY, roles::BODY);
    if body.is_empty() {
        return Ok((json!({}), GROUP_DEFAULT_PORT.to_string()));
    }

    let max_concurrent = group.config.get("max_concurrent").and_then(Value::as_u64).unwrap_or(0) as usize;
    let limit = if max_concurrent == 0 { body.len() } else { max_concurrent };
    let fail_fast = group.config.get("fail_fast").and_then(Value::as_bool).unwrap_or(false);

    let semaphore = tokio::sync::Semaphore::new(limit);
    let first_error = AtomicBool::new(false);

    let futures = body.iter().map(|step| {
        let input = input.clone();
        async {
            // Fast-path check only: a task already past this point when the
            // flag flips still runs to completion (permitted race, §9).
            if fail_fast && first_error.load(Ordering::Relaxed) {
                return None;
            }
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            match dispatch_step(dispatcher, graph, exec_ctx, step, input).await {
                Ok((output, _port)) => Some(Ok((step.name.clone(), output))),
                Err(e) => {
                    if fail_fast {
                        first_error.store(true, Ordering::Relaxed);
                    }
                    Some(Err(e))
                }
            }
        }
    });

    let outcomes: Vec<_> = futures::future::join_all(futures).await.into_iter().flatten().collect();

    let mut results = serde_json::Map::new();
    let mut first_error: Option<EngineError> = None;
    for outcome in outcomes {
        match outcome {
            Ok((name, output)) => {
                results.insert(name, output);
            }
            Err(e) => {
                tracing::warn!(group_id = %group.id, error = %e, "parallel branch failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if fail_fast {
        if let Some(e) = first_error {
            return Err(e);
        }
    }
    let count = results.len();

    Ok((
        json!({ "results": results, "completed": true, "count": count }),
        GROUP_DEFAULT_PORT.to_string(),
    ))
}

async fn run_try_catch(
    group: &BlockGroup,
    graph: &Graph,
    dispatcher: &StepDispatcher,
    exec_ctx: &ExecutionContext,
    input: Value,
) -> Result<(Value, String), EngineError> {
    let try_steps = role_or_fallback(graph, &group.id, roles::TRY, roles::BODY);
    let catch_steps = graph.group_members_with_role(&group.id, roles::CATCH);
    let finally_steps = graph.group_members_with_role(&group.id, roles::FINALLY);

    let mut current = input.clone();
    let mut failed = false;
    let mut error_message = String::new();
    for step in &try_steps {
        match dispatch_step(dispatcher, graph, exec_ctx, step, current.clone()).await {
            Ok((output, _port)) => current = output,
            Err(e) => {
                failed = true;
                error_message = e.to_string();
                break;
            }
        }
    }

    if failed {
        let mut catch_current = json!({ "error": error_message, "input": input });
        for step in &catch_steps {
            if let Ok((output, _port)) = dispatch_step(dispatcher, graph, exec_ctx, step, catch_current.clone()).await {
                catch_current = output;
            }
        }
        current = catch_current;
    }

    for step in &finally_steps {
        if let Ok((output, _port)) = dispatch_step(dispatcher, graph, exec_ctx, step, current.clone()).await {
            current = output;
        }
    }

    // A group whose try/body failed reports port "error" regardless of
    // whether the catch steps all succeeded.
    let port = if failed { "error" } else { "success" };
    Ok((current, port.to_string()))
}

async fn run_if_else(
    group: &BlockGroup,
    graph: &Graph,
    dispatcher: &StepDispatcher,
    exec_ctx: &ExecutionContext,
    input: Value,
) -> Result<(Value, String), EngineError> {
    let condition = group.config.get("condition").and_then(Value::as_str).unwrap_or("false");
    let branch_taken = evaluate(condition, &input);

    let (steps, port) = if branch_taken {
        (role_or_fallback(graph, &group.id, roles::THEN, roles::BODY), roles::THEN)
    } else {
        (graph.group_members_with_role(&group.id, roles::ELSE), roles::ELSE)
    };

    let output = run_chain(&steps, graph, dispatcher, exec_ctx, input).await?;
    Ok((output, port.to_string()))
}

async fn run_switch_case(
    group: &BlockGroup,
    graph: &Graph,
    dispatcher: &StepDispatcher,
    exec_ctx: &ExecutionContext,
    input: Value,
) -> Result<(Value, String), EngineError> {
    let cases = group.config.get("cases").and_then(Value::as_array).cloned().unwrap_or_default();

    for (i, case_expr) in cases.iter().enumerate() {
        let expr = case_expr.as_str().unwrap_or("false");
        if evaluate(expr, &input) {
            let role = roles::case(i);
            let steps = graph.group_members_with_role(&group.id, &role);
            let output = run_chain(&steps, graph, dispatcher, exec_ctx, input).await?;
            return Ok((output, role));
        }
    }

    let steps = graph.group_members_with_role(&group.id, roles::DEFAULT);
    let output = run_chain(&steps, graph, dispatcher, exec_ctx, input).await?;
    Ok((output, roles::DEFAULT.to_string()))
}

async fn run_foreach(
    group: &BlockGroup,
    graph: &Graph,
    dispatcher: &StepDispatcher,
    exec_ctx: &ExecutionContext,
    config: &RuntimeConfig,
    input: Value,
) -> Result<(Value, String), EngineError> {
    let items = resolve_items(group, &input);
    if items.is_empty() {
        return Ok((
            json!({ "iterations": 0, "completed": true, "results": [] }),
            GROUP_DEFAULT_PORT.to_string(),
        ));
    }

    let body = graph.group_members_with_role(&group.id, roles::BODY);
    let parallel = group.config.get("parallel").and_then(Value::as_bool).unwrap_or(false);
    let max_workers = group
        .config
        .get("max_workers")
        .and_then(Value::as_u64)
        .map(|w| w as usize)
        .filter(|&w| w > 0)
        .unwrap_or(config.default_map_parallel.min(items.len()).max(1));

    // A failed iteration is logged and contributes `null`; it never aborts
    // the remaining iterations.
    let results = if parallel {
        let semaphore = tokio::sync::Semaphore::new(max_workers.max(1));
        let futures = items.iter().enumerate().map(|(index, item)| {
            let item_input = json!({ "index": index, "currentItem": item, "items": items });
            let body = &body;
            async {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let result = run_chain(body, graph, dispatcher, exec_ctx, item_input).await;
                (index, result)
            }
        });
        let mut indexed: Vec<(usize, Result<Value, EngineError>)> = futures::future::join_all(futures).await;
        indexed.sort_by_key(|(i, _)| *i);
        indexed
            .into_iter()
            .map(|(index, result)| match result {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(group_id = %group.id, index, error = %e, "foreach iteration failed");
                    Value::Null
                }
            })
            .collect()
    } else {
        let mut ordered = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let item_input = json!({ "index": index, "currentItem": item, "items": items });
            match run_chain(&body, graph, dispatcher, exec_ctx, item_input).await {
                Ok(output) => ordered.push(output),
                Err(e) => {
                    tracing::warn!(group_id = %group.id, index, error = %e, "foreach iteration failed");
                    ordered.push(Value::Null);
                }
            }
        }
        ordered
    };

    Ok((
        json!({ "results": results, "iterations": items.len(), "completed": true }),
        GROUP_DEFAULT_PORT.to_string(),
    ))
}

fn resolve_items(group: &BlockGroup, input: &Value) -> Vec<Value> {
    if let Some(path) = group.config.get("input_path").and_then(Value::as_str) {
        if let Ok(Value::Array(items)) = crate::expression::path_condition::resolve(path, input) {
            return items;
        }
        return Vec::new();
    }
    match input {
        Value::Array(items) => items.clone(),
        Value::Object(_) => input
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

async fn run_while(
    group: &BlockGroup,
    graph: &Graph,
    dispatcher: &StepDispatcher,
    exec_ctx: &ExecutionContext,
    config: &RuntimeConfig,
    input: Value,
) -> Result<(Value, String), EngineError> {
    let condition = group.config.get("condition").and_then(Value::as_str).unwrap_or("false").to_string();
    let max_iterations = group
        .config
        .get("max_iterations")
        .and_then(Value::as_u64)
        .map(|n| n as u32)
        .unwrap_or(config.max_while_iterations);
    let do_while = group.config.get("do_while").and_then(Value::as_bool).unwrap_or(false);
    let body = graph.group_members_with_role(&group.id, roles::BODY);

    let mut results = Vec::new();
    let mut current = input;
    let mut iterations = 0u32;

    // A failed iteration is logged and contributes no new state; `current`
    // carries forward unchanged so the next condition check still has a value.
    if do_while {
        match run_chain(&body, graph, dispatcher, exec_ctx, current.clone()).await {
            Ok(output) => {
                results.push(output.clone());
                current = output;
            }
            Err(e) => {
                tracing::warn!(group_id = %group.id, iteration = iterations, error = %e, "while iteration failed");
                results.push(Value::Null);
            }
        }
        iterations += 1;
    }

    while iterations < max_iterations && evaluate(&condition, &current) {
        match run_chain(&body, graph, dispatcher, exec_ctx, current.clone()).await {
            Ok(output) => {
                results.push(output.clone());
                current = output;
            }
            Err(e) => {
                tracing::warn!(group_id = %group.id, iteration = iterations, error = %e, "while iteration failed");
                results.push(Value::Null);
            }
        }
        iterations += 1;
    }

    Ok((
        json!({ "results": results, "iterations": iterations, "completed": true }),
        GROUP_DEFAULT_PORT.to_string(),
    ))
}

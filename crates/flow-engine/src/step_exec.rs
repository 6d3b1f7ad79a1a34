//! Shared step-dispatch-and-record helper used by both the Graph Executor
//! and the Block-Group Executor, so neither owns the other (§9 design note).

use crate::context::ExecutionContext;
use crate::dispatch::StepDispatcher;
use crate::error::EngineError;
use crate::events::RunEvent;
use crate::graph::Graph;
use flow_model::Step;
use serde_json::{json, Value};

/// Dispatches `step`, records its output+port in the execution context, and
/// applies the failure-port rule (§4.D): a failed step with
/// `enable_error_port` and an outgoing `"error"`-ported edge is recorded as
/// *completed* with an error payload on port `"error"` rather than
/// propagating. Streams `step:started`/`step:completed`/`step:failed`
/// events (§4.J) through whatever sink `exec_ctx` was built with.
pub async fn dispatch_step(
    dispatcher: &StepDispatcher,
    graph: &Graph,
    exec_ctx: &ExecutionContext,
    step: &Step,
    input: Value,
) -> Result<(Value, String), EngineError> {
    let run_id = exec_ctx.run_id();
    exec_ctx.emit(RunEvent::StepStarted { run_id: run_id.clone(), step_id: step.id.clone() });

    match dispatcher.dispatch(exec_ctx, step, input.clone()).await {
        Ok((output, port)) => {
            exec_ctx.complete_step(&step.id, output.clone(), port.clone());
            exec_ctx.emit(RunEvent::StepCompleted {
                run_id,
                step_id: step.id.clone(),
                port: port.clone(),
                output: output.clone(),
            });
            Ok((output, port))
        }
        Err(err) => {
            if step.enable_error_port && has_error_edge(graph, &step.id) {
                let error_output = json!({
                    "error": { "message": err.to_string(), "type": "execution_error" },
                    "input": input,
                });
                exec_ctx.complete_step(&step.id, error_output.clone(), "error");
                exec_ctx.emit(RunEvent::StepCompleted {
                    run_id,
                    step_id: step.id.clone(),
                    port: "error".to_string(),
                    output: error_output.clone(),
                });
                Ok((error_output, "error".to_string()))
            } else {
                exec_ctx.emit(RunEvent::StepFailed { run_id, step_id: step.id.clone(), error: err.to_string() });
                Err(err)
            }
        }
    }
}

fn has_error_edge(graph: &Graph, step_id: &str) -> bool {
    graph
        .out_edges(step_id)
        .iter()
        .any(|e| e.source_port.as_deref() == Some("error"))
}

//! Execution Context (§4.G): run-scoped mutable state shared across tasks.

use crate::events::{EventEmitter, RunEvent};
use flow_model::{Run, WorkflowDefinition};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct ContextState {
    step_outputs: HashMap<String, Value>,
    step_ports: HashMap<String, String>,
    step_sequence: HashMap<String, u64>,
    group_outputs: HashMap<String, Value>,
    group_ports: HashMap<String, String>,
    group_sequence: HashMap<String, u64>,
}

/// Thread-safe, run-scoped container for step/group outputs and ports.
///
/// A single lock guards both the output map and the port map for a given
/// kind (step or group) together — a reader can never observe an output
/// without its matching port, satisfying the invariant that every
/// completed node writes both before anything downstream consults it.
pub struct ExecutionContext {
    run: RwLock<Run>,
    definition: Arc<WorkflowDefinition>,
    state: RwLock<ContextState>,
    injected_outputs: HashMap<String, Value>,
    sequence: AtomicU64,
    cancel_token: tokio_util::sync::CancellationToken,
    events: Option<Arc<dyn EventEmitter>>,
}

impl ExecutionContext {
    pub fn new(run: Run, definition: Arc<WorkflowDefinition>, injected_outputs: HashMap<String, Value>) -> Self {
        Self {
            run: RwLock::new(run),
            definition,
            state: RwLock::new(ContextState::default()),
            injected_outputs,
            sequence: AtomicU64::new(0),
            cancel_token: tokio_util::sync::CancellationToken::new(),
            events: None,
        }
    }

    /// Attaches a sink that step/group lifecycle events (§4.I/§4.J) stream
    /// through as the run progresses. Without one, [`ExecutionContext::emit`]
    /// is a no-op — events are an ambient concern the core never requires.
    pub fn with_events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn run_id(&self) -> String {
        self.run.read().id.clone()
    }

    pub fn run_input(&self) -> Value {
        self.run.read().input.clone()
    }

    /// Forwards `event` to the attached sink, if any. Best-effort, matching
    /// the Event Emitter's own non-blocking contract.
    pub fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    pub fn run_snapshot(&self) -> Run {
        self.run.read().clone()
    }

    pub fn mark_started(&self) {
        self.run.write().start();
    }

    pub fn mark_succeeded(&self, output: Value) {
        self.run.write().succeed(output);
    }

    pub fn mark_failed(&self, error: impl Into<String>) {
        self.run.write().fail(error);
    }

    /// Next sequence number in the run's total order. Strictly increasing.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// A pre-injected output for partial execution, if one was seeded for this node.
    pub fn injected_output(&self, node_id: &str) -> Option<&Value> {
        self.injected_outputs.get(node_id)
    }

    pub fn complete_step(&self, step_id: &str, output: Value, port: impl Into<String>) {
        let sequence = self.next_sequence();
        let mut state = self.state.write();
        state.step_outputs.insert(step_id.to_string(), output);
        state.step_ports.insert(step_id.to_string(), port.into());
        state.step_sequence.insert(step_id.to_string(), sequence);
    }

    pub fn complete_group(&self, group_id: &str, output: Value, port: impl Into<String>) {
        let sequence = self.next_sequence();
        let mut state = self.state.write();
        state.group_outputs.insert(group_id.to_string(), output);
        state.group_ports.insert(group_id.to_string(), port.into());
        state.group_sequence.insert(group_id.to_string(), sequence);
    }

    pub fn step_sequence(&self, step_id: &str) -> Option<u64> {
        self.state.read().step_sequence.get(step_id).copied()
    }

    /// Step IDs that have completed, in the order they completed.
    pub fn completed_step_ids(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<(String, u64)> = state
            .step_sequence
            .iter()
            .map(|(id, seq)| (id.clone(), *seq))
            .collect();
        ids.sort_by_key(|(_, seq)| *seq);
        ids.into_iter().map(|(id, _)| id).collect()
    }

    pub fn step_output(&self, step_id: &str) -> Option<Value> {
        self.state.read().step_outputs.get(step_id).cloned()
    }

    pub fn step_port(&self, step_id: &str) -> Option<String> {
        self.state.read().step_ports.get(step_id).cloned()
    }

    pub fn group_output(&self, group_id: &str) -> Option<Value> {
        self.state.read().group_outputs.get(group_id).cloned()
    }

    pub fn group_port(&self, group_id: &str) -> Option<String> {
        self.state.read().group_ports.get(group_id).cloned()
    }

    pub fn has_any_output(&self) -> bool {
        let state = self.state.read();
        !state.step_outputs.is_empty() || !state.group_outputs.is_empty()
    }

    pub fn cancel_token(&self) -> tokio_util::sync::CancellationToken {
        self.cancel_token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_model::WorkflowDefinitionBuilder;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let def = Arc::new(WorkflowDefinitionBuilder::new("wf1", "Test").build());
        let run = Run::new("r1", "t1", "wf1", 1, json!({}));
        ExecutionContext::new(run, def, HashMap::new())
    }

    #[test]
    fn complete_step_writes_output_and_port_together() {
        let c = ctx();
        c.complete_step("a", json!({"v": 1}), "output");
        assert_eq!(c.step_output("a"), Some(json!({"v": 1})));
        assert_eq!(c.step_port("a"), Some("output".to_string()));
    }

    #[test]
    fn sequence_numbers_strictly_increase() {
        let c = ctx();
        let a = c.next_sequence();
        let b = c.next_sequence();
        assert!(b > a);
    }
}

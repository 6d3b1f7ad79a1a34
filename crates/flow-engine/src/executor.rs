//! Graph Executor (§4.F): drives the whole DAG — topological, parallel,
//! port/condition-aware node advancement.

use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::dispatch::adapters::JsSandbox;
use crate::dispatch::StepDispatcher;
use crate::error::EngineError;
use crate::expression::path_condition::evaluate;
use crate::graph::Graph;
use crate::group;
use crate::step_exec::dispatch_step;
use flow_model::NodeRef;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Default)]
struct CompletionState {
    completed_steps: HashSet<String>,
    completed_groups: HashSet<String>,
    /// Nodes already added to a frontier or executed inline — guards against
    /// the same node being scheduled twice when more than one predecessor
    /// completes around the same time.
    claimed: HashSet<String>,
}

fn node_key(node: &NodeRef) -> String {
    match node {
        NodeRef::Step { id } => format!("step:{id}"),
        NodeRef::Group { id } => format!("group:{id}"),
    }
}

pub struct GraphExecutor {
    graph: Arc<Graph>,
    dispatcher: Arc<StepDispatcher>,
    config: RuntimeConfig,
    sandbox: Option<Arc<dyn JsSandbox>>,
    state: Mutex<CompletionState>,
}

impl GraphExecutor {
    pub fn new(graph: Arc<Graph>, dispatcher: Arc<StepDispatcher>, config: RuntimeConfig) -> Self {
        Self {
            graph,
            dispatcher,
            config,
            sandbox: None,
            state: Mutex::new(CompletionState::default()),
        }
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn JsSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Runs the whole workflow from its `start` steps. Returns the output of
    /// the last step completed, or the run input if nothing ran.
    pub async fn execute(&self, exec_ctx: &ExecutionContext) -> Result<Value, EngineError> {
        let start_ids = self.graph.start_step_ids().to_vec();
        if start_ids.is_empty() {
            return Err(EngineError::NoStartSteps);
        }
        self.run_from_frontier(exec_ctx, start_ids).await
    }

    /// Seeds execution at a specific step rather than the graph's declared
    /// start steps, optionally overriding its input.
    pub async fn execute_from_step(
        &self,
        exec_ctx: &ExecutionContext,
        start_step_id: &str,
        start_input: Option<Value>,
    ) -> Result<Value, EngineError> {
        if let Some(input) = start_input {
            exec_ctx.complete_step(&format!("__seed__{start_step_id}"), input, flow_model::DEFAULT_PORT);
        }
        self.run_from_frontier(exec_ctx, vec![start_step_id.to_string()]).await
    }

    /// Runs exactly one step and returns its output without walking successors.
    pub async fn execute_single_step(
        &self,
        exec_ctx: &ExecutionContext,
        step_id: &str,
        input: Option<Value>,
    ) -> Result<Value, EngineError> {
        let step = self
            .graph
            .step(step_id)
            .ok_or_else(|| EngineError::HandlerNotFound(step_id.to_string()))?;
        let resolved_input = input.unwrap_or_else(|| self.prepare_input(&NodeRef::step(step_id), exec_ctx));
        let (output, _port) = dispatch_step(&self.dispatcher, &self.graph, exec_ctx, step, resolved_input).await?;
        Ok(output)
    }

    async fn run_from_frontier(&self, exec_ctx: &ExecutionContext, start_ids: Vec<String>) -> Result<Value, EngineError> {
        {
            let mut state = self.state.lock();
            for id in &start_ids {
                state.claimed.insert(format!("step:{id}"));
            }
        }

        let mut frontier = start_ids;
        let mut last_output = exec_ctx.run_input();

        while !frontier.is_empty() {
            let outcomes: Vec<Result<(Value, Vec<NodeRef>), EngineError>> = futures::future::join_all(
                frontier.iter().map(|step_id| self.run_one_step(exec_ctx, step_id)),
            )
            .await;

            let mut next_ids: Vec<String> = Vec::new();
            for outcome in outcomes {
                let (output, next_nodes) = outcome?;
                last_output = output;
                for node in next_nodes {
                    if let NodeRef::Step { id } = node {
                        next_ids.push(id);
                    }
                }
            }
            frontier = next_ids;
        }

        Ok(last_output)
    }

    async fn run_one_step(&self, exec_ctx: &ExecutionContext, step_id: &str) -> Result<(Value, Vec<NodeRef>), EngineError> {
        let step = self
            .graph
            .step(step_id)
            .ok_or_else(|| EngineError::HandlerNotFound(step_id.to_string()))?;
        let node = NodeRef::step(step_id);
        let input = self.prepare_input(&node, exec_ctx);
        let (output, port) = dispatch_step(&self.dispatcher, &self.graph, exec_ctx, step, input).await?;
        {
            self.state.lock().completed_steps.insert(step_id.to_string());
        }
        let next = self.advance_from(exec_ctx, node, port, output.clone()).await?;
        Ok((output, next))
    }

    /// Walks outgoing edges from a just-completed node, recursing inline
    /// through any triggered groups (`executeFromGroupOutput`) and
    /// returning the step nodes ready for the *next* frontier.
    fn advance_from<'a>(
        &'a self,
        exec_ctx: &'a ExecutionContext,
        node: NodeRef,
        port: String,
        output: Value,
    ) -> BoxFuture<'a, Result<Vec<NodeRef>, EngineError>> {
        Box::pin(async move {
            let mut next = Vec::new();
            let edges = self.graph.out_edges(node.id()).to_vec();

            for edge in edges {
                if !edge.port_matches(&port) {
                    continue;
                }
                if let Some(condition) = &edge.condition {
                    if !evaluate(condition, &output) {
                        continue;
                    }
                }

                match &edge.target {
                    NodeRef::Group { id } => {
                        if !self.try_claim_if_ready(&edge.target) {
                            continue;
                        }
                        let group_def = self
                            .graph
                            .group(id)
                            .ok_or_else(|| EngineError::InvalidState(format!("missing group {id}")))?
                            .clone();
                        let group_input = self.prepare_input(&edge.target, exec_ctx);
                        let (group_output, group_port) = group::execute_group(
                            &group_def,
                            &self.graph,
                            &self.dispatcher,
                            exec_ctx,
                            &self.config,
                            self.sandbox.as_deref(),
                            group_input,
                        )
                        .await?;
                        {
                            self.state.lock().completed_groups.insert(id.clone());
                        }
                        exec_ctx.complete_group(id, group_output.clone(), group_port.clone());
                        let nested = self.advance_from(exec_ctx, edge.target.clone(), group_port, group_output).await?;
                        next.extend(nested);
                    }
                    NodeRef::Step { .. } => {
                        if self.try_claim_if_ready(&edge.target) {
                            next.push(edge.target.clone());
                        }
                    }
                }
            }

            Ok(next)
        })
    }

    /// Atomically checks whether every in-edge source of `target` has
    /// completed and, if so, claims it so no other predecessor schedules it
    /// again. Acquires the single completion lock (§5 shared-resource policy).
    fn try_claim_if_ready(&self, target: &NodeRef) -> bool {
        let mut state = self.state.lock();
        let key = node_key(target);
        if state.claimed.contains(&key) {
            return false;
        }
        let in_edges = self.graph.in_edges(target.id());
        let ready = in_edges.iter().all(|edge| match &edge.source {
            NodeRef::Step { id } => state.completed_steps.contains(id),
            NodeRef::Group { id } => state.completed_groups.contains(id),
        });
        if ready {
            state.claimed.insert(key);
        }
        ready
    }

    /// Input Preparation (§4.F): run input if nothing has completed yet;
    /// pass-through if the target has exactly one in-edge with output
    /// already available; otherwise the implicit join of all in-edge outputs.
    fn prepare_input(&self, target: &NodeRef, exec_ctx: &ExecutionContext) -> Value {
        if !exec_ctx.has_any_output() {
            return exec_ctx.run_input();
        }

        let in_edges = self.graph.in_edges(target.id());
        if in_edges.len() == 1 {
            if let Some(output) = self.node_output(&in_edges[0].source, exec_ctx) {
                return output;
            }
        }

        let mut merged = Map::new();
        merged.insert("workflow_input".to_string(), exec_ctx.run_input());
        for edge in in_edges {
            if let Some(output) = self.node_output(&edge.source, exec_ctx) {
                merged.insert(edge.source.id().to_string(), output);
            }
        }
        Value::Object(merged)
    }

    fn node_output(&self, node: &NodeRef, exec_ctx: &ExecutionContext) -> Option<Value> {
        match node {
            NodeRef::Step { id } => exec_ctx.step_output(id),
            NodeRef::Group { id } => exec_ctx.group_output(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_model::{BlockGroup, BlockGroupType, Edge, NodeRef as ModelNodeRef, Run, Step, WorkflowDefinitionBuilder};
    use serde_json::json;
    use std::collections::HashMap;

    fn build(def: flow_model::WorkflowDefinition) -> (GraphExecutor, ExecutionContext) {
        let graph = Arc::new(Graph::build(&def).unwrap());
        let dispatcher = Arc::new(StepDispatcher::new());
        let executor = GraphExecutor::new(graph, dispatcher, RuntimeConfig::default());
        let run = Run::new("r1", "t1", def.id.clone(), 1, json!({"value": 10}));
        let ctx = ExecutionContext::new(run, Arc::new(def), HashMap::new());
        (executor, ctx)
    }

    #[tokio::test]
    async fn s1_linear_dag_doubles_value() {
        let def = WorkflowDefinitionBuilder::new("wf1", "Linear")
            .step(Step::new("start", "Start", "start"))
            .step(Step::new("init", "Init", "map").with_config(json!({"template": {"value": 10}})))
            .step(Step::new("double", "Double", "map").with_config(json!({"template": {"v": "{{$.value}}"}})))
            .edge(Edge::new("e1", ModelNodeRef::step("start"), ModelNodeRef::step("init")))
            .edge(Edge::new("e2", ModelNodeRef::step("init"), ModelNodeRef::step("double")))
            .build();
        let (executor, ctx) = build(def);
        executor.execute(&ctx).await.unwrap();
        assert_eq!(ctx.step_output("double"), Some(json!({"v": 10})));
    }

    #[tokio::test]
    async fn s2_parallel_group_between_steps() {
        let def = WorkflowDefinitionBuilder::new("wf1", "ParallelGroup")
            .step(Step::new("start", "Start", "start"))
            .group(BlockGroup::new("g1", "P", BlockGroupType::Parallel))
            .step(Step::new("a", "A", "map").with_config(json!({"template": {"branch": "A"}})).in_group("g1", flow_model::group::roles::BODY))
            .step(Step::new("b", "B", "map").with_config(json!({"template": {"branch": "B"}})).in_group("g1", flow_model::group::roles::BODY))
            .step(Step::new("after", "After", "note"))
            .edge(Edge::new("e1", ModelNodeRef::step("start"), ModelNodeRef::group("g1")))
            .edge(Edge::new("e2", ModelNodeRef::group("g1"), ModelNodeRef::step("after")).with_port("out"))
            .build();
        let (executor, ctx) = build(def);
        executor.execute(&ctx).await.unwrap();
        let group_output = ctx.group_output("g1").unwrap();
        assert_eq!(group_output["results"].as_object().unwrap().len(), 2);
        let after_input = ctx.step_output("after").unwrap();
        assert_eq!(after_input["results"]["A"], json!({"branch": "A"}));
    }

    #[tokio::test]
    async fn s6_condition_edge_picks_only_matching_target() {
        let def = WorkflowDefinitionBuilder::new("wf1", "CondEdge")
            .step(Step::new("start", "Start", "start"))
            .step(Step::new("x", "X", "map").with_config(json!({"template": {"score": 90}})))
            .step(Step::new("high", "High", "note"))
            .step(Step::new("low", "Low", "note"))
            .edge(Edge::new("e1", ModelNodeRef::step("start"), ModelNodeRef::step("x")))
            .edge(Edge::new("e2", ModelNodeRef::step("x"), ModelNodeRef::step("high")).with_condition("$.score >= 80"))
            .edge(Edge::new("e3", ModelNodeRef::step("x"), ModelNodeRef::step("low")).with_condition("$.score < 80"))
            .build();
        let (executor, ctx) = build(def);
        executor.execute(&ctx).await.unwrap();
        assert!(ctx.step_output("high").is_some());
        assert!(ctx.step_output("low").is_none());
    }

    #[tokio::test]
    async fn no_start_step_errors_without_running_anything() {
        let def = WorkflowDefinitionBuilder::new("wf1", "NoStart")
            .step(Step::new("a", "A", "note"))
            .build();
        let graph_result = Graph::build(&def);
        assert!(graph_result.is_err());
    }
}

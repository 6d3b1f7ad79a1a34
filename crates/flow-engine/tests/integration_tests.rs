//! End-to-end scenario tests (§8) driving full workflows through the
//! `GraphExecutor`/`InlineRunner`, exercising step and group routing,
//! condition edges, and the universal completion invariants.

use async_trait::async_trait;
use flow_engine::dispatch::adapters::{BlockDefinition, BlockResolver, JsSandbox, LlmAdapter, UsageMetadata};
use flow_engine::dispatch::handlers::{CustomBlockHandler, RouterHandler, WaitHandler};
use flow_engine::{
    EngineError, ExecutionContext, Graph, GraphExecutor, InlineRunner, MemoryRunStorage,
    MemoryStepRunStorage, MemoryWorkflowStorage, NullEventEmitter, RuntimeConfig,
    SharedRunStorage, SharedStepRunStorage, SharedWorkflowStorage, StepDispatcher, WorkflowStorage,
};
use flow_model::group::roles;
use flow_model::{BlockGroup, BlockGroupType, Edge, NodeRef, Run, Step, WorkflowDefinitionBuilder};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn build(def: flow_model::WorkflowDefinition) -> (Arc<GraphExecutor>, ExecutionContext) {
    let graph = Arc::new(Graph::build(&def).unwrap());
    let dispatcher = Arc::new(StepDispatcher::new());
    let executor = Arc::new(GraphExecutor::new(graph, dispatcher, RuntimeConfig::default()));
    let run = Run::new("r1", "t1", def.id.clone(), 1, json!({}));
    let ctx = ExecutionContext::new(run, Arc::new(def), Default::default());
    (executor, ctx)
}

#[tokio::test]
async fn s1_linear_dag_propagates_through_two_map_steps() {
    let def = WorkflowDefinitionBuilder::new("wf1", "Linear")
        .step(Step::new("start", "Start", "start"))
        .step(Step::new("init", "Init", "map").with_config(json!({"template": {"value": 10}})))
        .step(Step::new("double", "Double", "map").with_config(json!({"template": {"v": "{{$.value}}"}})))
        .edge(Edge::new("e1", NodeRef::step("start"), NodeRef::step("init")))
        .edge(Edge::new("e2", NodeRef::step("init"), NodeRef::step("double")))
        .build();

    let (executor, ctx) = build(def);
    executor.execute(&ctx).await.unwrap();

    assert_eq!(ctx.step_output("double"), Some(json!({"v": 10})));
    // Invariant #1: a completed step always has both output and port recorded.
    assert_eq!(ctx.step_port("double"), Some("output".to_string()));
}

#[tokio::test]
async fn s2_parallel_group_aggregates_two_branches_by_name() {
    let def = WorkflowDefinitionBuilder::new("wf1", "ParallelGroup")
        .step(Step::new("start", "Start", "start"))
        .group(BlockGroup::new("g1", "Branches", BlockGroupType::Parallel))
        .step(
            Step::new("a", "A", "map")
                .with_config(json!({"template": {"branch": "A"}}))
                .in_group("g1", roles::BODY),
        )
        .step(
            Step::new("b", "B", "map")
                .with_config(json!({"template": {"branch": "B"}}))
                .in_group("g1", roles::BODY),
        )
        .step(Step::new("after", "After", "note"))
        .edge(Edge::new("e1", NodeRef::step("start"), NodeRef::group("g1")))
        .edge(Edge::new("e2", NodeRef::group("g1"), NodeRef::step("after")).with_port("out"))
        .build();

    let (executor, ctx) = build(def);
    executor.execute(&ctx).await.unwrap();

    let group_output = ctx.group_output("g1").unwrap();
    let results = group_output["results"].as_object().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results["A"], json!({"branch": "A"}));
    assert_eq!(results["B"], json!({"branch": "B"}));

    // Downstream step sees the group's output verbatim.
    assert_eq!(ctx.step_output("after").unwrap()["results"], group_output["results"]);
}

#[tokio::test]
async fn s3_try_catch_routes_failure_to_catch_handler() {
    let def = WorkflowDefinitionBuilder::new("wf1", "TryCatch")
        .step(Step::new("start", "Start", "start"))
        .group(BlockGroup::new("g1", "Guarded", BlockGroupType::TryCatch))
        .step(
            Step::new("risky", "Risky", "error")
                .with_config(json!({"message": "boom"}))
                .in_group("g1", roles::TRY),
        )
        .step(
            Step::new("handle", "Handle", "map")
                .with_config(json!({"template": {"handled": true, "reason": "{{$.error}}"}}))
                .in_group("g1", roles::CATCH),
        )
        .build();

    let (executor, ctx) = build(def);
    let (output, port) = {
        let graph = executor.graph();
        let group = graph.group("g1").unwrap().clone();
        let dispatcher = StepDispatcher::new();
        let config = RuntimeConfig::default();
        flow_engine::execute_group(&group, graph, &dispatcher, &ctx, &config, None, json!({}))
            .await
            .unwrap()
    };

    assert_eq!(port, "error");
    assert_eq!(output["handled"], json!(true));
}

#[tokio::test]
async fn s4_while_stops_at_max_iterations_with_always_true_condition() {
    let mut while_group = BlockGroup::new("g1", "Loop", BlockGroupType::While);
    while_group.config = json!({"condition": "true", "max_iterations": 3});
    let def = WorkflowDefinitionBuilder::new("wf1", "While")
        .step(Step::new("start", "Start", "start"))
        .group(while_group)
        .step(
            Step::new("tick", "Tick", "map")
                .with_config(json!({"template": {"n": 1}}))
                .in_group("g1", roles::BODY),
        )
        .build();

    let (executor, ctx) = build(def);
    let graph = executor.graph();
    let group = graph.group("g1").unwrap().clone();
    let dispatcher = StepDispatcher::new();
    let config = RuntimeConfig::default();
    let (output, _port) = flow_engine::execute_group(&group, graph, &dispatcher, &ctx, &config, None, json!({}))
        .await
        .unwrap();

    assert_eq!(output["iterations"], json!(3));
    assert_eq!(output["results"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn s5_foreach_parallel_preserves_item_order() {
    let mut foreach_group = BlockGroup::new("g1", "Map", BlockGroupType::Foreach);
    foreach_group.config = json!({"parallel": true, "max_workers": 2});
    let def = WorkflowDefinitionBuilder::new("wf1", "Foreach")
        .step(Step::new("start", "Start", "start"))
        .group(foreach_group)
        .step(
            Step::new("double", "Double", "map")
                .with_config(json!({"template": {"doubled": "{{$.currentItem}}"}}))
                .in_group("g1", roles::BODY),
        )
        .build();

    let (executor, ctx) = build(def);
    let graph = executor.graph();
    let group = graph.group("g1").unwrap().clone();
    let dispatcher = StepDispatcher::new();
    let config = RuntimeConfig::default();
    let (output, _port) = flow_engine::execute_group(
        &group,
        graph,
        &dispatcher,
        &ctx,
        &config,
        None,
        json!({"items": [1, 2, 3, 4, 5]}),
    )
    .await
    .unwrap();

    let results = output["results"].as_array().unwrap();
    for (i, expected) in [1, 2, 3, 4, 5].iter().enumerate() {
        assert_eq!(results[i]["doubled"], json!(expected));
    }
}

#[tokio::test]
async fn s6_condition_edges_route_to_only_one_target() {
    let def = WorkflowDefinitionBuilder::new("wf1", "CondEdge")
        .step(Step::new("start", "Start", "start"))
        .step(Step::new("score", "Score", "map").with_config(json!({"template": {"score": 90}})))
        .step(Step::new("high", "High", "note"))
        .step(Step::new("low", "Low", "note"))
        .edge(Edge::new("e1", NodeRef::step("start"), NodeRef::step("score")))
        .edge(Edge::new("e2", NodeRef::step("score"), NodeRef::step("high")).with_condition("$.score >= 80"))
        .edge(Edge::new("e3", NodeRef::step("score"), NodeRef::step("low")).with_condition("$.score < 80"))
        .build();

    let (executor, ctx) = build(def);
    executor.execute(&ctx).await.unwrap();

    assert!(ctx.step_output("high").is_some());
    assert!(ctx.step_output("low").is_none());
}

#[tokio::test]
async fn boundary_parallel_with_no_body_returns_empty_object() {
    let def = WorkflowDefinitionBuilder::new("wf1", "EmptyParallel")
        .step(Step::new("start", "Start", "start"))
        .group(BlockGroup::new("g1", "Empty", BlockGroupType::Parallel))
        .build();

    let (executor, ctx) = build(def);
    let graph = executor.graph();
    let group = graph.group("g1").unwrap().clone();
    let dispatcher = StepDispatcher::new();
    let config = RuntimeConfig::default();
    let (output, port) = flow_engine::execute_group(&group, graph, &dispatcher, &ctx, &config, None, json!({}))
        .await
        .unwrap();

    assert_eq!(output, json!({}));
    assert_eq!(port, flow_engine::GROUP_DEFAULT_PORT);
}

#[tokio::test]
async fn boundary_foreach_with_empty_items_reports_zero_iterations() {
    let def = WorkflowDefinitionBuilder::new("wf1", "EmptyForeach")
        .step(Step::new("start", "Start", "start"))
        .group(BlockGroup::new("g1", "Empty", BlockGroupType::Foreach))
        .build();

    let (executor, ctx) = build(def);
    let graph = executor.graph();
    let group = graph.group("g1").unwrap().clone();
    let dispatcher = StepDispatcher::new();
    let config = RuntimeConfig::default();
    let (output, _port) = flow_engine::execute_group(&group, graph, &dispatcher, &ctx, &config, None, json!({}))
        .await
        .unwrap();

    assert_eq!(output, json!({"iterations": 0, "completed": true, "results": []}));
}

#[tokio::test(start_paused = true)]
async fn boundary_wait_caps_duration_at_one_hour() {
    let step = Step::new("w1", "Wait", "wait").with_config(json!({"duration_ms": 7_200_000u64}));
    let def = WorkflowDefinitionBuilder::new("wf1", "Wait").build();
    let run = Run::new("r1", "t1", "wf1", 1, json!({}));
    let ctx = ExecutionContext::new(run, Arc::new(def), Default::default());

    let before = tokio::time::Instant::now();
    flow_engine::StepHandler::execute(&WaitHandler, &ctx, &step, json!({})).await.unwrap();
    let elapsed = before.elapsed();

    assert_eq!(elapsed, Duration::from_millis(3_600_000));
}

#[tokio::test]
async fn boundary_do_while_with_initially_false_condition_runs_body_exactly_once() {
    let mut while_group = BlockGroup::new("g1", "DoWhile", BlockGroupType::While);
    while_group.config = json!({"condition": "false", "do_while": true});
    let def = WorkflowDefinitionBuilder::new("wf1", "DoWhile")
        .step(Step::new("start", "Start", "start"))
        .group(while_group)
        .step(
            Step::new("tick", "Tick", "map")
                .with_config(json!({"template": {"n": 1}}))
                .in_group("g1", roles::BODY),
        )
        .build();

    let (executor, ctx) = build(def);
    let graph = executor.graph();
    let group = graph.group("g1").unwrap().clone();
    let dispatcher = StepDispatcher::new();
    let config = RuntimeConfig::default();
    let (output, _port) = flow_engine::execute_group(&group, graph, &dispatcher, &ctx, &config, None, json!({}))
        .await
        .unwrap();

    assert_eq!(output["iterations"], json!(1));
    assert_eq!(output["results"].as_array().unwrap().len(), 1);
}

struct UnregisteredProviderAdapter;

#[async_trait]
impl LlmAdapter for UnregisteredProviderAdapter {
    async fn complete(&self, _config: &serde_json::Value, _input: serde_json::Value) -> Result<(serde_json::Value, UsageMetadata), EngineError> {
        panic!("must not be called when the provider isn't registered");
    }

    fn is_registered(&self, _provider: &str) -> bool {
        false
    }
}

#[tokio::test]
async fn boundary_router_falls_back_to_first_route_for_unregistered_provider() {
    let step = Step::new("r1", "Router", "router").with_config(json!({
        "provider": "unregistered-provider",
        "routes": [{"name": "billing"}, {"name": "support"}],
    }));
    let handler = RouterHandler::new(Arc::new(UnregisteredProviderAdapter));
    let def = WorkflowDefinitionBuilder::new("wf1", "RouterTest").build();
    let run = Run::new("r1", "t1", "wf1", 1, json!({}));
    let ctx = ExecutionContext::new(run, Arc::new(def), Default::default());

    let output = flow_engine::StepHandler::execute(&handler, &ctx, &step, json!({"text": "hi"}))
        .await
        .unwrap();

    assert_eq!(output["selected_route"], json!("billing"));
    assert_eq!(output["fallback"], json!(true));
}

struct EchoSandbox;

#[async_trait]
impl JsSandbox for EchoSandbox {
    async fn execute(&self, _code: &str, input: serde_json::Value, _services: serde_json::Value) -> Result<serde_json::Value, EngineError> {
        Ok(input)
    }
}

struct SingleTenantBlockResolver {
    required_tenant: String,
}

#[async_trait]
impl BlockResolver for SingleTenantBlockResolver {
    async fn resolve(&self, _tenant_id: Option<&str>, _slug: &str) -> Result<Option<BlockDefinition>, EngineError> {
        Ok(Some(BlockDefinition {
            tenant_id: Some(self.required_tenant.clone()),
            ..Default::default()
        }))
    }
}

#[tokio::test]
async fn boundary_custom_block_rejects_a_run_from_the_wrong_tenant() {
    let step = Step::new("billing-export", "Billing Export", "billing-export");
    let handler = CustomBlockHandler::new(
        Arc::new(SingleTenantBlockResolver { required_tenant: "tenant-a".to_string() }),
        Arc::new(EchoSandbox),
    );
    let def = WorkflowDefinitionBuilder::new("wf1", "CustomBlockTest").build();
    let run = Run::new("r1", "tenant-b", "wf1", 1, json!({}));
    let ctx = ExecutionContext::new(run, Arc::new(def), Default::default());

    let err = flow_engine::StepHandler::execute(&handler, &ctx, &step, json!({}))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("tenant"));
}

#[tokio::test]
async fn inline_runner_persists_step_runs_and_marks_the_run_succeeded() {
    let def = WorkflowDefinitionBuilder::new("wf1", "Linear")
        .step(Step::new("start", "Start", "start"))
        .step(Step::new("log", "Log", "log").with_config(json!({"message": "hello {{$.name}}"})))
        .edge(Edge::new("e1", NodeRef::step("start"), NodeRef::step("log")))
        .build();

    let workflow_storage: SharedWorkflowStorage = Arc::new(MemoryWorkflowStorage::new());
    workflow_storage.save_workflow(&def).await.unwrap();
    let run_storage: SharedRunStorage = Arc::new(MemoryRunStorage::new());
    let step_run_storage: SharedStepRunStorage = Arc::new(MemoryStepRunStorage::new());
    let runner = InlineRunner::new(workflow_storage, run_storage, step_run_storage.clone());

    let graph = Arc::new(Graph::build(&def).unwrap());
    let dispatcher = Arc::new(StepDispatcher::new());
    let executor = Arc::new(GraphExecutor::new(graph, dispatcher, RuntimeConfig::default()));

    let run = Run::new("r1", "t1", "wf1", 1, json!({"name": "world"}));
    let finished = runner.run(run, executor, Arc::new(NullEventEmitter)).await.unwrap();

    assert_eq!(finished.status, flow_model::RunStatus::Succeeded);
    let step_runs = step_run_storage.list_step_runs("r1").await.unwrap();
    assert!(step_runs.iter().any(|sr| sr.step_id == "log" && sr.status == flow_model::StepRunStatus::Succeeded));
}

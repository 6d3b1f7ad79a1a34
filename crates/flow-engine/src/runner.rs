//! Inline Runner (§4.I): the Graph Executor driven synchronously, with
//! events streamed out through a caller-supplied emitter and step-runs
//! persisted best-effort alongside the run's own lifecycle transitions.

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::events::{EventEmitter, RunEvent};
use crate::executor::GraphExecutor;
use crate::graph::Graph;
use crate::storage::{SharedRunStorage, SharedStepRunStorage, SharedWorkflowStorage};
use flow_model::{Run, StepRun, StepRunStatus, WorkflowDefinition};
use std::sync::Arc;

pub struct InlineRunner {
    workflow_storage: SharedWorkflowStorage,
    run_storage: SharedRunStorage,
    step_run_storage: SharedStepRunStorage,
}

impl InlineRunner {
    pub fn new(
        workflow_storage: SharedWorkflowStorage,
        run_storage: SharedRunStorage,
        step_run_storage: SharedStepRunStorage,
    ) -> Self {
        Self {
            workflow_storage,
            run_storage,
            step_run_storage,
        }
    }

    /// Runs `run` to completion (or failure), streaming lifecycle events to
    /// `events` and persisting the run and its step-runs best-effort.
    /// `events.close()` is called unconditionally on return.
    pub async fn run(
        &self,
        mut run: Run,
        executor: Arc<GraphExecutor>,
        events: Arc<dyn EventEmitter>,
    ) -> Result<Run, EngineError> {
        let result = self.run_inner(&mut run, executor, &events).await;
        events.close();
        match result {
            Ok(()) => Ok(run),
            Err(e) => Err(e),
        }
    }

    async fn run_inner(&self, run: &mut Run, executor: Arc<GraphExecutor>, events: &Arc<dyn EventEmitter>) -> Result<(), EngineError> {
        let definition = self
            .workflow_storage
            .get_workflow(&run.workflow_id)
            .await?
            .ok_or_else(|| EngineError::InvalidState(format!("workflow not found: {}", run.workflow_id)))?;

        run.start();
        let _ = self.run_storage.save_run(run).await;
        events.emit(RunEvent::RunStarted { run_id: run.id.clone() });

        let exec_ctx = ExecutionContext::new(run.clone(), Arc::new(definition), Default::default())
            .with_events(events.clone());

        let outcome = executor.execute(&exec_ctx).await;
        self.persist_step_runs(run, executor.graph(), &exec_ctx).await;

        match outcome {
            Ok(output) => {
                run.succeed(output.clone());
                let _ = self.run_storage.save_run(run).await;
                events.emit(RunEvent::RunCompleted { run_id: run.id.clone(), output });
                Ok(())
            }
            Err(err) => {
                run.fail(err.to_string());
                let _ = self.run_storage.save_run(run).await;
                events.emit(RunEvent::RunFailed { run_id: run.id.clone(), error: err.to_string() });
                Err(err)
            }
        }
    }

    /// Best-effort: a storage failure here must not fail the run, since the
    /// run's own outcome has already been decided by the time this runs.
    async fn persist_step_runs(&self, run: &Run, graph: &Graph, exec_ctx: &ExecutionContext) {
        for step_id in exec_ctx.completed_step_ids() {
            let output = exec_ctx.step_output(&step_id);
            let port = exec_ctx.step_port(&step_id);
            let sequence = exec_ctx.step_sequence(&step_id).unwrap_or(0);
            let status = if port.as_deref() == Some("error") {
                StepRunStatus::Failed
            } else {
                StepRunStatus::Succeeded
            };
            let input = graph
                .step(&step_id)
                .map(|_| serde_json::Value::Null)
                .unwrap_or(serde_json::Value::Null);

            let mut step_run = StepRun::start(run.id.clone(), step_id.clone(), 1, input);
            step_run.status = status;
            step_run.output = output;
            step_run.port = port;
            step_run.sequence = sequence;
            step_run.finished_at = Some(chrono::Utc::now());

            if let Err(e) = self.step_run_storage.save_step_run(&step_run).await {
                tracing::warn!(step_id, error = %e, "failed to persist step-run");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::dispatch::StepDispatcher;
    use crate::events::{ChannelEventEmitter, NullEventEmitter};
    use crate::storage::{MemoryRunStorage, MemoryStepRunStorage, MemoryWorkflowStorage};
    use flow_model::{Edge, NodeRef, Step, WorkflowDefinitionBuilder};
    use serde_json::json;

    #[tokio::test]
    async fn runs_linear_workflow_and_marks_succeeded() {
        let def = WorkflowDefinitionBuilder::new("wf1", "Linear")
            .step(Step::new("start", "Start", "start"))
            .step(Step::new("log", "Log", "log").with_config(json!({"message": "hello"})))
            .edge(Edge::new("e1", NodeRef::step("start"), NodeRef::step("log")))
            .build();

        let workflow_storage: SharedWorkflowStorage = Arc::new(MemoryWorkflowStorage::new());
        workflow_storage.save_workflow(&def).await.unwrap();
        let run_storage: SharedRunStorage = Arc::new(MemoryRunStorage::new());
        let step_run_storage: SharedStepRunStorage = Arc::new(MemoryStepRunStorage::new());
        let runner = InlineRunner::new(workflow_storage, run_storage.clone(), step_run_storage.clone());

        let graph = Arc::new(Graph::build(&def).unwrap());
        let dispatcher = Arc::new(StepDispatcher::new());
        let executor = Arc::new(GraphExecutor::new(graph, dispatcher, RuntimeConfig::default()));

        let run = Run::new("r1", "t1", "wf1", 1, json!({}));
        let finished = runner.run(run, executor, Arc::new(NullEventEmitter)).await.unwrap();

        assert_eq!(finished.status, flow_model::RunStatus::Succeeded);
        let step_runs = step_run_storage.list_step_runs("r1").await.unwrap();
        assert!(step_runs.iter().any(|sr| sr.step_id == "log"));
    }

    #[tokio::test]
    async fn missing_workflow_fails_the_run_without_persisting_it_as_succeeded() {
        let workflow_storage: SharedWorkflowStorage = Arc::new(MemoryWorkflowStorage::new());
        let run_storage: SharedRunStorage = Arc::new(MemoryRunStorage::new());
        let step_run_storage: SharedStepRunStorage = Arc::new(MemoryStepRunStorage::new());
        let runner = InlineRunner::new(workflow_storage, run_storage, step_run_storage);

        let def = WorkflowDefinitionBuilder::new("wf1", "X").step(Step::new("s", "S", "start")).build();
        let graph = Arc::new(Graph::build(&def).unwrap());
        let dispatcher = Arc::new(StepDispatcher::new());
        let executor = Arc::new(GraphExecutor::new(graph, dispatcher, RuntimeConfig::default()));

        let run = Run::new("r1", "t1", "missing-workflow", 1, json!({}));
        let result = runner.run(run, executor, Arc::new(NullEventEmitter)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn streams_step_lifecycle_events_through_the_supplied_emitter() {
        let def = WorkflowDefinitionBuilder::new("wf1", "Linear")
            .step(Step::new("start", "Start", "start"))
            .step(Step::new("log", "Log", "log").with_config(json!({"message": "hello"})))
            .edge(Edge::new("e1", NodeRef::step("start"), NodeRef::step("log")))
            .build();

        let workflow_storage: SharedWorkflowStorage = Arc::new(MemoryWorkflowStorage::new());
        workflow_storage.save_workflow(&def).await.unwrap();
        let run_storage: SharedRunStorage = Arc::new(MemoryRunStorage::new());
        let step_run_storage: SharedStepRunStorage = Arc::new(MemoryStepRunStorage::new());
        let runner = InlineRunner::new(workflow_storage, run_storage, step_run_storage);

        let graph = Arc::new(Graph::build(&def).unwrap());
        let dispatcher = Arc::new(StepDispatcher::new());
        let executor = Arc::new(GraphExecutor::new(graph, dispatcher, RuntimeConfig::default()));

        let (emitter, mut rx) = ChannelEventEmitter::new(32);
        let run = Run::new("r1", "t1", "wf1", 1, json!({}));
        runner.run(run, executor, Arc::new(emitter)).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(events.iter().any(|e| matches!(e, RunEvent::StepStarted { step_id, .. } if step_id == "start")));
        assert!(events.iter().any(|e| matches!(e, RunEvent::StepCompleted { step_id, .. } if step_id == "log")));
        assert!(events.iter().any(|e| matches!(e, RunEvent::RunCompleted { .. })));
    }
}

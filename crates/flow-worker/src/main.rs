//! Job-queue worker.
//!
//! Pops queued runs off the Redis-backed job queue and drives each through
//! the Graph Executor via the Inline Runner, one at a time. A real
//! deployment wires a persistent `WorkflowStorage`/`RunStorage` behind the
//! traits `flow-engine` defines; this binary uses the in-memory stand-ins
//! since persistence is an external concern (§1 Non-goals).

use flow_engine::{
    ExecutionContext, Graph, GraphExecutor, InlineRunner, MemoryRunStorage, MemoryStepRunStorage,
    MemoryWorkflowStorage, NullEventEmitter, RunStorage, RuntimeConfig, SharedRunStorage,
    SharedStepRunStorage, SharedWorkflowStorage, StepDispatcher, WorkflowStorage,
};
use flow_model::{ExecutionMode, Job, Run};
use flow_queue::JobQueue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RuntimeConfig::from_env();
    let redis_url = std::env::var("FLOW_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());

    info!(redis_url, "connecting to job queue");
    let queue = JobQueue::connect(&redis_url).await?;

    let workflow_storage: SharedWorkflowStorage = Arc::new(MemoryWorkflowStorage::new());
    let run_storage: SharedRunStorage = Arc::new(MemoryRunStorage::new());
    let step_run_storage: SharedStepRunStorage = Arc::new(MemoryStepRunStorage::new());
    let runner = Arc::new(InlineRunner::new(
        workflow_storage.clone(),
        run_storage.clone(),
        step_run_storage,
    ));

    info!("flow-worker ready, waiting for jobs");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            dequeued = queue.dequeue(DEQUEUE_TIMEOUT) => {
                match dequeued {
                    Ok(Some(job)) => {
                        let runner = runner.clone();
                        let workflow_storage = workflow_storage.clone();
                        let run_storage = run_storage.clone();
                        let config = config.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_job(job, runner, workflow_storage, run_storage, config).await {
                                error!(error = %e, "job failed");
                            }
                        });
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "dequeue failed, retrying");
                    }
                }
            }
        }
    }

    info!("flow-worker shut down");
    Ok(())
}

async fn handle_job(
    job: Job,
    runner: Arc<InlineRunner>,
    workflow_storage: SharedWorkflowStorage,
    run_storage: SharedRunStorage,
    config: RuntimeConfig,
) -> anyhow::Result<()> {
    info!(job_id = %job.id, run_id = %job.run_id, "starting job");

    let definition = workflow_storage
        .get_workflow(&job.workflow_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("workflow not found: {}", job.workflow_id))?;

    let run = match run_storage.get_run(&job.run_id).await? {
        Some(existing) => existing,
        None => Run::new(job.run_id.clone(), job.tenant_id.clone(), job.workflow_id.clone(), job.workflow_version, job.input.clone()),
    };

    let graph = Arc::new(Graph::build(&definition)?);
    let dispatcher = Arc::new(StepDispatcher::new());
    let executor = Arc::new(GraphExecutor::new(graph, dispatcher, config));

    match job.execution_mode {
        ExecutionMode::Full | ExecutionMode::Resume => {
            let finished = runner.run(run, executor, Arc::new(NullEventEmitter)).await?;
            info!(run_id = %finished.id, status = ?finished.status, "job finished");
        }
        ExecutionMode::SingleStep => {
            let step_id = job
                .target_step_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("single_step job missing target_step_id"))?;
            let exec_ctx = ExecutionContext::new(run, Arc::new(definition), job.injected_outputs.clone().unwrap_or_default());
            let output = executor.execute_single_step(&exec_ctx, &step_id, job.step_input.clone()).await?;
            info!(run_id = %job.run_id, step_id, output = %output, "single-step job finished");
        }
    }

    Ok(())
}

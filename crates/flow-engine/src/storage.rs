//! Storage backends for workflow definitions and runs.
//!
//! The in-memory implementations below are stand-ins used by the inline
//! runner and by tests; `flow-worker` wires a persistent backend behind the
//! same traits when one is needed.

use crate::error::EngineError;
use async_trait::async_trait;
use flow_model::{Run, StepRun, WorkflowDefinition};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait WorkflowStorage: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, EngineError>;
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), EngineError>;
    async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError>;
    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError>;
}

#[async_trait]
pub trait RunStorage: Send + Sync {
    async fn get_run(&self, id: &str) -> Result<Option<Run>, EngineError>;
    async fn save_run(&self, run: &Run) -> Result<(), EngineError>;
    async fn delete_run(&self, id: &str) -> Result<bool, EngineError>;
    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<Run>, EngineError>;
}

#[derive(Default)]
pub struct MemoryWorkflowStorage {
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
}

impl MemoryWorkflowStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStorage for MemoryWorkflowStorage {
    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, EngineError> {
        Ok(self.workflows.read().get(id).cloned())
    }

    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), EngineError> {
        self.workflows.write().insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.workflows.write().remove(id).is_some())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        Ok(self.workflows.read().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryRunStorage {
    runs: RwLock<HashMap<String, Run>>,
}

impl MemoryRunStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStorage for MemoryRunStorage {
    async fn get_run(&self, id: &str) -> Result<Option<Run>, EngineError> {
        Ok(self.runs.read().get(id).cloned())
    }

    async fn save_run(&self, run: &Run) -> Result<(), EngineError> {
        self.runs.write().insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn delete_run(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.runs.write().remove(id).is_some())
    }

    async fn list_runs(&self, workflow_id: &str) -> Result<Vec<Run>, EngineError> {
        Ok(self
            .runs
            .read()
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
pub trait StepRunStorage: Send + Sync {
    async fn save_step_run(&self, step_run: &StepRun) -> Result<(), EngineError>;
    async fn list_step_runs(&self, run_id: &str) -> Result<Vec<StepRun>, EngineError>;
}

#[derive(Default)]
pub struct MemoryStepRunStorage {
    step_runs: RwLock<Vec<StepRun>>,
}

impl MemoryStepRunStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepRunStorage for MemoryStepRunStorage {
    async fn save_step_run(&self, step_run: &StepRun) -> Result<(), EngineError> {
        self.step_runs.write().push(step_run.clone());
        Ok(())
    }

    async fn list_step_runs(&self, run_id: &str) -> Result<Vec<StepRun>, EngineError> {
        Ok(self
            .step_runs
            .read()
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }
}

pub type SharedWorkflowStorage = Arc<dyn WorkflowStorage>;
pub type SharedRunStorage = Arc<dyn RunStorage>;
pub type SharedStepRunStorage = Arc<dyn StepRunStorage>;

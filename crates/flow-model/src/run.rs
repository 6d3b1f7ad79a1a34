//! Runs, step-runs, and job requests.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub tenant_id: String,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: RunStatus,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub trigger: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Run {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>, workflow_id: impl Into<String>, workflow_version: u32, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            workflow_id: workflow_id.into(),
            workflow_version,
            status: RunStatus::Pending,
            input,
            output: None,
            error: None,
            trigger: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(chrono::Utc::now());
    }

    pub fn succeed(&mut self, output: serde_json::Value) {
        self.status = RunStatus::Succeeded;
        self.output = Some(output);
        self.finished_at = Some(chrono::Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(chrono::Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.finished_at = Some(chrono::Utc::now());
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    Running,
    Succeeded,
    Failed,
}

/// One record per (run, step, attempt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub run_id: String,
    pub step_id: String,
    pub attempt: u32,
    pub status: StepRunStatus,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub error: Option<crate::ExecutionError>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Monotonically increasing within a run; total order across all completions.
    pub sequence: u64,
}

impl StepRun {
    pub fn start(run_id: impl Into<String>, step_id: impl Into<String>, attempt: u32, input: serde_json::Value) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            attempt,
            status: StepRunStatus::Running,
            input,
            output: None,
            port: None,
            error: None,
            started_at: chrono::Utc::now(),
            finished_at: None,
            sequence: 0,
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|f| f - self.started_at)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Full,
    SingleStep,
    Resume,
}

/// A queued request to execute a workflow (or a single step of one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub run_id: String,
    #[serde(default)]
    pub input: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub execution_mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injected_outputs: Option<std::collections::HashMap<String, serde_json::Value>>,
}

impl Job {
    pub fn new_full_run(tenant_id: impl Into<String>, workflow_id: impl Into<String>, workflow_version: u32, run_id: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            workflow_id: workflow_id.into(),
            workflow_version,
            run_id: run_id.into(),
            input,
            created_at: chrono::Utc::now(),
            execution_mode: ExecutionMode::Full,
            target_step_id: None,
            step_input: None,
            injected_outputs: None,
        }
    }
}

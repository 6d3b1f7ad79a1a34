//! Error types for the workflow data model.

use thiserror::Error;

/// Primary error type for workflow-definition-level operations.
#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("tenant access error: block {block} belongs to tenant {expected}, run is tenant {actual}")]
    TenantMismatch {
        block: String,
        expected: String,
        actual: String,
    },

    #[error("execution context required for tenant-scoped block {0}")]
    ExecutionContextRequired(String),
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowError::SerializationError(e.to_string())
    }
}

/// Error context for step execution, attached to a failed `StepRun`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ExecutionErrorContext {
    pub step_name: Option<String>,
    pub item_index: Option<usize>,
    pub description: Option<String>,
}

/// Execution error with context, stored on a failed `StepRun`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionError {
    pub message: String,
    pub context: ExecutionErrorContext,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: ExecutionErrorContext::default(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.context.step_name = Some(step.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.context.description = Some(desc.into());
        self
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref step) = self.context.step_name {
            write!(f, " (step: {})", step)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {}

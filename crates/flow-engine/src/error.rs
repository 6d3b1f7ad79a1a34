//! Error types for the execution engine.

use flow_model::WorkflowError;
use thiserror::Error;

/// Errors that can occur while building or driving a run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("step execution error in '{step}': {message}")]
    StepExecution { step: String, message: String },

    #[error("no start steps found in workflow")]
    NoStartSteps,

    #[error("execution was cancelled")]
    Cancelled,

    #[error("execution timed out after {0} seconds")]
    Timeout(u64),

    #[error("invalid execution state: {0}")]
    InvalidState(String),

    #[error("step handler not registered: {0}")]
    HandlerNotFound(String),

    #[error("missing input data for step '{0}'")]
    MissingInput(String),

    #[error("expression evaluation error: {0}")]
    Expression(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::expression::ExpressionError> for EngineError {
    fn from(e: crate::expression::ExpressionError) -> Self {
        EngineError::Expression(e.to_string())
    }
}

impl From<EngineError> for flow_model::ExecutionError {
    fn from(e: EngineError) -> Self {
        flow_model::ExecutionError::new(e.to_string())
    }
}

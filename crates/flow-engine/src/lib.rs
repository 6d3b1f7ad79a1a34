//! # flow-engine
//!
//! Execution engine for the workflow orchestration runtime: the
//! Path/Condition Evaluator and Template Expander, the Graph Model, the
//! Step Dispatcher and its handlers, the six Block-Group control-flow
//! interpreters, the Graph Executor that drives a run end to end, the
//! run-scoped Execution Context, the Inline Runner, the Event Emitter, and
//! the Usage Hook.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod executor;
pub mod expression;
pub mod graph;
pub mod group;
pub mod runner;
pub mod step_exec;
pub mod storage;
pub mod usage;

pub use config::RuntimeConfig;
pub use context::ExecutionContext;
pub use dispatch::{extract_port, StepDispatcher, StepHandler};
pub use error::EngineError;
pub use events::{
    ChannelEventEmitter, CompositeEventEmitter, EventEmitter, NullEventEmitter, RunEvent,
    RunKeyedBroadcaster, RunSubscription,
};
pub use executor::GraphExecutor;
pub use expression::{path_condition, template, ExpressionError, ExpressionResult};
pub use graph::Graph;
pub use group::{execute_group, GROUP_DEFAULT_PORT};
pub use runner::InlineRunner;
pub use storage::{
    MemoryRunStorage, MemoryStepRunStorage, MemoryWorkflowStorage, RunStorage, SharedRunStorage,
    SharedStepRunStorage, SharedWorkflowStorage, StepRunStorage, WorkflowStorage,
};
pub use usage::{invoke_usage_hook, UsageHook};

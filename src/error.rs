//! Top-level error type crossing the engine boundary (§7, §10.2). Aggregates
//! every component error via `#[from]` so callers see one type, plus the
//! handful of conditions that belong to the engine loop itself rather than
//! any single component.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::expression::ExpressionError;
use crate::fork::ForkError;
use crate::ids::{NodeId, ThreadId, WorkflowId};
use crate::node_executor::NodeExecutorError;
use crate::session_orchestrator::SessionError;
use crate::state_manager::StateManagerError;
use crate::thread_lifecycle::LifecycleError;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum EngineError {
    #[error("workflow {workflow_id} has no node {node_id}")]
    #[diagnostic(code(threadengine::engine::unknown_node))]
    UnknownNode { workflow_id: WorkflowId, node_id: NodeId },

    #[error("workflow {workflow_id} is empty")]
    #[diagnostic(code(threadengine::engine::workflow_empty))]
    WorkflowEmpty { workflow_id: WorkflowId },

    #[error("node {node_id} exhausted its retries on thread {thread_id}: {reason}")]
    #[diagnostic(code(threadengine::engine::node_execution_failed))]
    NodeExecutionFailed {
        thread_id: ThreadId,
        node_id: NodeId,
        reason: String,
    },

    #[error("node {node_id} timed out on thread {thread_id}")]
    #[diagnostic(code(threadengine::engine::node_timeout))]
    NodeTimeout { thread_id: ThreadId, node_id: NodeId },

    #[error("thread {thread_id} exceeded its execution timeout")]
    #[diagnostic(code(threadengine::engine::workflow_timeout))]
    WorkflowTimeout { thread_id: ThreadId },

    #[error("thread {thread_id} exceeded its step limit")]
    #[diagnostic(code(threadengine::engine::step_limit))]
    StepLimitExceeded { thread_id: ThreadId },

    #[error("thread {thread_id} was cancelled")]
    #[diagnostic(code(threadengine::engine::cancelled))]
    Cancelled { thread_id: ThreadId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateManagerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    NodeExecutor(#[from] NodeExecutorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fork(#[from] ForkError),
}

//! §4.6 Node Executor contract — the extension point user code implements to
//! give a node type actual behavior. The engine itself only knows how to
//! call `can_execute`/`execute`; everything else (LLM calls, tool calls,
//! transforms) lives outside this crate.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::execution_controller::ControlState;
use crate::workflow::NodeDescriptor;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum NodeExecutorError {
    #[error("node executor failed: {0}")]
    #[diagnostic(code(threadengine::node_executor::failed))]
    Failed(String),

    #[error("no executor registered for node type {node_type}")]
    #[diagnostic(code(threadengine::node_executor::unregistered))]
    Unregistered { node_type: String },
}

/// The input a [`NodeExecutor`] sees: the node's static description, a
/// read-only view of the thread's current state, and the thread's
/// cancellation handle (§4.6, §5: long-running executors must be able to
/// observe a mid-flight cancel rather than only between node executions).
#[derive(Clone, Debug)]
pub struct NodeInput {
    pub node: NodeDescriptor,
    pub state_data: FxHashMap<String, Value>,
    pub state_metadata: FxHashMap<String, String>,
    pub control: Arc<ControlState>,
}

impl NodeInput {
    /// Convenience accessor so executors don't need to reach into
    /// `control` directly for the common case.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}

/// What a node execution produced (§4.8.e: recorded in history regardless of
/// `success`).
#[derive(Clone, Debug, Default)]
pub struct NodeResult {
    pub output: FxHashMap<String, Value>,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: FxHashMap<String, Value>,
}

impl NodeResult {
    #[must_use]
    pub fn ok(output: FxHashMap<String, Value>) -> Self {
        Self {
            output,
            success: true,
            error: None,
            metadata: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            output: FxHashMap::default(),
            success: false,
            error: Some(error.into()),
            metadata: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: FxHashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Implemented once per node type (or dispatched generically via
/// `node.node_type`/`node.properties`) and registered with the engine.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Cheap precondition check before the engine commits to executing this
    /// node (e.g. required properties present). Default: always runnable.
    fn can_execute(&self, _input: &NodeInput) -> bool {
        true
    }

    async fn execute(&self, input: NodeInput) -> Result<NodeResult, NodeExecutorError>;
}

/// Dispatches to one [`NodeExecutor`] per `node_type` string (§9 "dynamic
/// node properties" — node type is the dispatch key, properties are passed
/// through untouched).
#[derive(Default)]
pub struct NodeExecutorRegistry {
    executors: FxHashMap<String, Box<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_type: impl Into<String>, executor: Box<dyn NodeExecutor>) {
        self.executors.insert(node_type.into(), executor);
    }

    #[must_use]
    pub fn get(&self, node_type: &str) -> Option<&dyn NodeExecutor> {
        self.executors.get(node_type).map(std::convert::AsRef::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeId;
    use crate::workflow::{NodeDescriptor, NodeType};

    struct EchoExecutor;

    #[async_trait]
    impl NodeExecutor for EchoExecutor {
        async fn execute(&self, input: NodeInput) -> Result<NodeResult, NodeExecutorError> {
            Ok(NodeResult::ok(input.state_data))
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_node_type() {
        let mut registry = NodeExecutorRegistry::new();
        registry.register("transform", Box::new(EchoExecutor));

        let node = NodeDescriptor::new(NodeId::from("A"), NodeType::Transform);
        let input = NodeInput {
            node: node.clone(),
            state_data: FxHashMap::default(),
            state_metadata: FxHashMap::default(),
            control: Arc::new(ControlState::default()),
        };

        let executor = registry.get(&node.node_type.to_string()).unwrap();
        let result = executor.execute(input).await.unwrap();
        assert!(result.success);
    }

    #[test]
    fn missing_executor_is_none() {
        let registry = NodeExecutorRegistry::new();
        assert!(registry.get("llm").is_none());
    }

    #[tokio::test]
    async fn executor_observes_a_mid_flight_cancel_through_the_shared_control_handle() {
        struct PollsForCancellation;

        #[async_trait]
        impl NodeExecutor for PollsForCancellation {
            async fn execute(&self, input: NodeInput) -> Result<NodeResult, NodeExecutorError> {
                while !input.is_cancelled() {
                    tokio::task::yield_now().await;
                }
                Ok(NodeResult::failure("cancelled"))
            }
        }

        let node = NodeDescriptor::new(NodeId::from("A"), NodeType::Transform);
        let controller = crate::execution_controller::ExecutionController::new();
        let thread_id = crate::ids::ThreadId::generate();
        let control = controller.register(thread_id.clone());
        let input = NodeInput {
            node,
            state_data: FxHashMap::default(),
            state_metadata: FxHashMap::default(),
            control: control.clone(),
        };

        let run = tokio::spawn(async move { PollsForCancellation.execute(input).await });
        tokio::task::yield_now().await;
        controller.cancel(&thread_id);

        let result = run.await.unwrap().unwrap();
        assert!(!result.success);
    }
}

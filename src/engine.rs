//! §4.8 Workflow Execution Engine — the single-node-per-step loop that
//! drives one thread from its start node to a terminal outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::CheckpointManager;
use crate::config::EngineConfig;
use crate::execution_controller::ExecutionController;
use crate::expression::EvalScope;
use crate::history::{HistoryManager, NodeExecStatus, NodeExecutionRecord};
use crate::ids::{NodeId, ThreadId, WorkflowId};
use crate::node_executor::{NodeExecutorRegistry, NodeInput};
use crate::router::ConditionalRouter;
use crate::state::WorkflowStateSnapshot;
use crate::state_manager::StateManager;
use crate::workflow::Workflow;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Completed,
    Cancelled,
    Timeout,
    StepLimit,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionErrorDetails {
    pub node_id: Option<NodeId>,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub success: bool,
    pub final_state: Option<WorkflowStateSnapshot>,
    pub executed_nodes: u64,
    pub execution_time_ms: u64,
    pub checkpoint_count: u64,
    pub status: ExecutionStatus,
    pub error_details: Option<ExecutionErrorDetails>,
}

/// Wires together every component the engine loop touches. Owns none of
/// them exclusively — callers can share a single engine across many
/// concurrently executing threads.
pub struct WorkflowExecutionEngine {
    state_manager: Arc<StateManager>,
    history_manager: Arc<HistoryManager>,
    checkpoint_manager: Arc<CheckpointManager>,
    router: Arc<ConditionalRouter>,
    controller: Arc<ExecutionController>,
    executors: Arc<NodeExecutorRegistry>,
    config: EngineConfig,
}

impl WorkflowExecutionEngine {
    #[must_use]
    pub fn new(
        state_manager: Arc<StateManager>,
        history_manager: Arc<HistoryManager>,
        checkpoint_manager: Arc<CheckpointManager>,
        router: Arc<ConditionalRouter>,
        controller: Arc<ExecutionController>,
        executors: Arc<NodeExecutorRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            state_manager,
            history_manager,
            checkpoint_manager,
            router,
            controller,
            executors,
            config,
        }
    }

    /// Runs `thread_id` against `workflow` from its start node to a terminal
    /// outcome (§4.8). `initial_data` seeds the thread's `WorkflowState`.
    #[tracing::instrument(skip(self, workflow, initial_data), err)]
    pub async fn execute(
        &self,
        workflow: &Workflow,
        thread_id: ThreadId,
        initial_data: FxHashMap<String, Value>,
    ) -> Result<WorkflowExecutionResult, crate::error::EngineError> {
        if workflow.is_empty() {
            return Err(crate::error::EngineError::WorkflowEmpty {
                workflow_id: workflow.id.clone(),
            });
        }
        if !workflow.is_active() {
            return Err(crate::error::EngineError::Lifecycle(
                crate::thread_lifecycle::LifecycleError::WorkflowInactive {
                    workflow_id: workflow.id.clone(),
                },
            ));
        }
        let start = workflow
            .start_node()
            .ok_or_else(|| crate::error::EngineError::WorkflowEmpty {
                workflow_id: workflow.id.clone(),
            })?;

        self.state_manager.initialize(thread_id.clone(), workflow.id.clone(), initial_data);
        self.run_loop(workflow, thread_id, Some(start.id.clone()), 0, 0).await
    }

    /// Resumes a thread from a previously taken checkpoint (§4.8 "Resume
    /// from checkpoint"). The checkpoint was taken *before* its
    /// `current_node` ran (§4.8.c), so the loop below re-enters at that
    /// node rather than skipping past it; the node is executed exactly
    /// once across the combined run.
    #[tracing::instrument(skip(self, workflow), err)]
    pub async fn resume_from_checkpoint(
        &self,
        workflow: &Workflow,
        thread_id: ThreadId,
        checkpoint_id: &crate::ids::CheckpointId,
    ) -> Result<WorkflowExecutionResult, crate::error::EngineError> {
        let checkpoint = self.checkpoint_manager.restore(checkpoint_id).await?;
        self.state_manager.clear_state(&thread_id);
        self.state_manager
            .initialize(thread_id.clone(), checkpoint.workflow_id.clone(), checkpoint.data.clone());
        self.state_manager.set_current_node(&thread_id, checkpoint.current_node.clone())?;
        self.run_loop(workflow, thread_id, checkpoint.current_node, checkpoint.step_index, 0)
            .await
    }

    async fn run_loop(
        &self,
        workflow: &Workflow,
        thread_id: ThreadId,
        start_node: Option<NodeId>,
        mut executed_nodes: u64,
        mut checkpoint_count: u64,
    ) -> Result<WorkflowExecutionResult, crate::error::EngineError> {
        let control = self.controller.register(thread_id.clone());
        let clock = Instant::now();

        let mut current_node = start_node;
        let mut steps_since_checkpoint: u64 = 0;
        let mut previous_result = FxHashMap::default();
        let result;

        loop {
            if control.is_cancelled() {
                result = self.terminate(&thread_id, ExecutionStatus::Cancelled, None, executed_nodes, checkpoint_count, clock);
                break;
            }
            if control.is_paused() {
                control.wait_until_resumed().await;
                if control.is_cancelled() {
                    result = self.terminate(&thread_id, ExecutionStatus::Cancelled, None, executed_nodes, checkpoint_count, clock);
                    break;
                }
            }
            if clock.elapsed() >= self.config.timeout {
                result = self.terminate(&thread_id, ExecutionStatus::Timeout, None, executed_nodes, checkpoint_count, clock);
                break;
            }
            if executed_nodes >= self.config.max_steps {
                result = self.terminate(&thread_id, ExecutionStatus::StepLimit, None, executed_nodes, checkpoint_count, clock);
                break;
            }

            let Some(node_id) = current_node.clone() else {
                result = self.terminate(&thread_id, ExecutionStatus::Completed, None, executed_nodes, checkpoint_count, clock);
                break;
            };

            let Some(node) = workflow.node(&node_id) else {
                let details = ExecutionErrorDetails {
                    node_id: Some(node_id.clone()),
                    error_type: "UnknownNode".to_string(),
                    message: format!("workflow {} has no node {node_id}", workflow.id),
                    timestamp: Utc::now(),
                };
                result = self.terminate(&thread_id, ExecutionStatus::Error, Some(details), executed_nodes, checkpoint_count, clock);
                break;
            };

            if self.config.enable_checkpoints && steps_since_checkpoint >= self.config.checkpoint_interval {
                let snapshot = self.state_manager.get_state(&thread_id)?;
                self.checkpoint_manager
                    .create(
                        thread_id.clone(),
                        workflow.id.clone(),
                        Some(node_id.clone()),
                        snapshot.data,
                        FxHashMap::default(),
                        executed_nodes,
                    )
                    .await?;
                checkpoint_count += 1;
                steps_since_checkpoint = 0;
            }

            let Some(executor) = self.executors.get(&node.node_type.to_string()) else {
                let details = ExecutionErrorDetails {
                    node_id: Some(node_id.clone()),
                    error_type: "NodeNotReady".to_string(),
                    message: format!("no executor registered for node type {}", node.node_type),
                    timestamp: Utc::now(),
                };
                result = self.terminate(&thread_id, ExecutionStatus::Error, Some(details), executed_nodes, checkpoint_count, clock);
                break;
            };

            let snapshot = self.state_manager.get_state(&thread_id)?;
            let input = NodeInput {
                node: node.clone(),
                state_data: snapshot.data.clone(),
                state_metadata: snapshot.metadata.clone(),
                control: control.clone(),
            };

            if !executor.can_execute(&input) {
                let details = ExecutionErrorDetails {
                    node_id: Some(node_id.clone()),
                    error_type: "NodeNotReady".to_string(),
                    message: format!("node {node_id} is not ready to execute"),
                    timestamp: Utc::now(),
                };
                result = self.terminate(&thread_id, ExecutionStatus::Error, Some(details), executed_nodes, checkpoint_count, clock);
                break;
            }

            let node_result = self
                .run_with_retries(&*executor, input, node_id.clone(), &thread_id, &snapshot.data)
                .await;

            self.state_manager.update_state(&thread_id, node_result.output.clone())?;
            previous_result = node_result.output.clone();
            executed_nodes += 1;
            steps_since_checkpoint += 1;

            if !node_result.success {
                if self.config.enable_error_recovery {
                    let snapshot = self.state_manager.get_state(&thread_id)?;
                    let scope = routing_scope(&snapshot, &previous_result);
                    let decision = self.router.route(workflow, &node_id, true, &scope, self.config.record_routing_history);
                    if let Some(next) = decision.to {
                        current_node = Some(next);
                        continue;
                    }
                }
                let details = ExecutionErrorDetails {
                    node_id: Some(node_id.clone()),
                    error_type: "NodeExecutionFailed".to_string(),
                    message: node_result.error.clone().unwrap_or_else(|| "node execution failed".to_string()),
                    timestamp: Utc::now(),
                };
                result = self.terminate(&thread_id, ExecutionStatus::Error, Some(details), executed_nodes, checkpoint_count, clock);
                break;
            }

            let snapshot = self.state_manager.get_state(&thread_id)?;
            let scope = routing_scope(&snapshot, &previous_result);
            let decision = self.router.route(workflow, &node_id, false, &scope, self.config.record_routing_history);
            match decision.to {
                Some(next) => current_node = Some(next),
                None => {
                    result = self.terminate(&thread_id, ExecutionStatus::Completed, None, executed_nodes, checkpoint_count, clock);
                    break;
                }
            }
        }

        self.controller.mark_completed(&thread_id);
        self.controller.unregister(&thread_id);
        result
    }

    /// Retries a single node execution up to `max_node_retries` times,
    /// recording one `NodeExecutionRecord` per *attempt* (§8 seed scenario 3:
    /// a node that fails twice then succeeds leaves 2 failure + 1 success
    /// history entries) while the engine loop still counts the whole retry
    /// sequence as one logical step.
    async fn run_with_retries(
        &self,
        executor: &dyn crate::node_executor::NodeExecutor,
        input: NodeInput,
        node_id: NodeId,
        thread_id: &ThreadId,
        input_snapshot: &FxHashMap<String, Value>,
    ) -> crate::node_executor::NodeResult {
        let exponential_backoff = matches!(
            input.node.properties.get("retryBackoff").and_then(Value::as_str),
            Some("exponential")
        );

        let mut attempt = 0u32;
        loop {
            let node_clock = Instant::now();
            let outcome = tokio::time::timeout(self.config.node_timeout, executor.execute(input.clone())).await;
            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => crate::node_executor::NodeResult::failure(err.to_string()),
                Err(_) => crate::node_executor::NodeResult::failure(format!(
                    "node {node_id} on thread {thread_id} timed out after {:?}",
                    self.config.node_timeout
                )),
            };
            let node_duration_ms = u64::try_from(node_clock.elapsed().as_millis()).unwrap_or(u64::MAX);

            self.history_manager.record(NodeExecutionRecord {
                thread_id: thread_id.clone(),
                node_id: node_id.clone(),
                timestamp: Utc::now(),
                input_snapshot: input_snapshot.clone(),
                output: result.output.clone(),
                status: if result.success { NodeExecStatus::Success } else { NodeExecStatus::Failure },
                metadata: result.metadata.clone(),
                duration_ms: node_duration_ms,
            });

            if result.success || attempt >= self.config.max_node_retries {
                return result;
            }
            attempt += 1;
            let delay = if exponential_backoff {
                self.config.node_retry_delay * 2u32.pow(attempt.saturating_sub(1))
            } else {
                self.config.node_retry_delay
            };
            tokio::time::sleep(delay).await;
        }
    }

    fn terminate(
        &self,
        thread_id: &ThreadId,
        status: ExecutionStatus,
        error_details: Option<ExecutionErrorDetails>,
        executed_nodes: u64,
        checkpoint_count: u64,
        clock: Instant,
    ) -> Result<WorkflowExecutionResult, crate::error::EngineError> {
        let final_state = self.state_manager.get_state(thread_id).ok();
        Ok(WorkflowExecutionResult {
            success: matches!(status, ExecutionStatus::Completed),
            final_state,
            executed_nodes,
            execution_time_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            checkpoint_count,
            status,
            error_details,
        })
    }
}

fn routing_scope(snapshot: &WorkflowStateSnapshot, previous_result: &FxHashMap<String, Value>) -> EvalScope {
    EvalScope {
        state_data: snapshot.data.clone(),
        state_metadata: snapshot.metadata.clone(),
        previous_result: previous_result.clone(),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::ids::EdgeId;
    use crate::node_executor::{NodeExecutor, NodeExecutorError, NodeResult};
    use crate::workflow::{Edge, EdgeKind, NodeDescriptor, NodeType};

    struct AlwaysSucceeds;

    #[async_trait]
    impl NodeExecutor for AlwaysSucceeds {
        async fn execute(&self, _input: NodeInput) -> Result<NodeResult, NodeExecutorError> {
            Ok(NodeResult::ok(FxHashMap::default()))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl NodeExecutor for AlwaysFails {
        async fn execute(&self, _input: NodeInput) -> Result<NodeResult, NodeExecutorError> {
            Ok(NodeResult::failure("boom"))
        }
    }

    fn linear_workflow() -> Workflow {
        Workflow::new(WorkflowId::generate())
            .with_node(NodeDescriptor::new(NodeId::from("start"), NodeType::Start))
            .with_node(NodeDescriptor::new(NodeId::from("A"), NodeType::Transform))
            .with_edge(Edge::new(EdgeId::from("e1"), NodeId::from("start"), NodeId::from("A"), EdgeKind::Normal))
    }

    fn engine(registry: NodeExecutorRegistry, config: EngineConfig) -> WorkflowExecutionEngine {
        WorkflowExecutionEngine::new(
            Arc::new(StateManager::new()),
            Arc::new(HistoryManager::default()),
            Arc::new(CheckpointManager::new(InMemoryCheckpointStore::default(), 10, 1000)),
            Arc::new(ConditionalRouter::new()),
            Arc::new(ExecutionController::new()),
            Arc::new(registry),
            config,
        )
    }

    #[tokio::test]
    async fn linear_workflow_completes() {
        let mut registry = NodeExecutorRegistry::new();
        registry.register("start", Box::new(AlwaysSucceeds));
        registry.register("transform", Box::new(AlwaysSucceeds));

        let engine = engine(registry, EngineConfig::default());
        let workflow = linear_workflow();
        let result = engine.execute(&workflow, ThreadId::generate(), FxHashMap::default()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.success);
        assert_eq!(result.executed_nodes, 2);
    }

    #[tokio::test]
    async fn failing_node_without_error_recovery_terminates_as_error() {
        let mut registry = NodeExecutorRegistry::new();
        registry.register("start", Box::new(AlwaysSucceeds));
        registry.register("transform", Box::new(AlwaysFails));

        let engine = engine(registry, EngineConfig::default());
        let workflow = linear_workflow();
        let result = engine.execute(&workflow, ThreadId::generate(), FxHashMap::default()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(!result.success);
        assert!(result.error_details.is_some());
    }

    #[tokio::test]
    async fn error_recovery_routes_through_error_edge() {
        let mut registry = NodeExecutorRegistry::new();
        registry.register("start", Box::new(AlwaysSucceeds));
        registry.register("transform", Box::new(AlwaysFails));
        registry.register("recover", Box::new(AlwaysSucceeds));

        let workflow = linear_workflow()
            .with_node(NodeDescriptor::new(NodeId::from("recover"), NodeType::Transform).with_property("role", Value::from("recover")))
            .with_edge(Edge::new(EdgeId::from("err"), NodeId::from("A"), NodeId::from("recover"), EdgeKind::Error));

        let config = EngineConfig::builder().enable_error_recovery(true).build();
        let engine = engine(registry, config);
        let result = engine.execute(&workflow, ThreadId::generate(), FxHashMap::default()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.executed_nodes, 3);
    }

    #[tokio::test]
    async fn step_limit_terminates_a_cyclic_workflow() {
        let mut registry = NodeExecutorRegistry::new();
        registry.register("start", Box::new(AlwaysSucceeds));
        registry.register("transform", Box::new(AlwaysSucceeds));

        let workflow = Workflow::new(WorkflowId::generate())
            .with_node(NodeDescriptor::new(NodeId::from("start"), NodeType::Start))
            .with_node(NodeDescriptor::new(NodeId::from("A"), NodeType::Transform))
            .with_edge(Edge::new(EdgeId::from("e1"), NodeId::from("start"), NodeId::from("A"), EdgeKind::Normal))
            .with_edge(Edge::new(EdgeId::from("e2"), NodeId::from("A"), NodeId::from("start"), EdgeKind::Normal));

        let config = EngineConfig::builder().max_steps(5).build();
        let engine = engine(registry, config);
        let result = engine.execute(&workflow, ThreadId::generate(), FxHashMap::default()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::StepLimit);
        assert_eq!(result.executed_nodes, 5);
    }

    #[tokio::test]
    async fn resume_from_checkpoint_re_enters_at_the_checkpointed_node() {
        // A checkpoint is always taken *before* its `current_node` runs
        // (§4.8.c), so one manually planted here ahead of "B" models a run
        // that stopped cleanly right after the checkpoint for "B" was
        // written but before "B" itself executed.
        let workflow = Workflow::new(WorkflowId::generate())
            .with_node(NodeDescriptor::new(NodeId::from("start"), NodeType::Start))
            .with_node(NodeDescriptor::new(NodeId::from("A"), NodeType::Transform))
            .with_node(NodeDescriptor::new(NodeId::from("B"), NodeType::Transform))
            .with_node(NodeDescriptor::new(NodeId::from("end"), NodeType::End))
            .with_edge(Edge::new(EdgeId::from("e1"), NodeId::from("start"), NodeId::from("A"), EdgeKind::Normal))
            .with_edge(Edge::new(EdgeId::from("e2"), NodeId::from("A"), NodeId::from("B"), EdgeKind::Normal))
            .with_edge(Edge::new(EdgeId::from("e3"), NodeId::from("B"), NodeId::from("end"), EdgeKind::Normal));

        let mut registry = NodeExecutorRegistry::new();
        registry.register("start", Box::new(AlwaysSucceeds));
        registry.register("transform", Box::new(AlwaysSucceeds));
        registry.register("end", Box::new(AlwaysSucceeds));

        let checkpoint_manager = CheckpointManager::new(InMemoryCheckpointStore::default(), 10, 1000);
        let thread_id = ThreadId::generate();
        let checkpoint_id = checkpoint_manager
            .create(
                thread_id.clone(),
                workflow.id.clone(),
                Some(NodeId::from("B")),
                FxHashMap::default(),
                FxHashMap::default(),
                2,
            )
            .await
            .unwrap();

        let engine = WorkflowExecutionEngine::new(
            Arc::new(StateManager::new()),
            Arc::new(HistoryManager::default()),
            Arc::new(checkpoint_manager),
            Arc::new(ConditionalRouter::new()),
            Arc::new(ExecutionController::new()),
            Arc::new(registry),
            EngineConfig::default(),
        );

        let result = engine.resume_from_checkpoint(&workflow, thread_id, &checkpoint_id).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        // Resumes at "B" (2 already-checkpointed steps), then runs B and end.
        assert_eq!(result.executed_nodes, 4);
    }

    #[tokio::test]
    async fn empty_workflow_is_rejected() {
        let engine = engine(NodeExecutorRegistry::new(), EngineConfig::default());
        let workflow = Workflow::new(WorkflowId::generate());
        let err = engine.execute(&workflow, ThreadId::generate(), FxHashMap::default()).await.unwrap_err();
        assert!(matches!(err, crate::error::EngineError::WorkflowEmpty { .. }));
    }

    /// Blocks inside `execute` until released, announcing it has started so a
    /// test can cancel the thread while the node is mid-flight (seed scenario
    /// #4: cancel between node executions).
    struct PausableExecutor {
        started: Arc<tokio::sync::Notify>,
        proceed: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl NodeExecutor for PausableExecutor {
        async fn execute(&self, _input: NodeInput) -> Result<NodeResult, NodeExecutorError> {
            self.started.notify_one();
            self.proceed.notified().await;
            Ok(NodeResult::ok(FxHashMap::default()))
        }
    }

    #[tokio::test]
    async fn cancel_during_execution_stops_before_the_next_node() {
        let workflow = Workflow::new(WorkflowId::generate())
            .with_node(NodeDescriptor::new(NodeId::from("start"), NodeType::Start))
            .with_node(NodeDescriptor::new(NodeId::from("A"), NodeType::Transform))
            .with_node(NodeDescriptor::new(NodeId::from("B"), NodeType::Transform))
            .with_edge(Edge::new(EdgeId::from("e1"), NodeId::from("start"), NodeId::from("A"), EdgeKind::Normal))
            .with_edge(Edge::new(EdgeId::from("e2"), NodeId::from("A"), NodeId::from("B"), EdgeKind::Normal));

        let started = Arc::new(tokio::sync::Notify::new());
        let proceed = Arc::new(tokio::sync::Notify::new());

        let mut registry = NodeExecutorRegistry::new();
        registry.register("start", Box::new(AlwaysSucceeds));
        registry.register(
            "transform",
            Box::new(PausableExecutor {
                started: started.clone(),
                proceed: proceed.clone(),
            }),
        );

        let controller = Arc::new(ExecutionController::new());
        let engine = WorkflowExecutionEngine::new(
            Arc::new(StateManager::new()),
            Arc::new(HistoryManager::default()),
            Arc::new(CheckpointManager::new(InMemoryCheckpointStore::default(), 10, 1000)),
            Arc::new(ConditionalRouter::new()),
            controller.clone(),
            Arc::new(registry),
            EngineConfig::default(),
        );

        let thread_id = ThreadId::generate();
        let run = tokio::spawn({
            let engine = Arc::new(engine);
            let workflow = workflow.clone();
            let thread_id = thread_id.clone();
            async move { engine.execute(&workflow, thread_id, FxHashMap::default()).await }
        });

        started.notified().await;
        assert!(controller.cancel(&thread_id));
        proceed.notify_one();

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.status, ExecutionStatus::Cancelled);
        // "start" and "A" ran; the cancellation is observed before "B" starts.
        assert_eq!(result.executed_nodes, 2);
    }
}

//! # threadengine: directed-graph workflow execution engine
//!
//! Threadengine executes directed-graph workflows on behalf of sessions: a
//! [`Session`](session::Session) owns one or more [`Thread`](thread::Thread)s,
//! each running an immutable [`Workflow`](workflow::Workflow) one node at a
//! time, with versioned state, bounded history, and LRU checkpoints.
//!
//! ## Core Concepts
//!
//! - **Session** — admits work, owns threads, shared resources, messaging
//! - **Thread** — one execution of a workflow, its own state and history
//! - **Workflow** — an immutable node/edge graph, shared read-only
//! - **State Manager** — versioned per-thread `data`/`metadata` channels
//! - **Checkpoint Manager** — LRU-bounded, backend-pluggable durability
//! - **Conditional Router** — bucketed edge routing via guard expressions
//! - **Workflow Execution Engine** — drives the per-node loop to completion
//!
//! ## Quick Start
//!
//! ### Defining a workflow and running it
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use rustc_hash::FxHashMap;
//! use threadengine::checkpoint::{CheckpointManager, InMemoryCheckpointStore};
//! use threadengine::config::EngineConfig;
//! use threadengine::engine::WorkflowExecutionEngine;
//! use threadengine::execution_controller::ExecutionController;
//! use threadengine::history::HistoryManager;
//! use threadengine::ids::{NodeId, ThreadId, WorkflowId};
//! use threadengine::node_executor::{NodeExecutor, NodeExecutorError, NodeExecutorRegistry, NodeInput, NodeResult};
//! use threadengine::router::ConditionalRouter;
//! use threadengine::state_manager::StateManager;
//! use threadengine::workflow::{Edge, EdgeKind, NodeDescriptor, NodeType, Workflow};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl NodeExecutor for Echo {
//!     async fn execute(&self, input: NodeInput) -> Result<NodeResult, NodeExecutorError> {
//!         Ok(NodeResult::ok(input.state_data))
//!     }
//! }
//!
//! # async fn example() {
//! let workflow = Workflow::new(WorkflowId::generate())
//!     .with_node(NodeDescriptor::new(NodeId::from("start"), NodeType::Start))
//!     .with_node(NodeDescriptor::new(NodeId::from("A"), NodeType::Transform))
//!     .with_edge(Edge::new(
//!         threadengine::ids::EdgeId::from("e1"),
//!         NodeId::from("start"),
//!         NodeId::from("A"),
//!         EdgeKind::Normal,
//!     ));
//!
//! let mut registry = NodeExecutorRegistry::new();
//! registry.register("start", Box::new(Echo));
//! registry.register("transform", Box::new(Echo));
//!
//! let engine = WorkflowExecutionEngine::new(
//!     Arc::new(StateManager::new()),
//!     Arc::new(HistoryManager::default()),
//!     Arc::new(CheckpointManager::new(InMemoryCheckpointStore::default(), 10, 1000)),
//!     Arc::new(ConditionalRouter::new()),
//!     Arc::new(ExecutionController::new()),
//!     Arc::new(registry),
//!     EngineConfig::default(),
//! );
//!
//! let result = engine
//!     .execute(&workflow, ThreadId::generate(), FxHashMap::default())
//!     .await
//!     .unwrap();
//! assert!(result.success);
//! # }
//! ```
//!
//! ### Sessions and threads
//!
//! ```
//! use threadengine::session::SessionConfig;
//! use threadengine::session_orchestrator::SessionOrchestrator;
//! use threadengine::thread_lifecycle::ThreadLifecycleService;
//! use threadengine::workflow::{NodeDescriptor, NodeType, Workflow};
//! use threadengine::ids::{NodeId, WorkflowId};
//!
//! let orchestrator = SessionOrchestrator::new();
//! let lifecycle = ThreadLifecycleService::new();
//! let session_id = orchestrator.create_session("alice", SessionConfig::default());
//!
//! let workflow = Workflow::new(WorkflowId::generate())
//!     .with_node(NodeDescriptor::new(NodeId::from("start"), NodeType::Start));
//!
//! let thread_id = orchestrator
//!     .create_thread(&session_id, &lifecycle, &workflow, 0, None)
//!     .unwrap();
//! assert!(orchestrator.get_session(&session_id).unwrap().thread_ids.contains(&thread_id));
//! ```
//!
//! ## Module Guide
//!
//! - [`ids`] — opaque id newtypes shared at every component boundary
//! - [`workflow`] — the immutable node/edge graph
//! - [`channels`] / [`state`] / [`state_manager`] — versioned per-thread state
//! - [`history`] — bounded per-thread execution ring buffer
//! - [`checkpoint`] — LRU-bounded, backend-pluggable checkpointing
//! - [`expression`] / [`router`] — guarded edge routing
//! - [`node_executor`] — the extension point for node behavior
//! - [`execution_controller`] — pause/resume/cancel signalling
//! - [`engine`] — the workflow execution loop
//! - [`thread`] / [`thread_lifecycle`] — the thread entity and its state machine
//! - [`session`] / [`session_orchestrator`] — session admission and ownership
//! - [`fork`] — seeding a child thread from a parent's snapshot
//! - [`repository`] — storage boundary traits plus in-memory fakes
//! - [`config`] — `EngineConfig` aggregation and environment defaults
//! - [`error`] — the top-level `EngineError` aggregator
//! - [`event_bus`] / [`telemetry`] / [`diagnostics`] — observability plumbing
//! - [`utils`] — generic JSON helpers

pub mod channels;
pub mod checkpoint;
#[cfg(feature = "sqlite")]
pub mod checkpoint_sqlite;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod execution_controller;
pub mod expression;
pub mod fork;
pub mod history;
pub mod ids;
pub mod node_executor;
pub mod repository;
pub mod router;
pub mod session;
pub mod session_orchestrator;
pub mod state;
pub mod state_manager;
pub mod telemetry;
pub mod thread;
pub mod thread_lifecycle;
pub mod utils;
pub mod workflow;

//! §4.11 / §3 Thread Fork Service — builds a child thread's initial state
//! from a snapshot of a parent thread at some node.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::checkpoint::CheckpointManager;
use crate::history::{HistoryManager, NodeExecutionRecord};
use crate::ids::{NodeId, ThreadId};
use crate::state_manager::StateManager;
use crate::workflow::Workflow;

/// Node property key (§9 "dynamic node properties" — a free-form bag the
/// engine passes through untouched) declaring the subset of `state.data`
/// keys a [`ForkScope::Partial`] fork should carry into the child thread.
/// Value is a JSON array of strings, e.g. `["userId", "cart"]`.
pub const FORK_INPUT_KEYS_PROPERTY: &str = "forkInputKeys";

#[derive(Debug, Error, miette::Diagnostic)]
pub enum ForkError {
    #[error("no state for parent thread {thread_id}, cannot fork")]
    #[diagnostic(code(threadengine::fork::parent_state_missing))]
    ParentStateMissing { thread_id: ThreadId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForkScope {
    Full,
    Partial,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForkOptions {
    pub scope: ForkScope,
    pub include_history: bool,
    pub include_metadata: bool,
    pub reset_state: bool,
}

impl Default for ForkOptions {
    fn default() -> Self {
        Self {
            scope: ForkScope::Full,
            include_history: false,
            include_metadata: true,
            reset_state: false,
        }
    }
}

/// A one-shot snapshot used exactly once, to seed a freshly allocated child
/// thread (§3: "Used once to seed a child thread").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForkContext {
    pub parent_thread_id: ThreadId,
    pub fork_point_node: Option<NodeId>,
    pub data_snapshot: FxHashMap<String, Value>,
    pub metadata_snapshot: FxHashMap<String, String>,
    pub history_snapshot: Vec<NodeExecutionRecord>,
    pub options: ForkOptions,
}

pub struct ThreadForkService;

impl ThreadForkService {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Builds a [`ForkContext`] from the parent's current State/History.
    /// `Full` scope carries every `state.data` key into the child. `Partial`
    /// scope keeps only the keys `fork_point_node` declares via its
    /// [`FORK_INPUT_KEYS_PROPERTY`] property (a JSON array of key names); a
    /// fork point with no such property, or no `fork_point_node` at all,
    /// yields an empty data subset rather than silently falling back to a
    /// full copy.
    pub fn snapshot(
        &self,
        state_manager: &StateManager,
        history_manager: &HistoryManager,
        workflow: &Workflow,
        parent_thread_id: &ThreadId,
        fork_point_node: Option<NodeId>,
        options: ForkOptions,
    ) -> Result<ForkContext, ForkError> {
        let snapshot = state_manager
            .get_state(parent_thread_id)
            .map_err(|_| ForkError::ParentStateMissing {
                thread_id: parent_thread_id.clone(),
            })?;

        let data_snapshot = match options.scope {
            ForkScope::Full => snapshot.data,
            ForkScope::Partial => {
                let allowed_keys = fork_point_node
                    .as_ref()
                    .and_then(|node_id| workflow.node(node_id))
                    .and_then(|node| node.properties.get(FORK_INPUT_KEYS_PROPERTY))
                    .and_then(Value::as_array)
                    .map(|keys| keys.iter().filter_map(Value::as_str).collect::<std::collections::HashSet<_>>())
                    .unwrap_or_default();

                snapshot
                    .data
                    .into_iter()
                    .filter(|(key, _)| allowed_keys.contains(key.as_str()))
                    .collect()
            }
        };
        let metadata_snapshot = if options.include_metadata {
            snapshot.metadata
        } else {
            FxHashMap::default()
        };
        let history_snapshot = if options.include_history {
            history_manager.list_last_n(parent_thread_id, usize::MAX)
        } else {
            Vec::new()
        };

        Ok(ForkContext {
            parent_thread_id: parent_thread_id.clone(),
            fork_point_node,
            data_snapshot,
            metadata_snapshot,
            history_snapshot,
            options,
        })
    }

    /// Seeds `child_thread_id`'s state from a previously captured context.
    pub fn seed_child(&self, state_manager: &StateManager, child_thread_id: ThreadId, workflow_id: crate::ids::WorkflowId, context: &ForkContext) {
        let initial_data = if context.options.reset_state {
            FxHashMap::default()
        } else {
            context.data_snapshot.clone()
        };
        state_manager.initialize(child_thread_id, workflow_id, initial_data);
    }
}

impl Default for ThreadForkService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{NodeId, WorkflowId};
    use crate::workflow::{NodeDescriptor, NodeType};

    fn empty_workflow(workflow_id: WorkflowId) -> Workflow {
        Workflow::new(workflow_id)
    }

    #[test]
    fn snapshot_fails_when_parent_has_no_state() {
        let state_manager = StateManager::new();
        let history_manager = HistoryManager::default();
        let workflow = empty_workflow(WorkflowId::generate());
        let service = ThreadForkService::new();
        let err = service
            .snapshot(&state_manager, &history_manager, &workflow, &ThreadId::generate(), None, ForkOptions::default())
            .unwrap_err();
        assert!(matches!(err, ForkError::ParentStateMissing { .. }));
    }

    #[test]
    fn full_scope_carries_data_into_child() {
        let state_manager = StateManager::new();
        let history_manager = HistoryManager::default();
        let parent = ThreadId::generate();
        let workflow_id = WorkflowId::generate();
        let workflow = empty_workflow(workflow_id.clone());
        let mut data = FxHashMap::default();
        data.insert("x".to_string(), Value::from(42));
        state_manager.initialize(parent.clone(), workflow_id.clone(), data);

        let service = ThreadForkService::new();
        let context = service
            .snapshot(&state_manager, &history_manager, &workflow, &parent, None, ForkOptions::default())
            .unwrap();
        assert_eq!(context.data_snapshot.get("x"), Some(&Value::from(42)));

        let child = ThreadId::generate();
        service.seed_child(&state_manager, child.clone(), workflow_id, &context);
        let child_state = state_manager.get_state(&child).unwrap();
        assert_eq!(child_state.data.get("x"), Some(&Value::from(42)));
    }

    #[test]
    fn partial_scope_keeps_only_the_fork_points_declared_keys() {
        let state_manager = StateManager::new();
        let history_manager = HistoryManager::default();
        let parent = ThreadId::generate();
        let workflow_id = WorkflowId::generate();

        let fork_point = NodeId::from("checkout");
        let workflow = Workflow::new(workflow_id.clone()).with_node(
            NodeDescriptor::new(fork_point.clone(), NodeType::Transform)
                .with_property(FORK_INPUT_KEYS_PROPERTY, Value::from(vec!["cart"])),
        );

        let mut data = FxHashMap::default();
        data.insert("cart".to_string(), Value::from(vec!["widget"]));
        data.insert("sessionSecret".to_string(), Value::from("do-not-copy"));
        state_manager.initialize(parent.clone(), workflow_id.clone(), data);

        let service = ThreadForkService::new();
        let options = ForkOptions {
            scope: ForkScope::Partial,
            ..ForkOptions::default()
        };
        let context = service
            .snapshot(&state_manager, &history_manager, &workflow, &parent, Some(fork_point), options)
            .unwrap();

        assert_eq!(context.data_snapshot.len(), 1);
        assert_eq!(context.data_snapshot.get("cart"), Some(&Value::from(vec!["widget"])));
        assert!(!context.data_snapshot.contains_key("sessionSecret"));
    }

    #[test]
    fn partial_scope_without_a_declared_key_set_yields_no_data() {
        let state_manager = StateManager::new();
        let history_manager = HistoryManager::default();
        let parent = ThreadId::generate();
        let workflow_id = WorkflowId::generate();
        let fork_point = NodeId::from("checkout");
        let workflow = Workflow::new(workflow_id.clone())
            .with_node(NodeDescriptor::new(fork_point.clone(), NodeType::Transform));

        let mut data = FxHashMap::default();
        data.insert("x".to_string(), Value::from(1));
        state_manager.initialize(parent.clone(), workflow_id.clone(), data);

        let service = ThreadForkService::new();
        let options = ForkOptions {
            scope: ForkScope::Partial,
            ..ForkOptions::default()
        };
        let context = service
            .snapshot(&state_manager, &history_manager, &workflow, &parent, Some(fork_point), options)
            .unwrap();
        assert!(context.data_snapshot.is_empty());
    }

    #[test]
    fn reset_state_option_seeds_child_empty() {
        let state_manager = StateManager::new();
        let history_manager = HistoryManager::default();
        let parent = ThreadId::generate();
        let workflow_id = WorkflowId::generate();
        let workflow = empty_workflow(workflow_id.clone());
        let mut data = FxHashMap::default();
        data.insert("x".to_string(), Value::from(1));
        state_manager.initialize(parent.clone(), workflow_id.clone(), data);

        let service = ThreadForkService::new();
        let options = ForkOptions {
            reset_state: true,
            ..ForkOptions::default()
        };
        let context = service
            .snapshot(&state_manager, &history_manager, &workflow, &parent, None, options)
            .unwrap();

        let child = ThreadId::generate();
        service.seed_child(&state_manager, child.clone(), workflow_id, &context);
        let child_state = state_manager.get_state(&child).unwrap();
        assert!(child_state.data.is_empty());
    }
}

//! §4.1 State Manager — a process-local `threadId -> WorkflowState` map.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::ids::{NodeId, ThreadId, WorkflowId};
use crate::state::{WorkflowState, WorkflowStateSnapshot};

#[derive(Debug, Error, miette::Diagnostic)]
pub enum StateManagerError {
    #[error("no workflow state for thread {thread_id}")]
    #[diagnostic(
        code(threadengine::state::missing),
        help("call StateManager::initialize before operating on this thread")
    )]
    StateMissing { thread_id: ThreadId },
}

/// Owns every in-flight thread's [`WorkflowState`].
///
/// Sharded by `ThreadId` via a single `RwLock<FxHashMap<..>>`: read-heavy
/// access (`get_state`) takes a shared lock, mutating calls take an
/// exclusive one scoped to the lookup only — the clone that follows runs
/// outside the lock.
#[derive(Default)]
pub struct StateManager {
    states: RwLock<FxHashMap<ThreadId, WorkflowState>>,
}

impl StateManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh state for `thread_id`, replacing any prior state.
    #[tracing::instrument(skip(self, initial_data))]
    pub fn initialize(
        &self,
        thread_id: ThreadId,
        workflow_id: WorkflowId,
        initial_data: FxHashMap<String, Value>,
    ) {
        let state = WorkflowState::new(workflow_id, initial_data);
        self.states.write().insert(thread_id, state);
    }

    #[tracing::instrument(skip(self), err)]
    pub fn get_state(&self, thread_id: &ThreadId) -> Result<WorkflowStateSnapshot, StateManagerError> {
        self.states
            .read()
            .get(thread_id)
            .map(WorkflowState::snapshot)
            .ok_or_else(|| StateManagerError::StateMissing {
                thread_id: thread_id.clone(),
            })
    }

    #[tracing::instrument(skip(self, updates), err)]
    pub fn update_state(
        &self,
        thread_id: &ThreadId,
        updates: FxHashMap<String, Value>,
    ) -> Result<(), StateManagerError> {
        if updates.is_empty() {
            // No-op merges must not bump updated_at or the version counter.
            return self.ensure_present(thread_id);
        }
        let mut states = self.states.write();
        let state = states
            .get_mut(thread_id)
            .ok_or_else(|| StateManagerError::StateMissing {
                thread_id: thread_id.clone(),
            })?;
        state.merge_data(updates);
        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    pub fn set_current_node(
        &self,
        thread_id: &ThreadId,
        node: Option<NodeId>,
    ) -> Result<(), StateManagerError> {
        let mut states = self.states.write();
        let state = states
            .get_mut(thread_id)
            .ok_or_else(|| StateManagerError::StateMissing {
                thread_id: thread_id.clone(),
            })?;
        state.set_current_node(node);
        Ok(())
    }

    pub fn clear_state(&self, thread_id: &ThreadId) {
        self.states.write().remove(thread_id);
    }

    fn ensure_present(&self, thread_id: &ThreadId) -> Result<(), StateManagerError> {
        if self.states.read().contains_key(thread_id) {
            Ok(())
        } else {
            Err(StateManagerError::StateMissing {
                thread_id: thread_id.clone(),
            })
        }
    }
}

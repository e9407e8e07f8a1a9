//! Per-thread workflow execution state (§3 `WorkflowState`).
//!
//! Owned exclusively by a [`crate::thread::Thread`] and mutated only through
//! the [`crate::state_manager::StateManager`]; nodes and the router only
//! ever see a [`WorkflowStateSnapshot`].

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::{Channel, DataChannel, MetadataChannel};
use crate::ids::{NodeId, WorkflowId};

/// Versioned execution state for a single thread.
#[derive(Clone, Debug)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub current_node: Option<NodeId>,
    pub data: DataChannel,
    pub metadata: MetadataChannel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// A fresh state for `workflow_id`, seeded with `initial_data`.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, initial_data: FxHashMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            current_node: None,
            data: DataChannel::new(initial_data, 1),
            metadata: MetadataChannel::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Shallow-merges `updates` into `data`; keys in `updates` overwrite.
    /// Bumps `updated_at`. Does not touch `current_node`.
    pub fn merge_data(&mut self, updates: FxHashMap<String, Value>) {
        let target = self.data.get_mut();
        for (key, value) in updates {
            target.insert(key, value);
        }
        self.updated_at = Utc::now();
    }

    pub fn set_current_node(&mut self, node: Option<NodeId>) {
        self.current_node = node;
        self.updated_at = Utc::now();
    }

    /// An immutable, detached view for nodes/router to read.
    #[must_use]
    pub fn snapshot(&self) -> WorkflowStateSnapshot {
        WorkflowStateSnapshot {
            workflow_id: self.workflow_id.clone(),
            current_node: self.current_node.clone(),
            data: self.data.snapshot(),
            data_version: self.data.version(),
            metadata: self.metadata.snapshot(),
            metadata_version: self.metadata.version(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Point-in-time, detached view of a [`WorkflowState`]. Cloning the data out
/// of the channels up front is what guarantees a snapshot never observes a
/// later write (§3 invariant).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowStateSnapshot {
    pub workflow_id: WorkflowId,
    pub current_node: Option<NodeId>,
    pub data: FxHashMap<String, Value>,
    pub data_version: u32,
    pub metadata: FxHashMap<String, String>,
    pub metadata_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_data_overwrites_only_given_keys() {
        let mut initial = FxHashMap::default();
        initial.insert("x".to_string(), Value::from(1));
        initial.insert("y".to_string(), Value::from(2));
        let mut state = WorkflowState::new(WorkflowId::generate(), initial);

        let mut updates = FxHashMap::default();
        updates.insert("x".to_string(), Value::from(99));
        state.merge_data(updates);

        let snap = state.snapshot();
        assert_eq!(snap.data.get("x"), Some(&Value::from(99)));
        assert_eq!(snap.data.get("y"), Some(&Value::from(2)));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let state = WorkflowState::new(WorkflowId::generate(), FxHashMap::default());
        let snap = state.snapshot();
        let mut state = state;
        let mut updates = FxHashMap::default();
        updates.insert("z".to_string(), Value::from(true));
        state.merge_data(updates);
        assert!(snap.data.get("z").is_none());
    }
}

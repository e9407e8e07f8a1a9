//! §4.3 Checkpoint Manager.
//!
//! The manager's eviction/ordering logic (per-thread LRU cap + global LRU
//! cap) is backend-agnostic; it sits on top of a narrow [`CheckpointStore`]
//! trait so an in-process volatile store and an optional SQLite-backed one
//! (`src/checkpoint_sqlite.rs`, `sqlite` feature) share the same behavior.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::{CheckpointId, NodeId, ThreadId, WorkflowId};

pub const DEFAULT_PER_THREAD_CAP: usize = 10;
pub const DEFAULT_GLOBAL_CAP: usize = 1000;

/// An immutable, deep-copied snapshot of a thread's data at one step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub thread_id: ThreadId,
    pub workflow_id: WorkflowId,
    pub current_node: Option<NodeId>,
    pub data: FxHashMap<String, Value>,
    pub step_index: u64,
    pub created_at: DateTime<Utc>,
    pub metadata: FxHashMap<String, Value>,
}

#[derive(Debug, Error, miette::Diagnostic)]
pub enum CheckpointError {
    #[error("no checkpoint with id {checkpoint_id}")]
    #[diagnostic(code(threadengine::checkpoint::not_found))]
    NotFound { checkpoint_id: CheckpointId },

    #[error("checkpoint backend failed: {0}")]
    #[diagnostic(code(threadengine::checkpoint::backend))]
    Backend(String),
}

/// Storage boundary under the Checkpoint Manager. Both the in-memory and
/// SQLite-backed stores implement only raw put/get/list/evict; LRU-by-cap
/// eviction policy lives in [`CheckpointManager`], not here.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;
    async fn get(&self, checkpoint_id: &CheckpointId) -> Result<Option<Checkpoint>, CheckpointError>;
    async fn list_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, CheckpointError>;
    async fn evict(&self, checkpoint_id: &CheckpointId) -> Result<(), CheckpointError>;
    async fn evict_all(&self, thread_id: &ThreadId) -> Result<(), CheckpointError>;
}

/// Default volatile backend: everything lives in a process-local map, lost
/// on restart.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<FxHashMap<CheckpointId, Checkpoint>>,
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        self.checkpoints.lock().insert(checkpoint.id.clone(), checkpoint);
        Ok(())
    }

    async fn get(&self, checkpoint_id: &CheckpointId) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.lock().get(checkpoint_id).cloned())
    }

    async fn list_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, CheckpointError> {
        Ok(self
            .checkpoints
            .lock()
            .values()
            .filter(|c| &c.thread_id == thread_id)
            .cloned()
            .collect())
    }

    async fn evict(&self, checkpoint_id: &CheckpointId) -> Result<(), CheckpointError> {
        self.checkpoints.lock().remove(checkpoint_id);
        Ok(())
    }

    async fn evict_all(&self, thread_id: &ThreadId) -> Result<(), CheckpointError> {
        self.checkpoints.lock().retain(|_, c| &c.thread_id != thread_id);
        Ok(())
    }
}

/// §4.3: tracks creation order per thread and globally so cap-based LRU
/// eviction is correct regardless of which [`CheckpointStore`] backs it.
pub struct CheckpointManager<S: CheckpointStore = InMemoryCheckpointStore> {
    store: S,
    per_thread_cap: usize,
    global_cap: usize,
    order: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    per_thread: FxHashMap<ThreadId, VecDeque<CheckpointId>>,
    global: VecDeque<(ThreadId, CheckpointId)>,
}

impl CheckpointManager<InMemoryCheckpointStore> {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(InMemoryCheckpointStore::default(), DEFAULT_PER_THREAD_CAP, DEFAULT_GLOBAL_CAP)
    }
}

impl<S: CheckpointStore> CheckpointManager<S> {
    #[must_use]
    pub fn new(store: S, per_thread_cap: usize, global_cap: usize) -> Self {
        Self {
            store,
            per_thread_cap: per_thread_cap.max(1),
            global_cap: global_cap.max(1),
            order: Mutex::new(Inner::default()),
        }
    }

    #[tracing::instrument(skip(self, data, metadata), err)]
    pub async fn create(
        &self,
        thread_id: ThreadId,
        workflow_id: WorkflowId,
        current_node: Option<NodeId>,
        data: FxHashMap<String, Value>,
        metadata: FxHashMap<String, Value>,
        step_index: u64,
    ) -> Result<CheckpointId, CheckpointError> {
        let checkpoint = Checkpoint {
            id: CheckpointId::generate(),
            thread_id: thread_id.clone(),
            workflow_id,
            current_node,
            data,
            step_index,
            created_at: Utc::now(),
            metadata,
        };
        let id = checkpoint.id.clone();

        let evicted = {
            let mut order = self.order.lock();
            let per_thread = order.per_thread.entry(thread_id.clone()).or_default();
            per_thread.push_back(id.clone());
            order.global.push_back((thread_id.clone(), id.clone()));

            let mut evicted = Vec::new();
            while order.per_thread.get(&thread_id).is_some_and(|q| q.len() > self.per_thread_cap) {
                if let Some(evicted_id) = order.per_thread.get_mut(&thread_id).and_then(VecDeque::pop_front) {
                    order.global.retain(|(_, cid)| cid != &evicted_id);
                    evicted.push(evicted_id);
                }
            }
            while order.global.len() > self.global_cap {
                if let Some((tid, evicted_id)) = order.global.pop_front() {
                    if let Some(q) = order.per_thread.get_mut(&tid) {
                        q.retain(|cid| cid != &evicted_id);
                    }
                    evicted.push(evicted_id);
                }
            }
            evicted
        };

        self.store.put(checkpoint).await?;
        for evicted_id in evicted {
            self.store.evict(&evicted_id).await?;
        }
        Ok(id)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn restore(&self, checkpoint_id: &CheckpointId) -> Result<Checkpoint, CheckpointError> {
        self.store
            .get(checkpoint_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound {
                checkpoint_id: checkpoint_id.clone(),
            })
    }

    pub async fn latest(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError> {
        let last_id = self
            .order
            .lock()
            .per_thread
            .get(thread_id)
            .and_then(|q| q.back())
            .cloned();
        match last_id {
            Some(id) => self.store.get(&id).await,
            None => Ok(None),
        }
    }

    pub async fn list(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, CheckpointError> {
        let mut checkpoints = self.store.list_by_thread(thread_id).await?;
        checkpoints.sort_by_key(|c| c.created_at);
        Ok(checkpoints)
    }

    pub async fn evict_all(&self, thread_id: &ThreadId) -> Result<(), CheckpointError> {
        self.store.evict_all(thread_id).await?;
        let mut order = self.order.lock();
        order.per_thread.remove(thread_id);
        order.global.retain(|(tid, _)| tid != thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_restore_roundtrips() {
        let manager = CheckpointManager::in_memory();
        let thread_id = ThreadId::generate();
        let id = manager
            .create(
                thread_id.clone(),
                WorkflowId::generate(),
                Some(NodeId::from("A")),
                FxHashMap::default(),
                FxHashMap::default(),
                1,
            )
            .await
            .unwrap();
        let restored = manager.restore(&id).await.unwrap();
        assert_eq!(restored.thread_id, thread_id);
    }

    #[tokio::test]
    async fn per_thread_cap_evicts_oldest() {
        let manager = CheckpointManager::new(InMemoryCheckpointStore::default(), 2, 1000);
        let thread_id = ThreadId::generate();
        let mut ids = Vec::new();
        for step in 0..3u64 {
            ids.push(
                manager
                    .create(
                        thread_id.clone(),
                        WorkflowId::generate(),
                        None,
                        FxHashMap::default(),
                        FxHashMap::default(),
                        step,
                    )
                    .await
                    .unwrap(),
            );
        }
        assert!(manager.restore(&ids[0]).await.is_err());
        assert!(manager.restore(&ids[1]).await.is_ok());
        assert!(manager.restore(&ids[2]).await.is_ok());

        let listed = manager.list(&thread_id).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn restore_unknown_checkpoint_fails() {
        let manager = CheckpointManager::in_memory();
        let err = manager.restore(&CheckpointId::generate()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound { .. }));
    }

    #[tokio::test]
    async fn checkpoint_is_immutable_after_later_mutation() {
        let manager = CheckpointManager::in_memory();
        let thread_id = ThreadId::generate();
        let mut data = FxHashMap::default();
        data.insert("x".to_string(), Value::from(1));
        let id = manager
            .create(thread_id.clone(), WorkflowId::generate(), None, data, FxHashMap::default(), 0)
            .await
            .unwrap();

        let mut later = FxHashMap::default();
        later.insert("x".to_string(), Value::from(2));
        manager
            .create(thread_id, WorkflowId::generate(), None, later, FxHashMap::default(), 1)
            .await
            .unwrap();

        let restored = manager.restore(&id).await.unwrap();
        assert_eq!(restored.data.get("x"), Some(&Value::from(1)));
    }
}

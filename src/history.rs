//! §4.2 History Manager — an append-only, bounded per-thread execution log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{NodeId, ThreadId};

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeExecStatus {
    Success,
    Failure,
    Skipped,
}

/// One recorded `execute` call, kept even for retried/failed attempts (§4.8.e).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub thread_id: ThreadId,
    pub node_id: NodeId,
    pub timestamp: DateTime<Utc>,
    pub input_snapshot: FxHashMap<String, Value>,
    pub output: FxHashMap<String, Value>,
    pub status: NodeExecStatus,
    pub metadata: FxHashMap<String, Value>,
    pub duration_ms: u64,
}

/// Per-thread ring buffer of [`NodeExecutionRecord`]s. Oldest entries are
/// evicted first once a thread's buffer reaches `capacity`.
pub struct HistoryManager {
    capacity: usize,
    threads: RwLock<FxHashMap<ThreadId, VecDeque<NodeExecutionRecord>>>,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryManager {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            threads: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn record(&self, entry: NodeExecutionRecord) {
        let mut threads = self.threads.write();
        let ring = threads.entry(entry.thread_id.clone()).or_default();
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    #[must_use]
    pub fn query_by_node(&self, thread_id: &ThreadId, node_id: &NodeId) -> Vec<NodeExecutionRecord> {
        self.threads
            .read()
            .get(thread_id)
            .map(|ring| ring.iter().filter(|r| &r.node_id == node_id).cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn list_last_n(&self, thread_id: &ThreadId, n: usize) -> Vec<NodeExecutionRecord> {
        self.threads
            .read()
            .get(thread_id)
            .map(|ring| ring.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, thread_id: &ThreadId) -> usize {
        self.threads.read().get(thread_id).map_or(0, VecDeque::len)
    }

    pub fn clear(&self, thread_id: &ThreadId) {
        self.threads.write().remove(thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(thread_id: &ThreadId, node_id: &str, status: NodeExecStatus) -> NodeExecutionRecord {
        NodeExecutionRecord {
            thread_id: thread_id.clone(),
            node_id: NodeId::from(node_id),
            timestamp: Utc::now(),
            input_snapshot: FxHashMap::default(),
            output: FxHashMap::default(),
            status,
            metadata: FxHashMap::default(),
            duration_ms: 0,
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let history = HistoryManager::new(2);
        let thread_id = ThreadId::generate();
        history.record(record(&thread_id, "A", NodeExecStatus::Success));
        history.record(record(&thread_id, "B", NodeExecStatus::Success));
        history.record(record(&thread_id, "C", NodeExecStatus::Success));

        let last = history.list_last_n(&thread_id, 10);
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].node_id, NodeId::from("B"));
        assert_eq!(last[1].node_id, NodeId::from("C"));
    }

    #[test]
    fn query_by_node_filters() {
        let history = HistoryManager::default();
        let thread_id = ThreadId::generate();
        history.record(record(&thread_id, "A", NodeExecStatus::Failure));
        history.record(record(&thread_id, "A", NodeExecStatus::Success));
        history.record(record(&thread_id, "B", NodeExecStatus::Success));

        let a_entries = history.query_by_node(&thread_id, &NodeId::from("A"));
        assert_eq!(a_entries.len(), 2);
    }
}

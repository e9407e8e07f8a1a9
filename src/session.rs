//! §3 `Session` entity — exclusively owns a set of [`crate::thread::Thread`]
//! ids and the shared resources/messaging scoped to them.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{SessionId, ThreadId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Suspended,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParallelStrategy {
    Sequential,
    Parallel,
    Hybrid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_threads: usize,
    pub max_messages: usize,
    pub timeout_ms: u64,
    pub max_memory_bytes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_threads: 100,
            max_messages: 1_000,
            timeout_ms: 300_000,
            max_memory_bytes: 64 * 1024 * 1024,
        }
    }
}

/// A queued message addressed to one thread's inbox. Drains only on
/// explicit read (§3 Session invariants).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: String,
    pub from_thread: Option<ThreadId>,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub owner_id: String,
    pub status: SessionStatus,
    pub config: SessionConfig,
    pub shared_resources: FxHashMap<String, Value>,
    pub thread_ids: Vec<ThreadId>,
    pub parallel_strategy: ParallelStrategy,
    pub inboxes: FxHashMap<ThreadId, VecDeque<InboxMessage>>,
    pub last_activity_at: DateTime<Utc>,
    pub message_count: usize,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId, owner_id: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            status: SessionStatus::Active,
            config,
            shared_resources: FxHashMap::default(),
            thread_ids: Vec::new(),
            parallel_strategy: ParallelStrategy::Sequential,
            inboxes: FxHashMap::default(),
            last_activity_at: Utc::now(),
            message_count: 0,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.thread_ids.len()
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_active_and_empty() {
        let session = Session::new(SessionId::generate(), "alice", SessionConfig::default());
        assert!(session.is_active());
        assert_eq!(session.thread_count(), 0);
    }
}

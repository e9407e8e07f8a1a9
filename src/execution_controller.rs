//! §4.7 Execution Controller — process-wide pause/cancel/resume signaling
//! for in-flight threads. The engine checks a thread's [`ControlState`]
//! between every step; external callers flip it via [`ExecutionController`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;

use crate::ids::ThreadId;

/// Per-thread pause/cancel flags plus a [`Notify`] so a paused engine loop
/// can sleep instead of busy-polling until resumed or cancelled.
pub struct ControlState {
    paused: AtomicBool,
    cancelled: AtomicBool,
    completed: AtomicBool,
    notify: Notify,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }
}

impl std::fmt::Debug for ControlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlState")
            .field("paused", &self.is_paused())
            .field("cancelled", &self.is_cancelled())
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl ControlState {
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Blocks until resumed or cancelled. Called by the engine loop when
    /// `is_paused()` is observed true between steps.
    pub async fn wait_until_resumed(&self) {
        while self.is_paused() && !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

/// Process-wide registry of [`ControlState`] keyed by [`ThreadId`] (§4.7:
/// "process-wide registry").
#[derive(Default)]
pub struct ExecutionController {
    threads: RwLock<FxHashMap<ThreadId, Arc<ControlState>>>,
}

impl ExecutionController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a thread for control, returning the shared [`ControlState`]
    /// the engine loop should poll. Replaces any existing state for the id.
    pub fn register(&self, thread_id: ThreadId) -> Arc<ControlState> {
        let state = Arc::new(ControlState::default());
        self.threads.write().insert(thread_id, state.clone());
        state
    }

    #[must_use]
    pub fn get(&self, thread_id: &ThreadId) -> Option<Arc<ControlState>> {
        self.threads.read().get(thread_id).cloned()
    }

    pub fn pause(&self, thread_id: &ThreadId) -> bool {
        let Some(state) = self.get(thread_id) else { return false };
        state.paused.store(true, Ordering::SeqCst);
        true
    }

    pub fn resume(&self, thread_id: &ThreadId) -> bool {
        let Some(state) = self.get(thread_id) else { return false };
        state.paused.store(false, Ordering::SeqCst);
        state.notify.notify_waiters();
        true
    }

    pub fn cancel(&self, thread_id: &ThreadId) -> bool {
        let Some(state) = self.get(thread_id) else { return false };
        state.cancelled.store(true, Ordering::SeqCst);
        state.notify.notify_waiters();
        true
    }

    pub fn mark_completed(&self, thread_id: &ThreadId) -> bool {
        let Some(state) = self.get(thread_id) else { return false };
        state.completed.store(true, Ordering::SeqCst);
        true
    }

    pub fn unregister(&self, thread_id: &ThreadId) {
        self.threads.write().remove(thread_id);
    }
}

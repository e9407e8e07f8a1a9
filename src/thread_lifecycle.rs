//! §4.9 Thread Lifecycle Service — owns the thread state machine and its
//! audit trail.
//!
//! ```text
//! pending ──start──▶ running ──pause──▶ paused ──resume──▶ running
//!                       │                                  │
//!                       ├──complete──▶ completed (terminal)│
//!                       ├──fail─────▶ failed    (terminal)│
//!                       └──cancel───▶ cancelled (terminal)◀┘
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::ThreadId;
use crate::thread::{Thread, ThreadStatus};
use crate::workflow::Workflow;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum LifecycleError {
    #[error("cannot transition thread {thread_id} from {from:?} via {action:?}")]
    #[diagnostic(
        code(threadengine::lifecycle::invalid_transition),
        help("check the thread's current status before requesting this action")
    )]
    InvalidTransition {
        thread_id: ThreadId,
        from: ThreadStatus,
        action: LifecycleAction,
    },

    #[error("no thread with id {thread_id}")]
    #[diagnostic(code(threadengine::lifecycle::thread_not_found))]
    ThreadNotFound { thread_id: ThreadId },

    #[error("workflow {workflow_id} is not active, cannot start thread")]
    #[diagnostic(code(threadengine::lifecycle::workflow_inactive))]
    WorkflowInactive { workflow_id: crate::ids::WorkflowId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleAction {
    Start,
    Pause,
    Resume,
    Complete,
    Fail,
    Cancel,
}

/// One state transition, recorded for audit (§4.9 "who, when, reason").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub thread_id: ThreadId,
    pub action: LifecycleAction,
    pub from: ThreadStatus,
    pub to: ThreadStatus,
    pub who: String,
    pub when: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Default)]
pub struct ThreadLifecycleService {
    threads: RwLock<FxHashMap<ThreadId, Thread>>,
    audit_log: RwLock<Vec<AuditEntry>>,
}

impl ThreadLifecycleService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, thread: Thread) {
        self.threads.write().insert(thread.id.clone(), thread);
    }

    #[must_use]
    pub fn get(&self, thread_id: &ThreadId) -> Option<Thread> {
        self.threads.read().get(thread_id).cloned()
    }

    #[tracing::instrument(skip(self, workflow), err)]
    pub fn start(&self, thread_id: &ThreadId, workflow: &Workflow, who: &str, reason: Option<&str>) -> Result<(), LifecycleError> {
        if !workflow.is_active() {
            return Err(LifecycleError::WorkflowInactive {
                workflow_id: workflow.id.clone(),
            });
        }
        self.transition(thread_id, LifecycleAction::Start, who, reason, |thread| {
            thread.started_at = Some(Utc::now());
        })
    }

    pub fn pause(&self, thread_id: &ThreadId, who: &str, reason: Option<&str>) -> Result<(), LifecycleError> {
        self.transition(thread_id, LifecycleAction::Pause, who, reason, |_| {})
    }

    pub fn resume(&self, thread_id: &ThreadId, who: &str, reason: Option<&str>) -> Result<(), LifecycleError> {
        self.transition(thread_id, LifecycleAction::Resume, who, reason, |_| {})
    }

    pub fn complete(&self, thread_id: &ThreadId, who: &str, reason: Option<&str>) -> Result<(), LifecycleError> {
        self.transition(thread_id, LifecycleAction::Complete, who, reason, |thread| {
            thread.progress = 100;
            thread.completed_at = Some(Utc::now());
        })
    }

    pub fn fail(&self, thread_id: &ThreadId, who: &str, reason: Option<&str>) -> Result<(), LifecycleError> {
        self.transition(thread_id, LifecycleAction::Fail, who, reason, |thread| {
            thread.completed_at = Some(Utc::now());
            thread.error_message = reason.map(str::to_string);
        })
    }

    pub fn cancel(&self, thread_id: &ThreadId, who: &str, reason: Option<&str>) -> Result<(), LifecycleError> {
        self.transition(thread_id, LifecycleAction::Cancel, who, reason, |thread| {
            thread.completed_at = Some(Utc::now());
        })
    }

    #[must_use]
    pub fn audit_log(&self, thread_id: &ThreadId) -> Vec<AuditEntry> {
        self.audit_log
            .read()
            .iter()
            .filter(|entry| &entry.thread_id == thread_id)
            .cloned()
            .collect()
    }

    fn transition(
        &self,
        thread_id: &ThreadId,
        action: LifecycleAction,
        who: &str,
        reason: Option<&str>,
        apply: impl FnOnce(&mut Thread),
    ) -> Result<(), LifecycleError> {
        let mut threads = self.threads.write();
        let thread = threads.get_mut(thread_id).ok_or_else(|| LifecycleError::ThreadNotFound {
            thread_id: thread_id.clone(),
        })?;

        let from = thread.status;
        let to = Self::next_status(from, action).ok_or(LifecycleError::InvalidTransition {
            thread_id: thread_id.clone(),
            from,
            action,
        })?;

        thread.status = to;
        apply(thread);

        self.audit_log.write().push(AuditEntry {
            thread_id: thread_id.clone(),
            action,
            from,
            to,
            who: who.to_string(),
            when: Utc::now(),
            reason: reason.map(str::to_string),
        });
        Ok(())
    }

    fn next_status(from: ThreadStatus, action: LifecycleAction) -> Option<ThreadStatus> {
        use LifecycleAction::{Cancel, Complete, Fail, Pause, Resume, Start};
        use ThreadStatus::{Cancelled, Completed, Failed, Paused, Pending, Running};

        match (from, action) {
            (Pending, Start) => Some(Running),
            (Running, Pause) => Some(Paused),
            (Paused, Resume) => Some(Running),
            (Running, Complete) => Some(Completed),
            (Running, Fail) | (Paused, Fail) => Some(Failed),
            (Running, Cancel) | (Paused, Cancel) | (Pending, Cancel) => Some(Cancelled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{SessionId, WorkflowId};
    use crate::thread::Thread;
    use crate::workflow::{NodeDescriptor, NodeType};

    fn active_workflow() -> Workflow {
        Workflow::new(WorkflowId::generate()).with_node(NodeDescriptor::new(crate::ids::NodeId::from("A"), NodeType::Start))
    }

    #[test]
    fn happy_path_through_completion() {
        let service = ThreadLifecycleService::new();
        let thread_id = ThreadId::generate();
        let workflow = active_workflow();
        service.register(Thread::new(thread_id.clone(), SessionId::generate(), workflow.id.clone(), 0));

        service.start(&thread_id, &workflow, "tester", None).unwrap();
        assert_eq!(service.get(&thread_id).unwrap().status, ThreadStatus::Running);

        service.complete(&thread_id, "tester", None).unwrap();
        let thread = service.get(&thread_id).unwrap();
        assert_eq!(thread.status, ThreadStatus::Completed);
        assert_eq!(thread.progress, 100);
        assert!(thread.progress_is_consistent());
    }

    #[test]
    fn pause_resume_roundtrip() {
        let service = ThreadLifecycleService::new();
        let thread_id = ThreadId::generate();
        let workflow = active_workflow();
        service.register(Thread::new(thread_id.clone(), SessionId::generate(), workflow.id.clone(), 0));
        service.start(&thread_id, &workflow, "tester", None).unwrap();
        service.pause(&thread_id, "tester", Some("user requested")).unwrap();
        assert_eq!(service.get(&thread_id).unwrap().status, ThreadStatus::Paused);
        service.resume(&thread_id, "tester", None).unwrap();
        assert_eq!(service.get(&thread_id).unwrap().status, ThreadStatus::Running);
    }

    #[test]
    fn illegal_transition_fails() {
        let service = ThreadLifecycleService::new();
        let thread_id = ThreadId::generate();
        let workflow = active_workflow();
        service.register(Thread::new(thread_id.clone(), SessionId::generate(), workflow.id.clone(), 0));
        let err = service.complete(&thread_id, "tester", None).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn starting_against_inactive_workflow_fails() {
        let service = ThreadLifecycleService::new();
        let thread_id = ThreadId::generate();
        let mut workflow = active_workflow();
        workflow.status = crate::workflow::WorkflowStatus::Inactive;
        service.register(Thread::new(thread_id.clone(), SessionId::generate(), workflow.id.clone(), 0));
        let err = service.start(&thread_id, &workflow, "tester", None).unwrap_err();
        assert!(matches!(err, LifecycleError::WorkflowInactive { .. }));
    }

    #[test]
    fn audit_log_records_every_transition() {
        let service = ThreadLifecycleService::new();
        let thread_id = ThreadId::generate();
        let workflow = active_workflow();
        service.register(Thread::new(thread_id.clone(), SessionId::generate(), workflow.id.clone(), 0));
        service.start(&thread_id, &workflow, "tester", None).unwrap();
        service.pause(&thread_id, "tester", Some("break")).unwrap();
        let log = service.audit_log(&thread_id);
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].reason.as_deref(), Some("break"));
    }
}

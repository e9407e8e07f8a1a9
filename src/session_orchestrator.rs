//! §4.10 Session Orchestrator — admission checks plus the operations that
//! mutate a [`Session`] and the threads it owns.

use std::collections::VecDeque;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::fork::{ForkContext, ForkOptions, ThreadForkService};
use crate::history::HistoryManager;
use crate::ids::{NodeId, SessionId, ThreadId, WorkflowId};
use crate::session::{InboxMessage, ParallelStrategy, Session, SessionConfig};
use crate::state_manager::StateManager;
use crate::thread::Thread;
use crate::thread_lifecycle::{LifecycleAction, LifecycleError, ThreadLifecycleService};
use crate::workflow::Workflow;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum SessionError {
    #[error("no session with id {session_id}")]
    #[diagnostic(code(threadengine::session::not_found))]
    SessionNotFound { session_id: SessionId },

    #[error("session {session_id} is terminated")]
    #[diagnostic(code(threadengine::session::terminated))]
    SessionTerminated { session_id: SessionId },

    #[error("session {session_id} quota exceeded: {limit_kind}")]
    #[diagnostic(
        code(threadengine::session::quota_exceeded),
        help("raise the relevant SessionConfig limit or wait for threads to complete")
    )]
    QuotaExceeded { session_id: SessionId, limit_kind: String },

    #[error("thread {thread_id} does not belong to session {session_id}")]
    #[diagnostic(code(threadengine::session::thread_not_owned))]
    ThreadNotOwned { session_id: SessionId, thread_id: ThreadId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fork(#[from] crate::fork::ForkError),
}

/// Coordinates [`Session`]s with the [`ThreadLifecycleService`] and
/// [`ThreadForkService`] that actually own threads and state.
#[derive(Default)]
pub struct SessionOrchestrator {
    sessions: RwLock<FxHashMap<SessionId, Session>>,
}

impl SessionOrchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, owner_id: impl Into<String>, config: SessionConfig) -> SessionId {
        let session = Session::new(SessionId::generate(), owner_id, config);
        let id = session.id.clone();
        self.sessions.write().insert(id.clone(), session);
        id
    }

    #[must_use]
    pub fn get_session(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    #[tracing::instrument(skip(self, lifecycle, workflow), err)]
    pub fn create_thread(
        &self,
        session_id: &SessionId,
        lifecycle: &ThreadLifecycleService,
        workflow: &Workflow,
        priority: i32,
        title: Option<String>,
    ) -> Result<ThreadId, SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id).ok_or_else(|| SessionError::SessionNotFound {
            session_id: session_id.clone(),
        })?;

        if !session.is_active() {
            return Err(SessionError::SessionTerminated {
                session_id: session_id.clone(),
            });
        }
        if session.thread_count() >= session.config.max_threads {
            return Err(SessionError::QuotaExceeded {
                session_id: session_id.clone(),
                limit_kind: "maxThreads".to_string(),
            });
        }

        let mut thread = Thread::new(ThreadId::generate(), session_id.clone(), workflow.id.clone(), priority);
        if let Some(title) = title {
            thread = thread.with_title(title);
        }
        let thread_id = thread.id.clone();
        lifecycle.register(thread);
        session.thread_ids.push(thread_id.clone());
        session.touch();
        Ok(thread_id)
    }

    #[tracing::instrument(skip(self, state_manager, history_manager, lifecycle, fork_service, workflow), err)]
    #[allow(clippy::too_many_arguments)]
    pub fn fork(
        &self,
        session_id: &SessionId,
        parent_thread_id: &ThreadId,
        fork_point: Option<NodeId>,
        options: ForkOptions,
        state_manager: &StateManager,
        history_manager: &HistoryManager,
        lifecycle: &ThreadLifecycleService,
        fork_service: &ThreadForkService,
        workflow: &Workflow,
    ) -> Result<(ThreadId, ForkContext), SessionError> {
        {
            let sessions = self.sessions.read();
            let session = sessions.get(session_id).ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.clone(),
            })?;
            if !session.is_active() {
                return Err(SessionError::SessionTerminated {
                    session_id: session_id.clone(),
                });
            }
            if !session.thread_ids.contains(parent_thread_id) {
                return Err(SessionError::ThreadNotOwned {
                    session_id: session_id.clone(),
                    thread_id: parent_thread_id.clone(),
                });
            }
        }

        let context = fork_service.snapshot(state_manager, history_manager, workflow, parent_thread_id, fork_point, options)?;
        let child_id = self.create_thread(session_id, lifecycle, workflow, 0, None)?;
        fork_service.seed_child(state_manager, child_id.clone(), workflow.id.clone(), &context);
        Ok((child_id, context))
    }

    pub fn manage_thread_lifecycle(
        &self,
        session_id: &SessionId,
        thread_id: &ThreadId,
        lifecycle: &ThreadLifecycleService,
        workflow: &Workflow,
        action: LifecycleAction,
        who: &str,
        reason: Option<&str>,
    ) -> Result<(), SessionError> {
        {
            let sessions = self.sessions.read();
            let session = sessions.get(session_id).ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.clone(),
            })?;
            if !session.thread_ids.contains(thread_id) {
                return Err(SessionError::ThreadNotOwned {
                    session_id: session_id.clone(),
                    thread_id: thread_id.clone(),
                });
            }
        }

        match action {
            LifecycleAction::Start => lifecycle.start(thread_id, workflow, who, reason)?,
            LifecycleAction::Pause => lifecycle.pause(thread_id, who, reason)?,
            LifecycleAction::Resume => lifecycle.resume(thread_id, who, reason)?,
            LifecycleAction::Complete => lifecycle.complete(thread_id, who, reason)?,
            LifecycleAction::Fail => lifecycle.fail(thread_id, who, reason)?,
            LifecycleAction::Cancel => lifecycle.cancel(thread_id, who, reason)?,
        }
        self.touch(session_id);
        Ok(())
    }

    pub fn send_message(&self, session_id: &SessionId, target_thread: &ThreadId, from_thread: Option<ThreadId>, payload: Value) -> Result<String, SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id).ok_or_else(|| SessionError::SessionNotFound {
            session_id: session_id.clone(),
        })?;
        if !session.is_active() {
            return Err(SessionError::SessionTerminated {
                session_id: session_id.clone(),
            });
        }
        if session.message_count >= session.config.max_messages {
            return Err(SessionError::QuotaExceeded {
                session_id: session_id.clone(),
                limit_kind: "maxMessages".to_string(),
            });
        }

        let message_id = Uuid::new_v4().to_string();
        session
            .inboxes
            .entry(target_thread.clone())
            .or_insert_with(VecDeque::new)
            .push_back(InboxMessage {
                id: message_id.clone(),
                from_thread,
                payload,
                sent_at: chrono::Utc::now(),
            });
        session.message_count += 1;
        session.touch();
        Ok(message_id)
    }

    pub fn broadcast_message(&self, session_id: &SessionId, from_thread: &ThreadId, payload: Value) -> Result<Vec<String>, SessionError> {
        let targets: Vec<ThreadId> = {
            let sessions = self.sessions.read();
            let session = sessions.get(session_id).ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.clone(),
            })?;
            session.thread_ids.iter().filter(|id| *id != from_thread).cloned().collect()
        };

        targets
            .into_iter()
            .map(|target| self.send_message(session_id, &target, Some(from_thread.clone()), payload.clone()))
            .collect()
    }

    pub fn drain_inbox(&self, session_id: &SessionId, thread_id: &ThreadId) -> Result<Vec<InboxMessage>, SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id).ok_or_else(|| SessionError::SessionNotFound {
            session_id: session_id.clone(),
        })?;
        Ok(session
            .inboxes
            .get_mut(thread_id)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default())
    }

    pub fn set_shared_resource(&self, session_id: &SessionId, key: impl Into<String>, value: Value) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id).ok_or_else(|| SessionError::SessionNotFound {
            session_id: session_id.clone(),
        })?;
        if !session.is_active() {
            return Err(SessionError::SessionTerminated {
                session_id: session_id.clone(),
            });
        }
        session.shared_resources.insert(key.into(), value);
        session.touch();
        Ok(())
    }

    #[must_use]
    pub fn get_shared_resource(&self, session_id: &SessionId, key: &str) -> Option<Value> {
        self.sessions.read().get(session_id)?.shared_resources.get(key).cloned()
    }

    pub fn update_parallel_strategy(&self, session_id: &SessionId, strategy: ParallelStrategy) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id).ok_or_else(|| SessionError::SessionNotFound {
            session_id: session_id.clone(),
        })?;
        session.parallel_strategy = strategy;
        session.touch();
        Ok(())
    }

    fn touch(&self, session_id: &SessionId) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.touch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{NodeDescriptor, NodeType};

    fn active_workflow() -> Workflow {
        Workflow::new(WorkflowId::generate()).with_node(NodeDescriptor::new(NodeId::from("A"), NodeType::Start))
    }

    #[test]
    fn create_thread_registers_it_on_the_session() {
        let orchestrator = SessionOrchestrator::new();
        let lifecycle = ThreadLifecycleService::new();
        let session_id = orchestrator.create_session("alice", SessionConfig::default());
        let workflow = active_workflow();

        let thread_id = orchestrator.create_thread(&session_id, &lifecycle, &workflow, 0, None).unwrap();
        let session = orchestrator.get_session(&session_id).unwrap();
        assert_eq!(session.thread_ids, vec![thread_id]);
    }

    #[test]
    fn create_thread_fails_past_quota() {
        let orchestrator = SessionOrchestrator::new();
        let lifecycle = ThreadLifecycleService::new();
        let mut config = SessionConfig::default();
        config.max_threads = 1;
        let session_id = orchestrator.create_session("alice", config);
        let workflow = active_workflow();

        orchestrator.create_thread(&session_id, &lifecycle, &workflow, 0, None).unwrap();
        let err = orchestrator.create_thread(&session_id, &lifecycle, &workflow, 0, None).unwrap_err();
        assert!(matches!(err, SessionError::QuotaExceeded { .. }));
    }

    #[test]
    fn broadcast_excludes_sender_and_returns_message_ids() {
        let orchestrator = SessionOrchestrator::new();
        let lifecycle = ThreadLifecycleService::new();
        let session_id = orchestrator.create_session("alice", SessionConfig::default());
        let workflow = active_workflow();
        let sender = orchestrator.create_thread(&session_id, &lifecycle, &workflow, 0, None).unwrap();
        let other = orchestrator.create_thread(&session_id, &lifecycle, &workflow, 0, None).unwrap();

        let ids = orchestrator.broadcast_message(&session_id, &sender, Value::from("hi")).unwrap();
        assert_eq!(ids.len(), 1);

        let inbox = orchestrator.drain_inbox(&session_id, &other).unwrap();
        assert_eq!(inbox.len(), 1);
        let sender_inbox = orchestrator.drain_inbox(&session_id, &sender).unwrap();
        assert!(sender_inbox.is_empty());
    }

    #[test]
    fn shared_resource_roundtrips() {
        let orchestrator = SessionOrchestrator::new();
        let session_id = orchestrator.create_session("alice", SessionConfig::default());
        orchestrator.set_shared_resource(&session_id, "k", Value::from(1)).unwrap();
        assert_eq!(orchestrator.get_shared_resource(&session_id, "k"), Some(Value::from(1)));
    }
}

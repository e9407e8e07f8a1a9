//! §6 Repository contracts the engine depends on. Narrow, object-safe
//! traits so the engine is fully testable with in-memory fakes; this crate
//! ships no concrete database-backed implementation (that lives outside the
//! core, per §6) except for [`crate::checkpoint::CheckpointStore`], whose
//! durability story is explicitly in scope.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ids::{SessionId, ThreadId, WorkflowId};
use crate::session::Session;
use crate::thread::Thread;
use crate::workflow::Workflow;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum RepositoryError {
    #[error("no session with id {session_id}")]
    #[diagnostic(code(threadengine::repository::session_not_found))]
    SessionNotFound { session_id: SessionId },

    #[error("no thread with id {thread_id}")]
    #[diagnostic(code(threadengine::repository::thread_not_found))]
    ThreadNotFound { thread_id: ThreadId },

    #[error("no workflow with id {workflow_id}")]
    #[diagnostic(code(threadengine::repository::workflow_not_found))]
    WorkflowNotFound { workflow_id: WorkflowId },
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SessionId) -> Option<Session>;

    async fn find_by_id_or_fail(&self, id: &SessionId) -> Result<Session, RepositoryError> {
        self.find_by_id(id).await.ok_or_else(|| RepositoryError::SessionNotFound {
            session_id: id.clone(),
        })
    }

    async fn save(&self, session: Session);
    async fn exists(&self, id: &SessionId) -> bool;
    async fn find_sessions_for_user(&self, owner_id: &str) -> Vec<Session>;
    async fn find_sessions_needing_cleanup(&self) -> Vec<Session>;
    async fn delete(&self, id: &SessionId);
}

#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn find_by_id(&self, id: &ThreadId) -> Option<Thread>;

    async fn find_by_id_or_fail(&self, id: &ThreadId) -> Result<Thread, RepositoryError> {
        self.find_by_id(id).await.ok_or_else(|| RepositoryError::ThreadNotFound {
            thread_id: id.clone(),
        })
    }

    async fn save(&self, thread: Thread);
    async fn has_active_threads(&self, session_id: &SessionId) -> bool;
    async fn find_by_session_id(&self, session_id: &SessionId) -> Vec<Thread>;
    async fn delete(&self, id: &ThreadId);
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find_by_id(&self, id: &WorkflowId) -> Option<Workflow>;
}

/// In-memory fakes used for tests and examples; not a production backend.
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<FxHashMap<SessionId, Session>>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    async fn save(&self, session: Session) {
        self.sessions.write().insert(session.id.clone(), session);
    }

    async fn exists(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    async fn find_sessions_for_user(&self, owner_id: &str) -> Vec<Session> {
        self.sessions.read().values().filter(|s| s.owner_id == owner_id).cloned().collect()
    }

    async fn find_sessions_needing_cleanup(&self) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.status == crate::session::SessionStatus::Terminated)
            .cloned()
            .collect()
    }

    async fn delete(&self, id: &SessionId) {
        self.sessions.write().remove(id);
    }
}

#[derive(Default)]
pub struct InMemoryThreadRepository {
    threads: RwLock<FxHashMap<ThreadId, Thread>>,
}

#[async_trait]
impl ThreadRepository for InMemoryThreadRepository {
    async fn find_by_id(&self, id: &ThreadId) -> Option<Thread> {
        self.threads.read().get(id).cloned()
    }

    async fn save(&self, thread: Thread) {
        self.threads.write().insert(thread.id.clone(), thread);
    }

    async fn has_active_threads(&self, session_id: &SessionId) -> bool {
        self.threads
            .read()
            .values()
            .any(|t| &t.session_id == session_id && !t.status.is_terminal())
    }

    async fn find_by_session_id(&self, session_id: &SessionId) -> Vec<Thread> {
        self.threads.read().values().filter(|t| &t.session_id == session_id).cloned().collect()
    }

    async fn delete(&self, id: &ThreadId) {
        self.threads.write().remove(id);
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<FxHashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowRepository {
    pub fn insert(&self, workflow: Workflow) {
        self.workflows.write().insert(workflow.id.clone(), workflow);
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Option<Workflow> {
        self.workflows.read().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::workflow::{NodeDescriptor, NodeType};

    #[tokio::test]
    async fn session_repository_roundtrips() {
        let repo = InMemorySessionRepository::default();
        let session = Session::new(SessionId::generate(), "alice", SessionConfig::default());
        let id = session.id.clone();
        repo.save(session).await;
        assert!(repo.exists(&id).await);
        assert!(repo.find_by_id_or_fail(&id).await.is_ok());
    }

    #[tokio::test]
    async fn thread_repository_tracks_active_threads() {
        let repo = InMemoryThreadRepository::default();
        let session_id = SessionId::generate();
        let thread = Thread::new(ThreadId::generate(), session_id.clone(), WorkflowId::generate(), 0);
        repo.save(thread).await;
        assert!(repo.has_active_threads(&session_id).await);
    }

    #[tokio::test]
    async fn workflow_repository_finds_inserted_workflow() {
        let repo = InMemoryWorkflowRepository::default();
        let workflow = Workflow::new(WorkflowId::generate()).with_node(NodeDescriptor::new(crate::ids::NodeId::from("A"), NodeType::Start));
        let id = workflow.id.clone();
        repo.insert(workflow);
        assert!(repo.find_by_id(&id).await.is_some());
    }
}

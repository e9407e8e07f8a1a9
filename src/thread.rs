//! §3 `Thread` entity — one execution of a [`crate::workflow::Workflow`]
//! with its own state, owned exclusively by a [`crate::session::Session`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, ThreadId, WorkflowId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ThreadStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One execution of a workflow. Progress and status are kept consistent by
/// [`crate::thread_lifecycle::ThreadLifecycleService`] — nothing else should
/// mutate `status`/`progress` directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub session_id: SessionId,
    pub workflow_id: WorkflowId,
    pub priority: i32,
    pub status: ThreadStatus,
    pub progress: u8,
    pub current_step_label: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub title: Option<String>,
}

impl Thread {
    #[must_use]
    pub fn new(id: ThreadId, session_id: SessionId, workflow_id: WorkflowId, priority: i32) -> Self {
        Self {
            id,
            session_id,
            workflow_id,
            priority,
            status: ThreadStatus::Pending,
            progress: 0,
            current_step_label: None,
            started_at: None,
            completed_at: None,
            error_message: None,
            title: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Invariant (§3): `progress == 100 <=> status == Completed`.
    #[must_use]
    pub fn progress_is_consistent(&self) -> bool {
        (self.progress == 100) == (self.status == ThreadStatus::Completed)
    }
}

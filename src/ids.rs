//! Opaque identifier newtypes used at every component boundary.
//!
//! Components never share pointers or interior references to each other's
//! owned data (§9 "cyclic references" design note) — they pass these ids and
//! go through State/History/Checkpoint managers or repositories to resolve
//! them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh random id (UUID v4).
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wraps an existing opaque string as an id, e.g. one read back
            /// from a repository.
            #[must_use]
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(SessionId, "Identifies a [`crate::session::Session`].");
opaque_id!(ThreadId, "Identifies a [`crate::thread::Thread`].");
opaque_id!(
    WorkflowId,
    "Identifies an immutable [`crate::workflow::Workflow`] snapshot."
);
opaque_id!(
    CheckpointId,
    "Identifies a single [`crate::checkpoint::Checkpoint`]."
);
opaque_id!(NodeId, "Identifies a node within a `Workflow`.");
opaque_id!(EdgeId, "Identifies an edge within a `Workflow`.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_distinct_ids() {
        assert_ne!(ThreadId::generate(), ThreadId::generate());
    }

    #[test]
    fn roundtrips_through_display() {
        let id = SessionId::from("sess-123");
        assert_eq!(id.as_str(), "sess-123");
        assert_eq!(id.to_string(), "sess-123");
    }
}

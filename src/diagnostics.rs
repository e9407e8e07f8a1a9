//! Error-ladder diagnostics shared by every component's error enum.
//!
//! An [`ErrorEvent`] is the thing that actually gets recorded — in a
//! [`NodeExecutionRecord`](crate::history::NodeExecutionRecord), in a thread's
//! `error_message`, or in the engine's own diagnostic stream. A
//! [`LadderError`] is the payload: a message plus an optional boxed cause,
//! so a low-level `serde_json` failure can surface all the way up through a
//! `RouterError` without losing context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{FormatterMode, PlainFormatter, TelemetryFormatter};

/// Where an [`ErrorEvent`] originated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    /// A node execution failure, tagged with the node id and step.
    Node { node_id: String, step: u64 },
    /// A conditional router failure (invalid/throwing guard expression).
    Router { node_id: String, step: u64 },
    /// A thread-lifecycle or engine-loop failure.
    Engine { thread_id: String, step: u64 },
    /// A session-orchestrator failure.
    Session { session_id: String },
}

/// A chained error message, mirroring `std::error::Error::source()` without
/// requiring `'static` trait objects in persisted/serialized form.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LadderError {
    pub message: String,
    pub cause: Option<Box<LadderError>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl LadderError {
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: LadderError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl std::fmt::Display for LadderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LadderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// A recorded error, scoped to whichever component raised it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEvent {
    pub when: DateTime<Utc>,
    pub scope: ErrorScope,
    pub error: LadderError,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorEvent {
    #[must_use]
    pub fn node(node_id: impl Into<String>, step: u64, error: LadderError) -> Self {
        Self::new(
            ErrorScope::Node {
                node_id: node_id.into(),
                step,
            },
            error,
        )
    }

    #[must_use]
    pub fn router(node_id: impl Into<String>, step: u64, error: LadderError) -> Self {
        Self::new(
            ErrorScope::Router {
                node_id: node_id.into(),
                step,
            },
            error,
        )
    }

    #[must_use]
    pub fn engine(thread_id: impl Into<String>, step: u64, error: LadderError) -> Self {
        Self::new(
            ErrorScope::Engine {
                thread_id: thread_id.into(),
                step,
            },
            error,
        )
    }

    #[must_use]
    pub fn session(session_id: impl Into<String>, error: LadderError) -> Self {
        Self::new(
            ErrorScope::Session {
                session_id: session_id.into(),
            },
            error,
        )
    }

    fn new(scope: ErrorScope, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope,
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

pub fn pretty_print_with_mode(events: &[ErrorEvent], mode: FormatterMode) -> String {
    let formatter = PlainFormatter::with_mode(mode);
    formatter
        .render_errors(events)
        .into_iter()
        .map(|r| r.join_lines())
        .collect()
}

#[must_use]
pub fn pretty_print(events: &[ErrorEvent]) -> String {
    pretty_print_with_mode(events, FormatterMode::Auto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_error_chain() {
        let cause = LadderError::msg("inner");
        let event = ErrorEvent::node("A", 3, LadderError::msg("outer").with_cause(cause))
            .with_tag("retryable");
        assert_eq!(event.tags, vec!["retryable".to_string()]);
        assert!(event.error.cause.is_some());
        assert_eq!(event.error.source().unwrap().to_string(), "inner");
    }

    #[test]
    fn pretty_print_contains_message() {
        let events = vec![ErrorEvent::engine("t1", 2, LadderError::msg("boom"))];
        let rendered = pretty_print_with_mode(&events, FormatterMode::Plain);
        assert!(rendered.contains("boom"));
    }
}

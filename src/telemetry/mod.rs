//! Plain-text/ANSI rendering for events and error ladders.
//!
//! Kept intentionally dumb: a [`TelemetryFormatter`] turns an [`Event`] or a
//! slice of [`ErrorEvent`]s into lines of text. Sinks decide what to do with
//! those lines (write to stdout, a file, a channel).

use crate::diagnostics::{ErrorEvent, LadderError};
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    #[must_use]
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

/// Whether a [`PlainFormatter`] should emit ANSI color codes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatterMode {
    /// Color when stdout looks like a terminal, plain otherwise.
    #[default]
    Auto,
    Colored,
    Plain,
}

impl FormatterMode {
    fn colorize(self) -> bool {
        match self {
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
            FormatterMode::Auto => std::io::IsTerminal::is_terminal(&std::io::stdout()),
        }
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender>;
}

/// Default formatter: one line per event, an indented cause chain per error.
pub struct PlainFormatter {
    mode: FormatterMode,
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    #[must_use]
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn wrap(&self, color: &str, text: &str) -> String {
        if self.mode.colorize() {
            format!("{color}{text}{RESET_COLOR}")
        } else {
            text.to_string()
        }
    }
}

fn format_error_chain(formatter: &PlainFormatter, error: &LadderError, indent: usize) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(cause) = &error.cause {
        let indent_str = "  ".repeat(indent);
        lines.push(format!(
            "{}\n",
            formatter.wrap(LINE_COLOR, &format!("{indent_str}cause: {}", cause.message))
        ));
        lines.extend(format_error_chain(formatter, cause, indent + 1));
    }
    lines
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = format!("{}\n", self.wrap(LINE_COLOR, &event.to_string()));
        EventRender {
            context: event.scope_label().map(str::to_string),
            lines: vec![line],
        }
    }

    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender> {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let mut lines = Vec::new();
                let scope_str = self.wrap(CONTEXT_COLOR, &format!("{:?}", e.scope));
                lines.push(format!("[{}] {} | {}\n", i, e.when, scope_str));
                lines.push(format!(
                    "{}\n",
                    self.wrap(LINE_COLOR, &format!("  error: {}", e.error.message))
                ));
                lines.extend(format_error_chain(self, &e.error, 1));
                if !e.tags.is_empty() {
                    lines.push(format!(
                        "{}\n",
                        self.wrap(LINE_COLOR, &format!("  tags: {:?}", e.tags))
                    ));
                }
                if !e.context.is_null() {
                    lines.push(format!(
                        "{}\n",
                        self.wrap(LINE_COLOR, &format!("  context: {}", e.context))
                    ));
                }
                EventRender {
                    context: Some(format!("{:?}", e.scope)),
                    lines,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorEvent as DiagErrorEvent;

    #[test]
    fn plain_mode_has_no_escapes() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Plain);
        let errors = vec![DiagErrorEvent::engine("t1", 1, LadderError::msg("boom"))];
        let rendered = formatter.render_errors(&errors);
        assert!(!rendered[0].join_lines().contains('\x1b'));
    }

    #[test]
    fn colored_mode_has_escapes() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Colored);
        let errors = vec![DiagErrorEvent::engine("t1", 1, LadderError::msg("boom"))];
        let rendered = formatter.render_errors(&errors);
        assert!(rendered[0].join_lines().contains('\x1b'));
    }
}

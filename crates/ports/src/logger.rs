//! Structured logging boundary contract.

use serde_json::Value;
use std::collections::BTreeMap;

/// Ordered key/value fields attached to a log event.
pub type LogFields = BTreeMap<String, Value>;

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures.
    Error,
}

/// Boundary contract for structured logging.
pub trait LoggerPort: Send + Sync {
    /// Emit one structured event.
    fn log(&self, level: LogLevel, event: &str, message: &str, fields: Option<LogFields>);

    /// Emit a debug event.
    fn debug(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogLevel::Debug, event, message, fields);
    }

    /// Emit an info event.
    fn info(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogLevel::Info, event, message, fields);
    }

    /// Emit a warning event.
    fn warn(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogLevel::Warn, event, message, fields);
    }

    /// Emit an error event.
    fn error(&self, event: &str, message: &str, fields: Option<LogFields>) {
        self.log(LogLevel::Error, event, message, fields);
    }
}

/// Build a fields map from string pairs.
#[must_use]
pub fn fields(pairs: &[(&str, &str)]) -> LogFields {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), Value::String((*value).to_owned())))
        .collect()
}

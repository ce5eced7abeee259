//! Structured JSON logger adapter.

use ringvault_ports::{LogFields, LogLevel, LoggerPort};
use serde_json::Value;
use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const REDACTED: &str = "<redacted>";

/// Field keys whose values are never written out.
const SECRET_KEYS: &[&str] = &["password", "cql_password", "key_file", "token", "secret"];

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_KEYS.iter().any(|secret| lower.contains(secret))
}

/// Sink receiving one encoded line per event.
pub trait LogSink: Send + Sync {
    /// Write one line (newline included).
    fn write_line(&self, line: &str);
}

/// Sink writing to stderr.
#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_line(&self, line: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
    }
}

/// Sink collecting lines in memory (tests).
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Take all collected lines.
    pub fn take(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn write_line(&self, line: &str) {
        if let Ok(mut guard) = self.lines.lock() {
            guard.push(line.to_owned());
        }
    }
}

/// JSON logger emitting one line per event.
pub struct JsonLogger<S> {
    sink: S,
    min_level: LogLevel,
}

impl<S: LogSink> JsonLogger<S> {
    /// Create a logger backed by the provided sink.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            min_level: LogLevel::Info,
        }
    }

    /// Set the minimum log level.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

impl<S: LogSink> LoggerPort for JsonLogger<S> {
    fn log(&self, level: LogLevel, event: &str, message: &str, fields: Option<LogFields>) {
        if level < self.min_level {
            return;
        }

        let mut payload = serde_json::Map::new();
        payload.insert("timestampMs".to_owned(), Value::from(now_epoch_ms()));
        payload.insert("level".to_owned(), Value::String(level_str(level).to_owned()));
        payload.insert("event".to_owned(), Value::String(event.to_owned()));
        payload.insert("message".to_owned(), Value::String(message.to_owned()));
        if let Some(fields) = fields {
            let mut encoded = serde_json::Map::new();
            for (key, value) in fields {
                let value = if is_secret_key(&key) {
                    Value::String(REDACTED.to_owned())
                } else {
                    value
                };
                encoded.insert(key, value);
            }
            if !encoded.is_empty() {
                payload.insert("fields".to_owned(), Value::Object(encoded));
            }
        }

        let mut line = serde_json::to_string(&Value::Object(payload)).unwrap_or_else(|_| {
            "{\"level\":\"error\",\"event\":\"logger.serialize_failed\"}".to_owned()
        });
        line.push('\n');
        self.sink.write_line(&line);
    }
}

const fn level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringvault_ports::fields;

    #[test]
    fn events_encode_as_one_json_line() {
        let logger = JsonLogger::new(MemorySink::default());
        logger.info(
            "backup.started",
            "Backup started",
            Some(fields(&[("backup", "bk1"), ("fqdn", "n1")])),
        );

        let lines = logger.sink.take();
        assert_eq!(lines.len(), 1);
        let payload: Value = serde_json::from_str(lines[0].trim()).expect("valid JSON line");
        assert_eq!(payload["event"], "backup.started");
        assert_eq!(payload["fields"]["backup"], "bk1");
    }

    #[test]
    fn secret_fields_are_redacted() {
        let logger = JsonLogger::new(MemorySink::default());
        logger.info(
            "config.loaded",
            "Configuration loaded",
            Some(fields(&[("cql_password", "hunter2"), ("bucket", "b")])),
        );

        let lines = logger.sink.take();
        let payload: Value = serde_json::from_str(lines[0].trim()).expect("valid JSON line");
        assert_eq!(payload["fields"]["cql_password"], REDACTED);
        assert_eq!(payload["fields"]["bucket"], "b");
    }

    #[test]
    fn min_level_filters_debug() {
        let logger = JsonLogger::new(MemorySink::default());
        logger.debug("noise", "dropped", None);
        assert!(logger.sink.take().is_empty());

        let verbose = JsonLogger::new(MemorySink::default()).with_min_level(LogLevel::Debug);
        verbose.debug("noise", "kept", None);
        assert_eq!(verbose.sink.take().len(), 1);
    }
}

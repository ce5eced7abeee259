//! Error envelope types and helpers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, io};

/// Metadata attached to errors for diagnostics.
pub type ErrorMetadata = BTreeMap<String, String>;

/// High-level classification of error origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Expected failures (validation, user input, missing backups).
    Expected,
    /// Invariant violations in backup or restore logic.
    Invariant,
    /// Unexpected failures (I/O, storage backends, remote hosts).
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expected => formatter.write_str("expected"),
            Self::Invariant => formatter.write_str("invariant"),
            Self::Unexpected => formatter.write_str("unexpected"),
        }
    }
}

/// Retry classification for failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The operation can be retried safely.
    Retriable,
    /// The operation should not be retried.
    NonRetriable,
}

impl ErrorClass {
    /// Returns true when the error is considered retriable.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Retriable)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retriable => formatter.write_str("retriable"),
            Self::NonRetriable => formatter.write_str("non-retriable"),
        }
    }
}

/// Stable error code with namespace and identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode {
    namespace: String,
    code: String,
}

impl ErrorCode {
    /// Create a new error code with a namespace and code.
    pub fn new(namespace: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            code: code.into(),
        }
    }

    /// Core cancellation code.
    pub fn cancelled() -> Self {
        Self::new("core", "cancelled")
    }

    /// Invalid input code.
    pub fn invalid_input() -> Self {
        Self::new("core", "invalid_input")
    }

    /// I/O error code.
    pub fn io() -> Self {
        Self::new("core", "io")
    }

    /// Timeout code.
    pub fn timeout() -> Self {
        Self::new("core", "timeout")
    }

    /// Internal failure code.
    pub fn internal() -> Self {
        Self::new("core", "internal")
    }

    /// Storage object not found.
    pub fn not_found() -> Self {
        Self::new("storage", "not_found")
    }

    /// Transient storage failure, safe to retry.
    pub fn transient_io() -> Self {
        Self::new("storage", "transient_io")
    }

    /// Storage authentication or authorization failure.
    pub fn auth() -> Self {
        Self::new("storage", "auth")
    }

    /// Storage conflict (concurrent writer, precondition failure).
    pub fn conflict() -> Self {
        Self::new("storage", "conflict")
    }

    /// A backup with the same identity already exists.
    pub fn already_exists() -> Self {
        Self::new("backup", "already_exists")
    }

    /// The stagger window elapsed before the ring predecessor finished.
    pub fn stagger_timeout() -> Self {
        Self::new("backup", "stagger_timeout")
    }

    /// Backup and target cluster topologies do not match.
    pub fn topology_mismatch() -> Self {
        Self::new("restore", "topology_mismatch")
    }

    /// Checksum or size mismatch between manifest and storage.
    pub fn integrity() -> Self {
        Self::new("verify", "integrity")
    }

    /// Configuration is missing or invalid.
    pub fn config_invalid() -> Self {
        Self::new("config", "invalid")
    }

    /// A remote command failed or the remote transport broke.
    pub fn remote_exec() -> Self {
        Self::new("remote", "exec_failed")
    }

    /// Returns the namespace portion.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the code identifier.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.namespace, self.code)
    }
}

/// Structured error envelope shared across crates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Error kind describing the origin category.
    pub kind: ErrorKind,
    /// Retry classification.
    pub class: ErrorClass,
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Additional diagnostic metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: ErrorMetadata,
}

impl ErrorEnvelope {
    /// Create an expected error with non-retriable classification.
    pub fn expected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Expected,
            class: ErrorClass::NonRetriable,
            code,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Create an invariant error (always non-retriable).
    pub fn invariant(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Invariant,
            class: ErrorClass::NonRetriable,
            code,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Create an unexpected error with the provided retry classification.
    pub fn unexpected(code: ErrorCode, message: impl Into<String>, class: ErrorClass) -> Self {
        Self {
            kind: ErrorKind::Unexpected,
            class,
            code,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Create a retriable transient storage error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::unexpected(ErrorCode::transient_io(), message, ErrorClass::Retriable)
    }

    /// Create a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::expected(ErrorCode::cancelled(), message)
    }

    /// Returns true if the error represents a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::cancelled()
    }

    /// Returns true if the error represents a missing object or backup.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::not_found()
    }

    /// Attach a single metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} {} {}: {}",
            self.kind, self.class, self.code, self.message
        )
    }
}

impl std::error::Error for ErrorEnvelope {}

impl From<io::Error> for ErrorEnvelope {
    fn from(error: io::Error) -> Self {
        let kind = error.kind();
        let code = error_code_from_io_kind(kind);
        let class = if is_retriable_io(kind) {
            ErrorClass::Retriable
        } else {
            ErrorClass::NonRetriable
        };
        Self::unexpected(code, error.to_string(), class)
    }
}

fn error_code_from_io_kind(kind: io::ErrorKind) -> ErrorCode {
    match kind {
        io::ErrorKind::NotFound => ErrorCode::not_found(),
        io::ErrorKind::PermissionDenied => ErrorCode::auth(),
        io::ErrorKind::TimedOut => ErrorCode::timeout(),
        io::ErrorKind::Interrupted => ErrorCode::cancelled(),
        _ => ErrorCode::io(),
    }
}

const fn is_retriable_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_constructors() {
        let expected = ErrorEnvelope::expected(ErrorCode::not_found(), "no such backup");
        assert_eq!(expected.kind, ErrorKind::Expected);
        assert_eq!(expected.class, ErrorClass::NonRetriable);
        assert!(expected.is_not_found());

        let invariant = ErrorEnvelope::invariant(ErrorCode::integrity(), "size mismatch");
        assert_eq!(invariant.kind, ErrorKind::Invariant);

        let transient = ErrorEnvelope::transient("connection reset");
        assert!(transient.class.is_retriable());
        assert_eq!(transient.code, ErrorCode::transient_io());
    }

    #[test]
    fn io_errors_are_classified() {
        let timeout: ErrorEnvelope = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(timeout.code, ErrorCode::timeout());
        assert!(timeout.class.is_retriable());

        let missing: ErrorEnvelope = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(missing.code, ErrorCode::not_found());
        assert!(!missing.class.is_retriable());
    }

    #[test]
    fn cancellation_is_detectable() {
        let cancelled = ErrorEnvelope::cancelled("stopped");
        assert!(cancelled.is_cancelled());
        assert!(!ErrorEnvelope::transient("nope").is_cancelled());
    }

    #[test]
    fn metadata_round_trips_through_json() {
        let error = ErrorEnvelope::expected(ErrorCode::already_exists(), "duplicate backup")
            .with_metadata("fqdn", "node1.example.com")
            .with_metadata("backup", "bk1");
        let encoded = serde_json::to_string(&error).expect("serialize envelope");
        let decoded: ErrorEnvelope = serde_json::from_str(&encoded).expect("deserialize envelope");
        assert_eq!(decoded, error);
    }
}

//! Domain primitives with validated constructors.

use ringvault_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Keyspaces that are never backed up or restored.
pub const RESERVED_KEYSPACES: &[&str] = &["system_traces"];

/// Tables of the `system` keyspace that encode node identity and are
/// skipped on out-of-place restores.
pub const IDENTITY_TABLES: &[&str] = &["local", "peers"];

/// Returns true when the keyspace is excluded from backup and restore.
#[must_use]
pub fn is_reserved_keyspace(keyspace: &str) -> bool {
    RESERVED_KEYSPACES.contains(&keyspace)
}

/// Validation failures for domain primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// `BackupName` is empty after trimming or contains a separator.
    InvalidBackupName {
        /// Offending raw input.
        input: String,
    },
    /// `NodeFqdn` is empty after trimming or contains a separator.
    InvalidNodeFqdn {
        /// Offending raw input.
        input: String,
    },
    /// Keyspace or table name is empty or contains a separator.
    InvalidQualifiedName {
        /// Offending raw input.
        input: String,
    },
}

impl PrimitiveError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidBackupName { .. } => ErrorCode::new("domain", "invalid_backup_name"),
            Self::InvalidNodeFqdn { .. } => ErrorCode::new("domain", "invalid_fqdn"),
            Self::InvalidQualifiedName { .. } => ErrorCode::new("domain", "invalid_table_name"),
        }
    }
}

impl fmt::Display for PrimitiveError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBackupName { .. } => {
                formatter.write_str("backup name must be a non-empty path segment")
            },
            Self::InvalidNodeFqdn { .. } => {
                formatter.write_str("fqdn must be a non-empty path segment")
            },
            Self::InvalidQualifiedName { .. } => {
                formatter.write_str("keyspace/table must be a non-empty path segment")
            },
        }
    }
}

impl std::error::Error for PrimitiveError {}

impl From<PrimitiveError> for ErrorEnvelope {
    fn from(error: PrimitiveError) -> Self {
        let input = match &error {
            PrimitiveError::InvalidBackupName { input }
            | PrimitiveError::InvalidNodeFqdn { input }
            | PrimitiveError::InvalidQualifiedName { input } => input.clone(),
        };
        Self::expected(error.error_code(), error.to_string()).with_metadata("input", input)
    }
}

fn validate_segment(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.contains('/') || trimmed.contains('\\') {
        return None;
    }
    Some(trimmed.to_owned())
}

/// The name of a backup, unique per node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupName(String);

impl BackupName {
    /// Validate an untrusted backup name.
    pub fn parse(input: &str) -> Result<Self, PrimitiveError> {
        validate_segment(input)
            .map(Self)
            .ok_or_else(|| PrimitiveError::InvalidBackupName {
                input: input.to_owned(),
            })
    }

    /// Borrow the name as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Fully qualified name of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeFqdn(String);

impl NodeFqdn {
    /// Validate an untrusted fqdn.
    pub fn parse(input: &str) -> Result<Self, PrimitiveError> {
        validate_segment(input)
            .map(Self)
            .ok_or_else(|| PrimitiveError::InvalidNodeFqdn {
                input: input.to_owned(),
            })
    }

    /// Borrow the fqdn as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeFqdn {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_names_are_trimmed_segments() {
        assert_eq!(
            BackupName::parse("  bk1 ").map(|n| n.as_str().to_owned()),
            Ok("bk1".to_owned())
        );
        assert!(BackupName::parse("").is_err());
        assert!(BackupName::parse("a/b").is_err());
    }

    #[test]
    fn fqdn_rejects_separators() {
        assert!(NodeFqdn::parse("node1.example.com").is_ok());
        assert!(NodeFqdn::parse("node1/evil").is_err());
    }

    #[test]
    fn reserved_keyspaces_are_detected() {
        assert!(is_reserved_keyspace("system_traces"));
        assert!(!is_reserved_keyspace("system"));
        assert!(!is_reserved_keyspace("mykeyspace"));
    }

    #[test]
    fn primitive_errors_map_to_envelopes() {
        let error = BackupName::parse("/").expect_err("separator should fail");
        let envelope: ErrorEnvelope = error.into();
        assert_eq!(
            envelope.code,
            ErrorCode::new("domain", "invalid_backup_name")
        );
    }
}

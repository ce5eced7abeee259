//! CLI error and exit-code mapping.

use ringvault_shared::{ErrorEnvelope, ErrorKind};
use std::fmt;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Success.
    Ok,
    /// Any runtime failure.
    Failure,
    /// Bad flags, bad config, or a missing backup.
    InvalidInput,
}

impl ExitCode {
    /// Numeric exit code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Failure => 1,
            Self::InvalidInput => 2,
        }
    }
}

/// Errors surfacing at the CLI boundary.
#[derive(Debug)]
pub enum CliError {
    /// Structured failure from the application layers.
    App(ErrorEnvelope),
    /// Invalid command-line usage.
    Usage(String),
    /// I/O failure at the CLI boundary itself.
    Io(std::io::Error),
}

impl CliError {
    /// Exit code for this failure.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::App(envelope) => match envelope.kind {
                ErrorKind::Expected => ExitCode::InvalidInput,
                ErrorKind::Invariant | ErrorKind::Unexpected => ExitCode::Failure,
            },
            Self::Usage(_) => ExitCode::InvalidInput,
            Self::Io(_) => ExitCode::Failure,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App(envelope) => write!(formatter, "{envelope}"),
            Self::Usage(message) => formatter.write_str(message),
            Self::Io(error) => write!(formatter, "io error: {error}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ErrorEnvelope> for CliError {
    fn from(envelope: ErrorEnvelope) -> Self {
        Self::App(envelope)
    }
}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

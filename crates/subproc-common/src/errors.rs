//! Error types for the subproc workspace.
//!
//! All fallible operations in the workspace return [`Result`]. The taxonomy
//! mirrors how failures surface to callers: malformed arguments, OS-level
//! spawn/exec failures, communicate timeouts (which carry whatever output
//! was collected before the deadline), and non-zero exits raised by the
//! checked convenience functions.

use crate::types::ExitStatus;
use thiserror::Error;

/// Result type alias for subproc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for subproc operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input: empty argv, interior NUL bytes, input
    /// supplied without a stdin pipe, and similar shape violations.
    #[error("invalid argument: {message}")]
    Argument { message: String },

    /// An operation against the OS failed, e.g. exec of a missing program.
    #[error("{operation} failed: {source}")]
    Os {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// The pre-exec hook reported a failure in the child.
    #[error("pre-exec hook failed: {message}")]
    PreExec { message: String },

    /// I/O error in the parent (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A communicate call reached its deadline. Carries the bytes collected
    /// from stdout and stderr up to that point; the child is left running.
    #[error(
        "'{command}' did not complete before the timeout ({} stdout bytes, {} stderr bytes collected)",
        .stdout.len(),
        .stderr.len()
    )]
    Timeout {
        command: String,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    /// A checked convenience call observed a non-zero exit.
    #[error("'{command}' {status}")]
    NonZeroExit { command: String, status: ExitStatus },
}

impl Error {
    /// Creates an Argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument {
            message: message.into(),
        }
    }

    /// Creates an Os error from a raw errno value.
    pub fn os_raw(operation: impl Into<String>, errno: i32) -> Self {
        Self::Os {
            operation: operation.into(),
            source: std::io::Error::from_raw_os_error(errno),
        }
    }

    /// Creates an Os error from an io::Error.
    pub fn os(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Os {
            operation: operation.into(),
            source,
        }
    }

    /// Creates a PreExec error.
    pub fn pre_exec(message: impl Into<String>) -> Self {
        Self::PreExec {
            message: message.into(),
        }
    }

    /// Creates a Timeout error carrying the partial output.
    pub fn timeout(command: impl Into<String>, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self::Timeout {
            command: command.into(),
            stdout,
            stderr,
        }
    }

    /// Creates a NonZeroExit error.
    pub fn non_zero_exit(command: impl Into<String>, status: ExitStatus) -> Self {
        Self::NonZeroExit {
            command: command.into(),
            status,
        }
    }
}

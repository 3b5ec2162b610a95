//! Error types for Convoy
//!
//! Uses `thiserror` for library errors. Transport failures carry their own
//! enum so the executor can decide retry vs abort per class.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::Step;

/// Result type alias for Convoy operations
pub type ConvoyResult<T> = Result<T, ConvoyError>;

/// Errors raised by the transport layer.
///
/// `Connection`, `Auth` and `Timeout` are retryable per the executor's
/// step policy; `CommandFailed` is a genuine step failure and is not.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Host unreachable (ssh/rsync could not establish a connection)
    #[error("connection to '{host}' failed: {message}")]
    Connection { host: String, message: String },

    /// Credentials rejected by the remote host
    #[error("authentication to '{host}' rejected: {message}")]
    Auth { host: String, message: String },

    /// Command exceeded its deadline and was killed
    #[error("command on '{host}' timed out after {seconds}s")]
    Timeout { host: String, seconds: u64 },

    /// Remote command ran but exited nonzero
    #[error("command on '{host}' exited with status {code}: {stderr}")]
    CommandFailed {
        host: String,
        code: i32,
        stderr: String,
    },

    /// Required local tool (ssh/rsync) is missing from PATH
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Local IO error while staging or spawning
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the executor may retry a step that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connection { .. }
                | TransportError::Auth { .. }
                | TransportError::Timeout { .. }
        )
    }
}

/// Main error type for Convoy operations
#[derive(Error, Debug)]
pub enum ConvoyError {
    /// Malformed or inconsistent configuration (fatal, no host is touched)
    #[error("config error: {message}")]
    Config { message: String },

    /// Duplicate host identifier in the inventory
    #[error("duplicate host id '{id}' in inventory")]
    DuplicateHost { id: String },

    /// Host references a role with no [roles.*] section
    #[error("host '{id}' references unknown role '{role}'")]
    UnknownRole { id: String, role: String },

    /// No host matched the requested tag filter
    #[error("no hosts matched tags [{tags}]")]
    NoHostsMatched { tags: String },

    /// Host id not present in the inventory
    #[error("host '{id}' not found in inventory")]
    HostNotFound { id: String },

    /// Artifact path missing or unreadable
    #[error("artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    /// Artifact digest did not match the declared checksum
    #[error("artifact checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A step exhausted its retries or failed non-retryably
    #[error("step {step} failed on '{host}': {source}")]
    StepFailed {
        host: String,
        step: Step,
        source: TransportError,
    },

    /// Automatic rollback itself failed; no further remediation
    #[error("rollback failed on '{host}': {message}")]
    RollbackFailed { host: String, message: String },

    /// Rollback requested but no last-known-good release is recorded
    #[error("no last-known-good release recorded for '{host}'")]
    NoLastGood { host: String },

    /// State file exists but cannot be parsed
    #[error("state file corrupted at {path}: {message}")]
    StateCorrupted { path: PathBuf, message: String },

    /// Run cancelled by signal before completion
    #[error("run cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

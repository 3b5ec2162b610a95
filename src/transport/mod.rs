//! Transport abstraction
//!
//! "Copy files to a host" and "run a command on a host", with failures
//! classified so the executor can decide retry vs abort. The production
//! implementation shells out to rsync and ssh; tests substitute a scripted
//! in-memory transport.

mod ssh;

pub use ssh::{has_rsync, has_ssh, SshTransport};

use std::path::Path;
use std::time::Duration;

use crate::error::TransportError;
use crate::models::Host;

/// Output of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Remote-execution channel for one or more hosts.
///
/// Implementations must be safe to share across the executor's per-host
/// worker threads; each call owns its own connection.
pub trait Transport: Send + Sync {
    /// Copy `local_root`'s contents into `remote_path` on the host.
    ///
    /// `excludes` are gitignore-style patterns skipped during transfer.
    fn copy(
        &self,
        host: &Host,
        local_root: &Path,
        remote_path: &str,
        excludes: &[String],
    ) -> Result<(), TransportError>;

    /// Run a command on the host, killing it if `timeout` elapses.
    ///
    /// A nonzero exit is an `Ok(ExecOutput)` here; the caller decides
    /// whether that constitutes failure. `Err` means the command could not
    /// run to completion (unreachable, rejected, timed out).
    fn exec(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, TransportError>;
}

/// Quote a string for a remote POSIX shell.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

//! SSH/rsync transport
//!
//! Copies use rsync over ssh (single connection, delta transfer); commands
//! run through `ssh host 'cmd'`. ssh reserves exit status 255 for its own
//! failures, which is how connection and auth problems are told apart from
//! a command that merely exited nonzero.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::{ExecOutput, Transport};
use crate::error::TransportError;
use crate::models::Host;

/// Interval between child liveness polls while waiting on a deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Transport backed by the system's ssh and rsync binaries.
pub struct SshTransport {
    /// Extra ssh options (e.g. "-o BatchMode=yes"); applied to ssh and to
    /// rsync's remote shell
    ssh_options: Vec<String>,
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            // BatchMode keeps a misconfigured host from hanging on a
            // password prompt inside a worker thread.
            ssh_options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
        }
    }

    fn ssh_command(&self, host: &Host) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(&self.ssh_options);
        cmd.arg(host.ssh_target());
        cmd
    }

    fn remote_shell(&self) -> String {
        let mut shell = "ssh".to_string();
        for opt in &self.ssh_options {
            shell.push(' ');
            shell.push_str(opt);
        }
        shell
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SshTransport {
    fn copy(
        &self,
        host: &Host,
        local_root: &Path,
        remote_path: &str,
        excludes: &[String],
    ) -> Result<(), TransportError> {
        if !has_rsync() {
            return Err(TransportError::Unavailable(
                "rsync not found in PATH".to_string(),
            ));
        }

        // Trailing slash: copy the directory's contents, not the directory
        let mut cmd = Command::new("rsync");
        cmd.arg("-az")
            .arg("--delete")
            .arg("-e")
            .arg(self.remote_shell());
        for pattern in excludes {
            cmd.arg("--exclude").arg(pattern);
        }
        cmd.arg(format!("{}/", local_root.display()))
            .arg(format!("{}:{}", host.ssh_target(), remote_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransportError::Unavailable("rsync not found in PATH".to_string())
            } else {
                TransportError::Io(e)
            }
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_ssh_failure(
            &host.id,
            output.status.code().unwrap_or(-1),
            stderr,
        ))
    }

    fn exec(
        &self,
        host: &Host,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, TransportError> {
        let mut child = self
            .ssh_command(host)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TransportError::Unavailable("ssh not found in PATH".to_string())
                } else {
                    TransportError::Io(e)
                }
            })?;

        // Drain pipes on threads so a chatty child can't deadlock the poll
        let stdout_handle = child.stdout.take().map(spawn_reader);
        let stderr_handle = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(TransportError::Timeout {
                            host: host.id.clone(),
                            seconds: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let stdout = join_reader(stdout_handle);
        let stderr = join_reader(stderr_handle);
        let code = status.code().unwrap_or(-1);

        if code == 255 {
            return Err(classify_ssh_failure(&host.id, code, stderr));
        }

        Ok(ExecOutput {
            code,
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = pipe.read_to_string(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<std::thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
        .trim_end()
        .to_string()
}

/// Map an ssh/rsync failure to a transport error class.
///
/// ssh exits 255 on its own errors; rsync surfaces ssh failures as 255 and
/// protocol errors as 12/30. Auth rejections are recognized by stderr text
/// since ssh does not distinguish them by status.
fn classify_ssh_failure(host_id: &str, code: i32, stderr: String) -> TransportError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("host key verification failed")
    {
        TransportError::Auth {
            host: host_id.to_string(),
            message: stderr,
        }
    } else if code == 255 || lower.contains("connection") || lower.contains("could not resolve") {
        TransportError::Connection {
            host: host_id.to_string(),
            message: stderr,
        }
    } else {
        TransportError::CommandFailed {
            host: host_id.to_string(),
            code,
            stderr,
        }
    }
}

/// Check if rsync is available
pub fn has_rsync() -> bool {
    Command::new("rsync")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check if ssh is available
pub fn has_ssh() -> bool {
    Command::new("ssh")
        .arg("-V")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

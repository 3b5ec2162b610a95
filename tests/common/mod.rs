//! Common test utilities for Convoy scenario tests.
//!
//! Provides `FakeTransport`, a scripted in-memory transport: responses are
//! keyed by (host, command marker) and consumed in order, with the last
//! scripted response repeating. Unscripted calls succeed.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use convoy::config::Config;
use convoy::error::TransportError;
use convoy::models::Host;
use convoy::transport::{ExecOutput, Transport};

/// One scripted response for a matching command.
#[derive(Debug, Clone)]
pub enum Response {
    /// Exit 0
    Ok,
    /// Nonzero exit with stderr text (a real step failure, not retryable)
    Exit(i32, &'static str),
    /// Connection-class transport error (retryable)
    ConnectionError,
    /// Timeout-class transport error (retryable)
    TimeoutError,
}

struct Rule {
    host: String,
    marker: String,
    responses: VecDeque<Response>,
}

/// In-memory transport answering from a script.
#[derive(Default)]
pub struct FakeTransport {
    rules: Mutex<Vec<Rule>>,
    exec_log: Mutex<Vec<(String, String)>>,
    copy_log: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script responses for commands on `host` containing `marker`.
    ///
    /// Responses are consumed front to back; the final one repeats for
    /// any further matching calls.
    pub fn script(&self, host: &str, marker: &str, responses: Vec<Response>) {
        self.rules.lock().unwrap().push(Rule {
            host: host.to_string(),
            marker: marker.to_string(),
            responses: responses.into(),
        });
    }

    /// Every command executed, as (host, command) pairs in call order.
    pub fn exec_log(&self) -> Vec<(String, String)> {
        self.exec_log.lock().unwrap().clone()
    }

    /// Every copy performed, as (host, remote_path) pairs.
    pub fn copy_log(&self) -> Vec<(String, String)> {
        self.copy_log.lock().unwrap().clone()
    }

    fn next_response(&self, host: &str, command: &str) -> Response {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if rule.host == host && command.contains(&rule.marker) {
                return match rule.responses.len() {
                    0 => Response::Ok,
                    1 => rule.responses[0].clone(),
                    _ => rule.responses.pop_front().unwrap_or(Response::Ok),
                };
            }
        }
        Response::Ok
    }

    fn to_result(response: Response, host: &Host) -> Result<ExecOutput, TransportError> {
        match response {
            Response::Ok => Ok(ExecOutput {
                code: 0,
                stdout: "active".to_string(),
                stderr: String::new(),
            }),
            Response::Exit(code, stderr) => Ok(ExecOutput {
                code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
            Response::ConnectionError => Err(TransportError::Connection {
                host: host.id.clone(),
                message: "scripted: no route to host".to_string(),
            }),
            Response::TimeoutError => Err(TransportError::Timeout {
                host: host.id.clone(),
                seconds: 1,
            }),
        }
    }
}

impl Transport for FakeTransport {
    fn copy(
        &self,
        host: &Host,
        _local_root: &Path,
        remote_path: &str,
        _excludes: &[String],
    ) -> Result<(), TransportError> {
        self.copy_log
            .lock()
            .unwrap()
            .push((host.id.clone(), remote_path.to_string()));

        match Self::to_result(self.next_response(&host.id, "@sync"), host) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(TransportError::CommandFailed {
                host: host.id.clone(),
                code: output.code,
                stderr: output.stderr,
            }),
            Err(e) => Err(e),
        }
    }

    fn exec(
        &self,
        host: &Host,
        command: &str,
        _timeout: Duration,
    ) -> Result<ExecOutput, TransportError> {
        self.exec_log
            .lock()
            .unwrap()
            .push((host.id.clone(), command.to_string()));

        Self::to_result(self.next_response(&host.id, command), host)
    }
}

/// Three-host fleet with the standard app role and fast retries.
pub fn fleet_config(state_path: &Path, max_attempts: u32) -> Config {
    let toml = format!(
        r#"
[[hosts]]
id = "alpha"
address = "10.0.0.1"
role = "app"
tags = ["prod"]

[[hosts]]
id = "bravo"
address = "10.0.0.2"
role = "app"
tags = ["prod"]

[[hosts]]
id = "charlie"
address = "10.0.0.3"
role = "app"
tags = ["prod"]

[roles.app]
remote_path = "~/app"
install = "pip install -r requirements.txt"
activate = "sudo systemctl restart app"
verify = "systemctl is-active app"

[retry]
max_attempts = {max_attempts}
backoff_ms = 1
step_timeout_secs = 5

[state]
path = "{state}"
"#,
        state = state_path.display(),
    );
    toml::from_str(&toml).unwrap()
}

/// A minimal artifact tree to stage and deploy.
pub fn make_artifact(dir: &Path) {
    std::fs::create_dir_all(dir.join("lib")).unwrap();
    std::fs::write(dir.join("main.py"), "print('serving')\n").unwrap();
    std::fs::write(dir.join("lib/util.py"), "pass\n").unwrap();
    std::fs::write(dir.join("requirements.txt"), "requests\n").unwrap();
}

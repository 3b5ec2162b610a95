//! Plan executor
//!
//! Runs a plan against each host on its own worker thread. Steps execute
//! strictly in order per host; a failing step aborts the remaining steps
//! for that host only. Each step gets bounded retries with exponential
//! backoff for retryable transport errors. A failed deploy step triggers
//! automatic rollback to the last-known-good release unless disabled.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, RetryConfig, RoleConfig};
use crate::error::{ConvoyError, ConvoyResult, TransportError};
use crate::events::{EventSink, RunEvent};
use crate::models::{Host, HostPhase, Mode, Release, Step, StepOutcome};
use crate::planner::{plan_rollback, Plan};
use crate::recorder::StateRecorder;
use crate::release::{stage, StagedArtifact};
use crate::transport::Transport;

/// Ceiling on a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Final report for one host: terminal phase plus every step outcome.
#[derive(Debug)]
pub struct HostReport {
    pub host: String,
    pub phase: HostPhase,
    pub outcomes: Vec<StepOutcome>,
    /// Cause when the host did not reach its wanted phase cleanly:
    /// `StepFailed` for an aborted step (including one that was then
    /// rolled back), `RollbackFailed` when remediation itself failed,
    /// `Cancelled` on signal.
    pub error: Option<ConvoyError>,
}

/// Mapping from host to its ordered step outcomes, in plan order.
#[derive(Debug)]
pub struct RunReport {
    pub mode: Mode,
    pub hosts: Vec<HostReport>,
}

impl RunReport {
    pub fn count(&self, phase: HostPhase) -> usize {
        self.hosts.iter().filter(|h| h.phase == phase).count()
    }

    /// Exit-code policy: every host must reach Live (deploy) or
    /// RolledBack (rollback).
    pub fn all_succeeded(&self) -> bool {
        let wanted = match self.mode {
            Mode::Deploy => HostPhase::Live,
            Mode::Rollback => HostPhase::RolledBack,
        };
        self.hosts.iter().all(|h| h.phase == wanted)
    }
}

/// Executes plans over a transport, recording terminal transitions.
pub struct Executor<'a> {
    config: &'a Config,
    transport: &'a dyn Transport,
    recorder: &'a dyn StateRecorder,
    sink: &'a dyn EventSink,
    cancel: Arc<AtomicBool>,
    rollback_on_failure: bool,
}

impl<'a> Executor<'a> {
    pub fn new(
        config: &'a Config,
        transport: &'a dyn Transport,
        recorder: &'a dyn StateRecorder,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            config,
            transport,
            recorder,
            sink,
            cancel: Arc::new(AtomicBool::new(false)),
            rollback_on_failure: true,
        }
    }

    /// Disable automatic rollback on step failure (`--no-rollback`).
    pub fn rollback_on_failure(mut self, enabled: bool) -> Self {
        self.rollback_on_failure = enabled;
        self
    }

    /// Share a cancellation flag (flipped by the Ctrl-C handler).
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the plan against every host concurrently.
    ///
    /// Staging happens once, before any host is touched, so every host
    /// ships identical bytes and a bad artifact fails the whole run early.
    pub fn run(&self, plan: &Plan) -> ConvoyResult<RunReport> {
        let staged = if plan.steps.contains(&Step::Sync) {
            Some(stage(&plan.release, &self.config.sync.exclude)?)
        } else {
            None
        };

        self.sink.on_event(RunEvent::Started {
            mode: plan.mode,
            version: plan.release.version.clone(),
            host_count: plan.hosts.len(),
        });

        let reports = std::thread::scope(|scope| {
            let handles: Vec<_> = plan
                .hosts
                .iter()
                .map(|host| {
                    let staged = staged.as_ref();
                    scope.spawn(move || self.run_host(host, plan, staged))
                })
                .collect();

            handles
                .into_iter()
                .zip(plan.hosts.iter())
                .map(|(handle, host)| {
                    handle.join().unwrap_or_else(|_| HostReport {
                        host: host.id.clone(),
                        phase: HostPhase::Failed,
                        outcomes: vec![],
                        error: Some(ConvoyError::Io(std::io::Error::other(
                            "worker thread panicked",
                        ))),
                    })
                })
                .collect::<Vec<_>>()
        });

        let report = RunReport {
            mode: plan.mode,
            hosts: reports,
        };

        self.sink.on_event(RunEvent::Completed {
            live: report.count(HostPhase::Live),
            rolled_back: report.count(HostPhase::RolledBack),
            failed: report.count(HostPhase::Failed),
        });

        Ok(report)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn run_host(&self, host: &Host, plan: &Plan, staged: Option<&StagedArtifact>) -> HostReport {
        self.emit_phase(host, HostPhase::Pending);

        let role = match self.config.role_for(&host.id, &host.role) {
            Ok(role) => role,
            Err(e) => return self.finish_host(host, HostPhase::Failed, vec![], Some(e)),
        };

        let mut outcomes = Vec::with_capacity(plan.steps.len());

        for (index, step) in plan.steps.iter().enumerate() {
            if self.cancelled() {
                for remaining in &plan.steps[index..] {
                    outcomes.push(StepOutcome::skipped(*remaining, "run cancelled"));
                }
                return self.finish_host(
                    host,
                    HostPhase::Failed,
                    outcomes,
                    Some(ConvoyError::Cancelled),
                );
            }

            match self.run_step(host, role, &plan.release, *step, staged) {
                Ok(outcome) => outcomes.push(outcome),
                Err((outcome, error)) => {
                    outcomes.push(outcome);
                    for remaining in &plan.steps[index + 1..] {
                        outcomes.push(StepOutcome::skipped(
                            *remaining,
                            format!("aborted after {} failure", step),
                        ));
                    }
                    return self.handle_failure(host, plan, outcomes, *step, error);
                }
            }
        }

        // Every step (including the mandatory Verify) confirmed; only now
        // does the recorder learn about the new release.
        let phase = match plan.mode {
            Mode::Deploy => HostPhase::Live,
            Mode::Rollback => HostPhase::RolledBack,
        };
        if let Err(e) = self.recorder.record(&host.id, &plan.release, phase) {
            return self.finish_host(host, HostPhase::Failed, outcomes, Some(e));
        }
        self.finish_host(host, phase, outcomes, None)
    }

    /// A deploy step failed: roll the host back to last-known-good, unless
    /// rollback is disabled or this already was a rollback run.
    fn handle_failure(
        &self,
        host: &Host,
        plan: &Plan,
        mut outcomes: Vec<StepOutcome>,
        failed_step: Step,
        error: TransportError,
    ) -> HostReport {
        let cause = ConvoyError::StepFailed {
            host: host.id.clone(),
            step: failed_step,
            source: error,
        };

        if plan.mode == Mode::Rollback {
            return self.finish_host(
                host,
                HostPhase::Failed,
                outcomes,
                Some(ConvoyError::RollbackFailed {
                    host: host.id.clone(),
                    message: cause.to_string(),
                }),
            );
        }
        if !self.rollback_on_failure {
            return self.finish_host(host, HostPhase::Failed, outcomes, Some(cause));
        }

        let rollback = match plan_rollback(host.clone(), self.recorder) {
            Ok(rollback) => rollback,
            Err(e) => {
                return self.finish_host(
                    host,
                    HostPhase::Failed,
                    outcomes,
                    Some(ConvoyError::RollbackFailed {
                        host: host.id.clone(),
                        message: format!("{}; rollback impossible: {}", cause, e),
                    }),
                );
            }
        };

        let role = match self.config.role_for(&host.id, &host.role) {
            Ok(role) => role,
            Err(e) => return self.finish_host(host, HostPhase::Failed, outcomes, Some(e)),
        };

        for step in &rollback.steps {
            match self.run_step(host, role, &rollback.release, *step, None) {
                Ok(outcome) => outcomes.push(outcome),
                Err((outcome, rb_error)) => {
                    outcomes.push(outcome);
                    return self.finish_host(
                        host,
                        HostPhase::Failed,
                        outcomes,
                        Some(ConvoyError::RollbackFailed {
                            host: host.id.clone(),
                            message: format!("{}; {}", cause, rb_error),
                        }),
                    );
                }
            }
        }

        // Rollback's own Verify confirmed the previous release is live
        // again; only now does the recorder change.
        if let Err(e) = self
            .recorder
            .record(&host.id, &rollback.release, HostPhase::RolledBack)
        {
            return self.finish_host(host, HostPhase::Failed, outcomes, Some(e));
        }
        self.finish_host(host, HostPhase::RolledBack, outcomes, Some(cause))
    }

    fn emit_phase(&self, host: &Host, phase: HostPhase) {
        self.sink.on_event(RunEvent::PhaseChanged {
            host: host.id.clone(),
            phase,
        });
    }

    fn finish_host(
        &self,
        host: &Host,
        phase: HostPhase,
        outcomes: Vec<StepOutcome>,
        error: Option<ConvoyError>,
    ) -> HostReport {
        debug_assert!(phase.is_terminal());
        self.sink.on_event(RunEvent::HostFinished {
            host: host.id.clone(),
            phase,
        });
        HostReport {
            host: host.id.clone(),
            phase,
            outcomes,
            error,
        }
    }

    /// Run one step with the configured retry policy.
    ///
    /// Returns the outcome on success, or the failed outcome plus the
    /// final transport error once retries are exhausted.
    fn run_step(
        &self,
        host: &Host,
        role: &RoleConfig,
        release: &Release,
        step: Step,
        staged: Option<&StagedArtifact>,
    ) -> Result<StepOutcome, (StepOutcome, TransportError)> {
        self.emit_phase(host, HostPhase::for_step(step));

        let retry = &self.config.retry;
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.sink.on_event(RunEvent::StepStarted {
                host: host.id.clone(),
                step,
                attempt,
            });

            match self.attempt_step(host, role, release, step, staged) {
                Ok(()) => {
                    let outcome = StepOutcome::ok(step, attempt, started.elapsed());
                    self.emit_finished(&host.id, &outcome);
                    return Ok(outcome);
                }
                Err(error) => {
                    let retryable =
                        error.is_retryable() && attempt < retry.max_attempts && !self.cancelled();
                    if !retryable {
                        let outcome = StepOutcome::failed(
                            step,
                            attempt,
                            started.elapsed(),
                            error.to_string(),
                        );
                        self.emit_finished(&host.id, &outcome);
                        return Err((outcome, error));
                    }

                    let delay = backoff_delay(retry, attempt);
                    self.sink.on_event(RunEvent::StepRetried {
                        host: host.id.clone(),
                        step,
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: error.to_string(),
                    });
                    std::thread::sleep(delay);
                }
            }
        }
    }

    /// One attempt at one step; no retry logic here.
    fn attempt_step(
        &self,
        host: &Host,
        role: &RoleConfig,
        release: &Release,
        step: Step,
        staged: Option<&StagedArtifact>,
    ) -> Result<(), TransportError> {
        let remote_path = render(&role.remote_path, release);
        let timeout = Duration::from_secs(self.config.retry.step_timeout_secs);

        let command = match step {
            Step::Sync => {
                let Some(staged) = staged else {
                    return Err(TransportError::Unavailable(
                        "no staged artifact for sync".to_string(),
                    ));
                };
                return self.transport.copy(
                    host,
                    staged.path(),
                    &remote_path,
                    &self.config.sync.exclude,
                );
            }
            Step::Install => &role.install,
            // Rollback re-activates the previous release: same command,
            // rendered with the rolled-back-to version
            Step::Activate | Step::Rollback => &role.activate,
            Step::Verify => &role.verify,
        };

        // `~` must reach the remote shell unquoted for expansion
        let cd_target = if remote_path.starts_with('~') {
            remote_path.clone()
        } else {
            crate::transport::shell_quote(&remote_path)
        };
        let full = format!("cd {} && {}", cd_target, render(command, release));
        let output = self.transport.exec(host, &full, timeout)?;

        if output.success() {
            Ok(())
        } else {
            let detail = if output.stderr.is_empty() {
                output.stdout
            } else {
                output.stderr
            };
            Err(TransportError::CommandFailed {
                host: host.id.clone(),
                code: output.code,
                stderr: detail,
            })
        }
    }

    fn emit_finished(&self, host_id: &str, outcome: &StepOutcome) {
        self.sink.on_event(RunEvent::StepFinished {
            host: host_id.to_string(),
            step: outcome.step,
            status: outcome.status,
            attempts: outcome.attempts,
            duration_ms: outcome.duration.as_millis() as u64,
            detail: outcome.detail.clone(),
        });
    }
}

/// Substitute `{version}` and `{path}` placeholders in a command template.
fn render(template: &str, release: &Release) -> String {
    template
        .replace("{version}", &release.version)
        .replace("{path}", &release.artifact.display().to_string())
}

/// Exponential backoff: base * 2^(attempt-1), capped.
fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let ms = retry.backoff_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(ms).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::NullEventSink;
    use crate::models::StepStatus;
    use crate::planner::plan_deploy;
    use crate::recorder::TomlStateRecorder;
    use crate::transport::ExecOutput;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            backoff_ms: 500,
            step_timeout_secs: 60,
        };
        assert_eq!(backoff_delay(&retry, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&retry, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&retry, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&retry, 60), MAX_BACKOFF);
    }

    #[test]
    fn render_substitutes_placeholders() {
        let release = Release::new("1.4.2", "/srv/builds/1.4.2");
        assert_eq!(
            render("deploy {version} from {path}", &release),
            "deploy 1.4.2 from /srv/builds/1.4.2"
        );
        assert_eq!(render("no placeholders", &release), "no placeholders");
    }

    /// Transport that answers from a script keyed by "host:command-word".
    struct ScriptedTransport {
        exec_script: Mutex<HashMap<String, Vec<Result<ExecOutput, ()>>>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                exec_script: Mutex::new(HashMap::new()),
            }
        }

        fn script(&self, host: &str, word: &str, results: Vec<Result<ExecOutput, ()>>) {
            self.exec_script
                .lock()
                .unwrap()
                .insert(format!("{host}:{word}"), results);
        }

        fn ok() -> Result<ExecOutput, ()> {
            Ok(ExecOutput {
                code: 0,
                stdout: "ok".into(),
                stderr: String::new(),
            })
        }

        fn nonzero(code: i32, stderr: &str) -> Result<ExecOutput, ()> {
            Ok(ExecOutput {
                code,
                stdout: String::new(),
                stderr: stderr.into(),
            })
        }
    }

    impl Transport for ScriptedTransport {
        fn copy(
            &self,
            _host: &Host,
            _local_root: &Path,
            _remote_path: &str,
            _excludes: &[String],
        ) -> Result<(), TransportError> {
            Ok(())
        }

        fn exec(
            &self,
            host: &Host,
            command: &str,
            _timeout: Duration,
        ) -> Result<ExecOutput, TransportError> {
            let mut script = self.exec_script.lock().unwrap();
            for (key, results) in script.iter_mut() {
                let (key_host, word) = key.split_once(':').unwrap();
                if key_host == host.id && command.contains(word) && !results.is_empty() {
                    return match results.remove(0) {
                        Ok(output) => Ok(output),
                        Err(()) => Err(TransportError::Connection {
                            host: host.id.clone(),
                            message: "scripted connection failure".into(),
                        }),
                    };
                }
            }
            // Unscripted commands succeed
            Ok(ExecOutput {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn test_config() -> Config {
        toml::from_str(
            r#"
[[hosts]]
id = "web-1"
address = "10.0.0.1"
role = "app"

[roles.app]
remote_path = "~/app"
install = "install-deps"
activate = "restart-svc"
verify = "check-svc"

[retry]
max_attempts = 3
backoff_ms = 1
step_timeout_secs = 5
"#,
        )
        .unwrap()
    }

    fn host(config: &Config) -> Host {
        crate::inventory::resolve(config).unwrap().remove(0)
    }

    fn release_with_artifact(dir: &Path) -> Release {
        std::fs::write(dir.join("main.py"), "app").unwrap();
        Release::new("2.0.0", dir)
    }

    #[test]
    fn deploy_happy_path_records_live() {
        let dir = tempdir().unwrap();
        let config = test_config();
        let transport = ScriptedTransport::new();
        let recorder = TomlStateRecorder::new(dir.path().join("state.toml"));
        let sink = NullEventSink;

        let artifact = tempdir().unwrap();
        let release = release_with_artifact(artifact.path());
        let plan = plan_deploy(release, vec![host(&config)]);

        let executor = Executor::new(&config, &transport, &recorder, &sink);
        let report = executor.run(&plan).unwrap();

        assert_eq!(report.hosts[0].phase, HostPhase::Live);
        assert!(report.all_succeeded());
        assert_eq!(
            recorder.last_good("web-1").unwrap().unwrap().version,
            "2.0.0"
        );
        let statuses: Vec<StepStatus> =
            report.hosts[0].outcomes.iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![StepStatus::Ok; 4]);
    }

    #[test]
    fn retryable_failure_recovers_within_bound() {
        let dir = tempdir().unwrap();
        let config = test_config();
        let transport = ScriptedTransport::new();
        // Install: two connection failures, then success (bound is 3)
        transport.script(
            "web-1",
            "install-deps",
            vec![Err(()), Err(()), ScriptedTransport::ok()],
        );
        let recorder = TomlStateRecorder::new(dir.path().join("state.toml"));
        let sink = NullEventSink;

        let artifact = tempdir().unwrap();
        let plan = plan_deploy(release_with_artifact(artifact.path()), vec![host(&config)]);

        let executor = Executor::new(&config, &transport, &recorder, &sink);
        let report = executor.run(&plan).unwrap();

        assert_eq!(report.hosts[0].phase, HostPhase::Live);
        let install = &report.hosts[0].outcomes[1];
        assert_eq!(install.step, Step::Install);
        assert_eq!(install.attempts, 3);
    }

    #[test]
    fn nonzero_exit_is_not_retried() {
        let dir = tempdir().unwrap();
        let config = test_config();
        let transport = ScriptedTransport::new();
        transport.script(
            "web-1",
            "install-deps",
            vec![ScriptedTransport::nonzero(1, "pip failed")],
        );
        let recorder = TomlStateRecorder::new(dir.path().join("state.toml"));
        let sink = NullEventSink;

        let artifact = tempdir().unwrap();
        let plan = plan_deploy(release_with_artifact(artifact.path()), vec![host(&config)]);

        let executor = Executor::new(&config, &transport, &recorder, &sink).rollback_on_failure(false);
        let report = executor.run(&plan).unwrap();

        assert_eq!(report.hosts[0].phase, HostPhase::Failed);
        let install = &report.hosts[0].outcomes[1];
        assert_eq!(install.attempts, 1);
        assert_eq!(install.status, StepStatus::Failed);
        // Activate and Verify never ran
        assert_eq!(report.hosts[0].outcomes[2].status, StepStatus::Skipped);
        assert_eq!(report.hosts[0].outcomes[3].status, StepStatus::Skipped);
        // The report carries the failure as a typed step error
        assert!(matches!(
            report.hosts[0].error,
            Some(ConvoyError::StepFailed {
                step: Step::Install,
                ..
            })
        ));
    }

    #[test]
    fn cancelled_run_skips_all_steps_and_records_nothing() {
        let dir = tempdir().unwrap();
        let config = test_config();
        let transport = ScriptedTransport::new();
        let recorder = TomlStateRecorder::new(dir.path().join("state.toml"));
        let sink = NullEventSink;

        let artifact = tempdir().unwrap();
        let plan = plan_deploy(release_with_artifact(artifact.path()), vec![host(&config)]);

        let cancel = Arc::new(AtomicBool::new(true));
        let executor =
            Executor::new(&config, &transport, &recorder, &sink).with_cancel_flag(cancel);
        let report = executor.run(&plan).unwrap();

        assert_eq!(report.hosts[0].phase, HostPhase::Failed);
        assert!(report.hosts[0]
            .outcomes
            .iter()
            .all(|o| o.status == StepStatus::Skipped));
        assert!(matches!(report.hosts[0].error, Some(ConvoyError::Cancelled)));
        assert_eq!(recorder.state("web-1").unwrap(), None);
    }
}

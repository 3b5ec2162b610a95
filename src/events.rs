//! Structured run events
//!
//! Every step emits an outcome event (host, step, status, duration) so CI
//! and humans can follow a run. `JsonEventSink` writes NDJSON to stdout for
//! `--json`; `ConsoleEventSink` prints one line per event, gated by
//! verbosity. Sinks are shared across the executor's worker threads.

use std::io::{self, Write};
use std::sync::Mutex;

use crate::models::{HostPhase, Mode, Step, StepStatus};

/// A structured event emitted during a run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Started {
        mode: Mode,
        version: String,
        host_count: usize,
    },
    /// A host entered a new phase of its state machine.
    PhaseChanged {
        host: String,
        phase: HostPhase,
    },
    StepStarted {
        host: String,
        step: Step,
        attempt: u32,
    },
    StepRetried {
        host: String,
        step: Step,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    StepFinished {
        host: String,
        step: Step,
        status: StepStatus,
        attempts: u32,
        duration_ms: u64,
        detail: Option<String>,
    },
    HostFinished {
        host: String,
        phase: HostPhase,
    },
    Completed {
        live: usize,
        rolled_back: usize,
        failed: usize,
    },
}

/// Receiver for run events. Implementations must tolerate being called
/// from multiple worker threads at once.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: RunEvent);
}

/// Discards everything; used by dry runs and tests.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn on_event(&self, _event: RunEvent) {}
}

fn mode_str(mode: Mode) -> &'static str {
    match mode {
        Mode::Deploy => "deploy",
        Mode::Rollback => "rollback",
    }
}

fn status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Ok => "ok",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
    }
}

/// Event sink that outputs NDJSON events
pub struct JsonEventSink {
    /// Mutex to ensure thread-safe writes
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonEventSink {
    /// Create a new JSON event sink writing to stdout
    pub fn stdout() -> Self {
        Self {
            writer: Mutex::new(Box::new(io::stdout())),
        }
    }

    /// Create a JSON event sink writing to a custom writer (for testing)
    pub fn with_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    fn write_event(&self, event: serde_json::Value) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", event);
            let _ = writer.flush();
        }
    }
}

impl EventSink for JsonEventSink {
    fn on_event(&self, event: RunEvent) {
        let json = match event {
            RunEvent::Started {
                mode,
                version,
                host_count,
            } => serde_json::json!({
                "event": "start",
                "mode": mode_str(mode),
                "release": version,
                "hosts": host_count,
            }),

            RunEvent::PhaseChanged { host, phase } => serde_json::json!({
                "event": "phase",
                "host": host,
                "phase": phase.to_string(),
            }),

            RunEvent::StepStarted {
                host,
                step,
                attempt,
            } => serde_json::json!({
                "event": "step_start",
                "host": host,
                "step": step.to_string(),
                "attempt": attempt,
            }),

            RunEvent::StepRetried {
                host,
                step,
                attempt,
                delay_ms,
                error,
            } => serde_json::json!({
                "event": "step_retry",
                "host": host,
                "step": step.to_string(),
                "attempt": attempt,
                "delay_ms": delay_ms,
                "error": error,
            }),

            RunEvent::StepFinished {
                host,
                step,
                status,
                attempts,
                duration_ms,
                detail,
            } => serde_json::json!({
                "event": "step_finish",
                "host": host,
                "step": step.to_string(),
                "status": status_str(status),
                "attempts": attempts,
                "duration_ms": duration_ms,
                "detail": detail,
            }),

            RunEvent::HostFinished { host, phase } => serde_json::json!({
                "event": "host_finish",
                "host": host,
                "phase": phase.to_string(),
            }),

            RunEvent::Completed {
                live,
                rolled_back,
                failed,
            } => {
                let status = if failed == 0 { "success" } else { "partial" };
                serde_json::json!({
                    "event": "complete",
                    "status": status,
                    "live": live,
                    "rolled_back": rolled_back,
                    "failed": failed,
                })
            }
        };

        self.write_event(json);
    }
}

/// Human-readable event sink; step-level detail appears with `-v`.
pub struct ConsoleEventSink {
    verbose: u8,
}

impl ConsoleEventSink {
    pub fn new(verbose: u8) -> Self {
        Self { verbose }
    }
}

impl EventSink for ConsoleEventSink {
    fn on_event(&self, event: RunEvent) {
        match event {
            RunEvent::Started {
                mode,
                version,
                host_count,
            } => {
                println!(
                    "{} release {} to {} host(s)",
                    mode_str(mode),
                    version,
                    host_count
                );
            }
            RunEvent::PhaseChanged { host, phase } => {
                if self.verbose >= 2 {
                    println!("  [{}] phase {}", host, phase);
                }
            }
            RunEvent::StepStarted {
                host,
                step,
                attempt,
            } => {
                if self.verbose >= 2 {
                    println!("  [{}] {} (attempt {})", host, step, attempt);
                }
            }
            RunEvent::StepRetried {
                host,
                step,
                attempt,
                delay_ms,
                error,
            } => {
                println!(
                    "  [{}] {} attempt {} failed, retrying in {}ms: {}",
                    host, step, attempt, delay_ms, error
                );
            }
            RunEvent::StepFinished {
                host,
                step,
                status,
                duration_ms,
                detail,
                ..
            } => {
                if self.verbose >= 1 || status == StepStatus::Failed {
                    match detail {
                        Some(detail) if status != StepStatus::Ok => {
                            println!(
                                "  [{}] {} {} ({}ms): {}",
                                host,
                                step,
                                status_str(status),
                                duration_ms,
                                detail
                            );
                        }
                        _ => println!(
                            "  [{}] {} {} ({}ms)",
                            host,
                            step,
                            status_str(status),
                            duration_ms
                        ),
                    }
                }
            }
            RunEvent::HostFinished { host, phase } => {
                println!("  [{}] -> {}", host, phase);
            }
            RunEvent::Completed {
                live,
                rolled_back,
                failed,
            } => {
                println!(
                    "done: {} live, {} rolled back, {} failed",
                    live, rolled_back, failed
                );
            }
        }
    }
}

//! Convoy - deployment orchestrator
//!
//! Convoy rolls a versioned, already-built artifact out to a set of hosts
//! over ssh/rsync in discrete retryable steps (sync, install, activate,
//! verify), with per-host failure isolation, automatic rollback to the
//! last-known-good release, and persisted per-host state.

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod inventory;
pub mod models;
pub mod planner;
pub mod recorder;
pub mod release;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use error::{ConvoyError, ConvoyResult, TransportError};
pub use events::{ConsoleEventSink, EventSink, JsonEventSink, RunEvent};
pub use executor::{Executor, HostReport, RunReport};
pub use models::{Host, HostPhase, HostState, Mode, Release, Step, StepOutcome, StepStatus};
pub use planner::{plan_deploy, plan_rollback, Plan};
pub use recorder::{StateRecorder, TomlStateRecorder};
pub use transport::{ExecOutput, SshTransport, Transport};

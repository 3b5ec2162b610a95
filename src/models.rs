//! Core data models for Convoy
//!
//! Defines the fundamental data structures used throughout Convoy:
//! - `Host`: a deploy target resolved from the inventory
//! - `Release`: a versioned artifact with an optional checksum
//! - `Step`/`StepOutcome`: the unit of remote work and its result
//! - `HostPhase`: the per-host deployment state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A deploy target resolved from the inventory.
///
/// Immutable once loaded; recreated each run. The `user` field is a
/// credentials reference only - key material is ssh's problem, not ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Unique identifier (inventory key, used in state records and events)
    pub id: String,

    /// Network address (hostname or IP)
    pub address: String,

    /// Remote user; empty means whatever ssh config resolves
    pub user: Option<String>,

    /// Role tag selecting the install/activate/verify commands
    pub role: String,

    /// Free-form tags for `--hosts` filtering
    pub tags: Vec<String>,
}

impl Host {
    /// The ssh destination string ("user@address" or bare address).
    pub fn ssh_target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

/// A versioned, already-built artifact. One Release is active per host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Version identifier (e.g. "1.4.2" or a git sha)
    pub version: String,

    /// Local artifact directory to sync
    pub artifact: PathBuf,

    /// Expected digest, "sha256:<hex>" form; verified before deploy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Release {
    pub fn new(version: impl Into<String>, artifact: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            artifact: artifact.into(),
            checksum: None,
        }
    }
}

/// One unit of remote work within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Copy the artifact tree to the host
    Sync,
    /// Install dependencies on the host
    Install,
    /// Switch the host to the new release (restart the service)
    Activate,
    /// Independently confirm the release is live - never skippable
    Verify,
    /// Re-activate the previous release
    Rollback,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Sync => "sync",
            Step::Install => "install",
            Step::Activate => "activate",
            Step::Verify => "verify",
            Step::Rollback => "rollback",
        };
        write!(f, "{}", s)
    }
}

/// Outcome status for a completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

/// Result of running one step on one host.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: Step,
    pub status: StepStatus,
    /// Attempts actually made (1 = succeeded first try)
    pub attempts: u32,
    pub duration: Duration,
    /// Error text on failure, skip reason on skip
    pub detail: Option<String>,
}

impl StepOutcome {
    pub fn ok(step: Step, attempts: u32, duration: Duration) -> Self {
        Self {
            step,
            status: StepStatus::Ok,
            attempts,
            duration,
            detail: None,
        }
    }

    pub fn failed(
        step: Step,
        attempts: u32,
        duration: Duration,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            step,
            status: StepStatus::Failed,
            attempts,
            duration,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(step: Step, reason: impl Into<String>) -> Self {
        Self {
            step,
            status: StepStatus::Skipped,
            attempts: 0,
            duration: Duration::ZERO,
            detail: Some(reason.into()),
        }
    }
}

/// Per-host deployment state machine.
///
/// `Pending -> Syncing -> Installing -> Activating -> Verifying ->
/// {Live | RollingBack -> RolledBack | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPhase {
    Pending,
    Syncing,
    Installing,
    Activating,
    Verifying,
    RollingBack,
    Live,
    RolledBack,
    Failed,
}

impl HostPhase {
    /// Terminal phases end a host's run; nothing executes after them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HostPhase::Live | HostPhase::RolledBack | HostPhase::Failed
        )
    }

    /// The phase a host enters while running a given step.
    pub fn for_step(step: Step) -> Self {
        match step {
            Step::Sync => HostPhase::Syncing,
            Step::Install => HostPhase::Installing,
            Step::Activate => HostPhase::Activating,
            Step::Verify => HostPhase::Verifying,
            Step::Rollback => HostPhase::RollingBack,
        }
    }
}

impl fmt::Display for HostPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostPhase::Pending => "pending",
            HostPhase::Syncing => "syncing",
            HostPhase::Installing => "installing",
            HostPhase::Activating => "activating",
            HostPhase::Verifying => "verifying",
            HostPhase::RollingBack => "rolling-back",
            HostPhase::Live => "live",
            HostPhase::RolledBack => "rolled-back",
            HostPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// What a run is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Deploy,
    Rollback,
}

/// Persisted per-host record of what is (and was) running.
///
/// Mutated only by the state recorder, and only after a terminal
/// transition. `current` reflects reality only once Activate succeeded and
/// Verify confirmed it; until then the prior release stays authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostState {
    /// Release currently active on the host
    pub current: Release,

    /// Most recent release that reached Live (rollback target)
    pub last_good: Release,

    /// When this record was last written
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_ssh_target_with_user() {
        let host = Host {
            id: "web-1".into(),
            address: "10.0.0.5".into(),
            user: Some("deploy".into()),
            role: "app".into(),
            tags: vec![],
        };
        assert_eq!(host.ssh_target(), "deploy@10.0.0.5");
    }

    #[test]
    fn test_host_ssh_target_without_user() {
        let host = Host {
            id: "web-1".into(),
            address: "web-1.example.com".into(),
            user: None,
            role: "app".into(),
            tags: vec![],
        };
        assert_eq!(host.ssh_target(), "web-1.example.com");
    }

    #[test]
    fn test_step_display_lowercase() {
        assert_eq!(Step::Sync.to_string(), "sync");
        assert_eq!(Step::Install.to_string(), "install");
        assert_eq!(Step::Activate.to_string(), "activate");
        assert_eq!(Step::Verify.to_string(), "verify");
        assert_eq!(Step::Rollback.to_string(), "rollback");
    }

    #[test]
    fn test_phase_for_step() {
        assert_eq!(HostPhase::for_step(Step::Sync), HostPhase::Syncing);
        assert_eq!(HostPhase::for_step(Step::Verify), HostPhase::Verifying);
        assert_eq!(HostPhase::for_step(Step::Rollback), HostPhase::RollingBack);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(HostPhase::Live.is_terminal());
        assert!(HostPhase::RolledBack.is_terminal());
        assert!(HostPhase::Failed.is_terminal());
        assert!(!HostPhase::Pending.is_terminal());
        assert!(!HostPhase::Verifying.is_terminal());
        assert!(!HostPhase::RollingBack.is_terminal());
    }

    #[test]
    fn test_release_serde_roundtrip() {
        let release = Release {
            version: "1.4.2".into(),
            artifact: PathBuf::from("/srv/builds/1.4.2"),
            checksum: Some("sha256:abc123".into()),
        };
        let toml = toml::to_string(&release).unwrap();
        let back: Release = toml::from_str(&toml).unwrap();
        assert_eq!(release, back);
    }

    #[test]
    fn test_release_checksum_defaults_none() {
        let release: Release = toml::from_str(
            r#"
version = "2.0.0"
artifact = "/srv/builds/2.0.0"
"#,
        )
        .unwrap();
        assert_eq!(release.checksum, None);
    }

    #[test]
    fn test_step_outcome_constructors() {
        let ok = StepOutcome::ok(Step::Sync, 1, Duration::from_millis(120));
        assert_eq!(ok.status, StepStatus::Ok);
        assert!(ok.detail.is_none());

        let failed = StepOutcome::failed(Step::Verify, 3, Duration::from_secs(2), "not active");
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.detail.as_deref(), Some("not active"));

        let skipped = StepOutcome::skipped(Step::Install, "aborted after sync failure");
        assert_eq!(skipped.status, StepStatus::Skipped);
        assert_eq!(skipped.attempts, 0);
    }
}

//! Release planner
//!
//! Computes the ordered execution plan for a run. Deploy is always
//! Sync -> Install -> Activate -> Verify; rollback is Rollback (activate
//! the previous release) -> Verify. Verify is mandatory in both: a release
//! is never considered live until independently confirmed.

use crate::error::{ConvoyError, ConvoyResult};
use crate::models::{Host, Mode, Release, Step};
use crate::recorder::StateRecorder;

/// An ordered sequence of steps bound to a release and a set of hosts.
///
/// Created per invocation, discarded after execution. The same step
/// sequence applies to every host; hosts execute it independently.
#[derive(Debug, Clone)]
pub struct Plan {
    pub mode: Mode,
    pub release: Release,
    pub hosts: Vec<Host>,
    pub steps: Vec<Step>,
}

impl Plan {
    /// Human-readable step listing, for --dry-run output.
    pub fn describe(&self) -> String {
        let steps: Vec<String> = self.steps.iter().map(|s| s.to_string()).collect();
        let hosts: Vec<&str> = self.hosts.iter().map(|h| h.id.as_str()).collect();
        format!(
            "release {} -> [{}]: {}",
            self.release.version,
            hosts.join(", "),
            steps.join(" -> ")
        )
    }
}

/// Plan a deploy of `release` to `hosts`.
pub fn plan_deploy(release: Release, hosts: Vec<Host>) -> Plan {
    Plan {
        mode: Mode::Deploy,
        release,
        hosts,
        steps: vec![Step::Sync, Step::Install, Step::Activate, Step::Verify],
    }
}

/// Plan a rollback of one host to its last-known-good release.
///
/// Fails with `NoLastGood` if the recorder has nothing for this host.
pub fn plan_rollback(host: Host, recorder: &dyn StateRecorder) -> ConvoyResult<Plan> {
    let release = recorder
        .last_good(&host.id)?
        .ok_or_else(|| ConvoyError::NoLastGood {
            host: host.id.clone(),
        })?;

    Ok(Plan {
        mode: Mode::Rollback,
        release,
        hosts: vec![host],
        steps: vec![Step::Rollback, Step::Verify],
    })
}

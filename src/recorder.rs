//! State recorder
//!
//! Persists the last-known-good release per host so rollback has a target.
//! Storage is a single TOML file keyed by host id. Mutations happen under
//! an exclusive file lock with a read-modify-write cycle and land via
//! write-to-temp-then-rename; reads take a shared lock. The executor's
//! per-host worker threads can therefore record and plan rollbacks
//! concurrently without ever observing a half-written file.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{ConvoyError, ConvoyResult};
use crate::models::{HostPhase, HostState, Release};

/// Read/write access to persisted per-host deployment state.
pub trait StateRecorder: Send + Sync {
    /// Record a terminal transition for a host.
    ///
    /// Called only on entry into Live or RolledBack, after the final step
    /// fully completed; any other phase is not persisted.
    fn record(&self, host_id: &str, release: &Release, phase: HostPhase) -> ConvoyResult<()>;

    /// The most recent release that reached Live on this host.
    fn last_good(&self, host_id: &str) -> ConvoyResult<Option<Release>>;

    /// The full recorded state for a host, if any.
    fn state(&self, host_id: &str) -> ConvoyResult<Option<HostState>>;

    /// All recorded host states, keyed by host id.
    fn all(&self) -> ConvoyResult<BTreeMap<String, HostState>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StateFile {
    #[serde(default = "default_version")]
    version: u32,

    #[serde(default)]
    hosts: BTreeMap<String, HostState>,
}

fn default_version() -> u32 {
    1
}

/// TOML-file state recorder, the only production implementation.
pub struct TomlStateRecorder {
    path: PathBuf,
}

impl TomlStateRecorder {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn load(&self) -> ConvoyResult<StateFile> {
        if !self.path.exists() {
            return Ok(StateFile {
                version: 1,
                hosts: BTreeMap::new(),
            });
        }

        let content = fs::read_to_string(&self.path)?;
        toml::from_str(&content).map_err(|e| ConvoyError::StateCorrupted {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn save(&self, state: &StateFile) -> ConvoyResult<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let content = toml::to_string_pretty(state).map_err(|e| ConvoyError::Config {
            message: format!("cannot serialize state: {}", e),
        })?;

        // Temp file in the same directory, renamed over the state file, so
        // a reader sees either the old contents or the new - never a
        // truncated file, even if we crash mid-write.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| ConvoyError::Io(e.error))?;
        Ok(())
    }

    fn lock_handle(&self) -> ConvoyResult<fs::File> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::File::create(&lock_path)?)
    }

    /// Run `f` over the state file under an exclusive lock.
    fn with_lock<T>(&self, f: impl FnOnce(&Self) -> ConvoyResult<T>) -> ConvoyResult<T> {
        let lock_file = self.lock_handle()?;
        lock_file.lock_exclusive()?;

        let result = f(self);

        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    /// Run `f` over the state file under a shared lock; readers may
    /// overlap each other but never an in-progress `record`.
    fn with_shared_lock<T>(&self, f: impl FnOnce(&Self) -> ConvoyResult<T>) -> ConvoyResult<T> {
        let lock_file = self.lock_handle()?;
        lock_file.lock_shared()?;

        let result = f(self);

        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }
}

impl StateRecorder for TomlStateRecorder {
    fn record(&self, host_id: &str, release: &Release, phase: HostPhase) -> ConvoyResult<()> {
        match phase {
            HostPhase::Live | HostPhase::RolledBack => {}
            // Non-terminal phases are never persisted; the prior release
            // stays authoritative until Verify confirms the new one.
            _ => return Ok(()),
        }

        self.with_lock(|recorder| {
            let mut state = recorder.load()?;

            let entry = match (phase, state.hosts.remove(host_id)) {
                // Live: the release becomes both current and last-good
                (HostPhase::Live, _) => HostState {
                    current: release.clone(),
                    last_good: release.clone(),
                    updated_at: Utc::now(),
                },
                // RolledBack: current reverts; last_good is unchanged
                // (the rolled-back-to release was already last-good)
                (_, Some(prev)) => HostState {
                    current: release.clone(),
                    last_good: prev.last_good,
                    updated_at: Utc::now(),
                },
                (_, None) => HostState {
                    current: release.clone(),
                    last_good: release.clone(),
                    updated_at: Utc::now(),
                },
            };

            state.hosts.insert(host_id.to_string(), entry);
            recorder.save(&state)
        })
    }

    fn last_good(&self, host_id: &str) -> ConvoyResult<Option<Release>> {
        self.with_shared_lock(|recorder| {
            Ok(recorder
                .load()?
                .hosts
                .get(host_id)
                .map(|s| s.last_good.clone()))
        })
    }

    fn state(&self, host_id: &str) -> ConvoyResult<Option<HostState>> {
        self.with_shared_lock(|recorder| Ok(recorder.load()?.hosts.get(host_id).cloned()))
    }

    fn all(&self) -> ConvoyResult<BTreeMap<String, HostState>> {
        self.with_shared_lock(|recorder| Ok(recorder.load()?.hosts))
    }
}

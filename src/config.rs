//! Configuration module for Convoy
//!
//! A single static TOML file (default `convoy.toml`) enumerates hosts,
//! per-role command sets, sync exclusions, the retry policy, and the state
//! file location. Environment overrides use the CONVOY_* prefix.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConvoyError, ConvoyResult};

/// One `[[hosts]]` entry in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub id: String,

    pub address: String,

    #[serde(default)]
    pub user: Option<String>,

    pub role: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// Command set for a role (`[roles.<name>]`).
///
/// Commands run on the remote host through the transport; `{version}` and
/// `{path}` placeholders are substituted before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Remote directory the artifact syncs into
    #[serde(default = "default_remote_path")]
    pub remote_path: String,

    #[serde(default = "default_install_command")]
    pub install: String,

    #[serde(default = "default_activate_command")]
    pub activate: String,

    #[serde(default = "default_verify_command")]
    pub verify: String,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            remote_path: default_remote_path(),
            install: default_install_command(),
            activate: default_activate_command(),
            verify: default_verify_command(),
        }
    }
}

fn default_remote_path() -> String {
    "~/app".to_string()
}

fn default_install_command() -> String {
    "python3 -m venv venv && venv/bin/pip install -r requirements.txt".to_string()
}

fn default_activate_command() -> String {
    "sudo systemctl restart app".to_string()
}

fn default_verify_command() -> String {
    "systemctl is-active app".to_string()
}

/// Sync configuration (`[sync]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Glob patterns excluded from artifact staging
    #[serde(default = "default_excludes")]
    pub exclude: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            exclude: default_excludes(),
        }
    }
}

fn default_excludes() -> Vec<String> {
    vec![
        ".git".to_string(),
        "__pycache__".to_string(),
        "*.pyc".to_string(),
        ".env".to_string(),
        "venv".to_string(),
    ]
}

/// Retry and timeout policy (`[retry]`), applied per step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per step (1 = no retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff; doubles each retry
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Deadline for a single remote command
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_step_timeout_secs() -> u64 {
    120
}

/// State recorder configuration (`[state]`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateConfig {
    /// Override for the state file path (default `~/.convoy/state.toml`)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub hosts: Vec<HostEntry>,

    #[serde(default)]
    pub roles: HashMap<String, RoleConfig>,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub state: StateConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> ConvoyResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConvoyError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConvoyError::Config {
            message: format!("invalid TOML in {}: {}", path.display(), e),
        })?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides (CONVOY_* prefix)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("CONVOY_STATE_PATH") {
            if !val.is_empty() {
                self.state.path = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("CONVOY_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse::<u32>() {
                if n >= 1 {
                    self.retry.max_attempts = n;
                }
            }
        }

        if let Ok(val) = std::env::var("CONVOY_STEP_TIMEOUT_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                self.retry.step_timeout_secs = n;
            }
        }

        self
    }

    /// Resolve the state file path: config override, then `~/.convoy/`.
    pub fn state_path(&self) -> PathBuf {
        if let Some(path) = &self.state.path {
            return path.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".convoy")
            .join("state.toml")
    }

    /// The role config for a host, or an error naming the host.
    pub fn role_for(&self, host_id: &str, role: &str) -> ConvoyResult<&RoleConfig> {
        self.roles.get(role).ok_or_else(|| ConvoyError::UnknownRole {
            id: host_id.to_string(),
            role: role.to_string(),
        })
    }
}

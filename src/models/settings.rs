use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime settings of the driver itself (not of the pipeline).
///
/// Loaded by [`ConfigManager::load_driver_settings`](crate::config::ConfigManager::load_driver_settings)
/// from an optional `driver.yaml` plus `UPSCALE_DRIVER__*` environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverSettings {
    #[serde(default)]
    pub workspace: WorkspacePolicy,

    #[serde(default)]
    pub logging: LogSettings,
}

/// What to do when the stale workspace cannot be removed for lack of permission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Warn and keep going with whatever is left on disk.
    #[default]
    Lenient,
    /// Fail the job before the pipeline starts.
    Strict,
}

/// Bounds for the "wait until the deleted workspace is really gone" poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspacePolicy {
    #[serde(default = "default_deletion_timeout_ms")]
    pub deletion_timeout_ms: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default)]
    pub permission_policy: PermissionPolicy,
}

const MIN_BACKOFF_MS: u64 = 1;

impl WorkspacePolicy {
    pub fn deletion_timeout(&self) -> Duration {
        Duration::from_millis(self.deletion_timeout_ms)
    }

    /// First poll delay, at least 1 ms so doubling always makes progress
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.max(MIN_BACKOFF_MS))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(
            self.max_backoff_ms
                .max(self.initial_backoff_ms)
                .max(MIN_BACKOFF_MS),
        )
    }
}

impl Default for WorkspacePolicy {
    fn default() -> Self {
        Self {
            deletion_timeout_ms: default_deletion_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            permission_policy: PermissionPolicy::default(),
        }
    }
}

fn default_deletion_timeout_ms() -> u64 {
    30_000
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_true")]
    pub console: bool,

    #[serde(default)]
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            debug: false,
            console: true,
            json: false,
        }
    }
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_true() -> bool {
    true
}

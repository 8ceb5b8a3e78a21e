//! Recorder configuration. Values come from `./snaptrail.yaml`, then
//! `~/.snaptrail/config.yaml`, then defaults; every field has a serde default
//! so partial files work.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    /// Folder under the host's download root that receives all artifacts.
    #[serde(default = "default_root_folder")]
    pub root_folder: String,

    /// Dormancy window after which an active session auto-ends.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Per-page delivery window for session state pushes.
    #[serde(default = "default_state_push_timeout_ms")]
    pub state_push_timeout_ms: u64,

    /// Per-page delivery window for force-end pushes.
    #[serde(default = "default_force_end_timeout_ms")]
    pub force_end_timeout_ms: u64,

    /// Settle time between overlay injection and capture.
    #[serde(default = "default_overlay_settle_ms")]
    pub overlay_settle_ms: u64,

    /// Settle time after the overlay retry injection.
    #[serde(default = "default_overlay_retry_ms")]
    pub overlay_retry_ms: u64,

    /// How long the overlay stays visible after the capture.
    #[serde(default = "default_overlay_linger_ms")]
    pub overlay_linger_ms: u64,

    /// Route artifacts under `<root>/test/` instead of `<root>/`.
    #[serde(default)]
    pub test_capture_mode: bool,
}

fn default_root_folder() -> String {
    "SnapTrail".to_string()
}

fn default_idle_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_state_push_timeout_ms() -> u64 {
    2000
}

fn default_force_end_timeout_ms() -> u64 {
    3000
}

fn default_overlay_settle_ms() -> u64 {
    1500
}

fn default_overlay_retry_ms() -> u64 {
    800
}

fn default_overlay_linger_ms() -> u64 {
    1500
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            root_folder: default_root_folder(),
            idle_timeout_ms: default_idle_timeout_ms(),
            state_push_timeout_ms: default_state_push_timeout_ms(),
            force_end_timeout_ms: default_force_end_timeout_ms(),
            overlay_settle_ms: default_overlay_settle_ms(),
            overlay_retry_ms: default_overlay_retry_ms(),
            overlay_linger_ms: default_overlay_linger_ms(),
            test_capture_mode: false,
        }
    }
}

impl RecorderConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn state_push_timeout(&self) -> Duration {
        Duration::from_millis(self.state_push_timeout_ms)
    }

    pub fn force_end_timeout(&self) -> Duration {
        Duration::from_millis(self.force_end_timeout_ms)
    }

    pub fn overlay_settle(&self) -> Duration {
        Duration::from_millis(self.overlay_settle_ms)
    }

    pub fn overlay_retry(&self) -> Duration {
        Duration::from_millis(self.overlay_retry_ms)
    }

    pub fn overlay_linger(&self) -> Duration {
        Duration::from_millis(self.overlay_linger_ms)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `./snaptrail.yaml`, then `~/.snaptrail/config.yaml`, then falls
    /// back to defaults.
    pub fn load_default() -> Result<RecorderConfig, ConfigError> {
        let local = Path::new("./snaptrail.yaml");
        if local.exists() {
            return Self::load_from_file(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user = home.join(".snaptrail/config.yaml");
            if user.exists() {
                return Self::load_from_file(&user);
            }
        }

        Ok(RecorderConfig::default())
    }

    pub fn load_from_file(path: &Path) -> Result<RecorderConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

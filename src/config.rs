//! Application configuration.
//!
//! The configuration is loaded from a JSON file, by default
//! `$XDG_CONFIG_HOME/keycommander/config.json`, or the path passed with
//! `--config <path>`.  Every section is optional and falls back to the
//! defaults of the Model01 keyboard setup.
//!
//! # Example
//!
//! ```json
//! {
//!   "serial": {
//!     "device_path": "/dev/cu.usbmodemCkbio011",
//!     "baud_rate": 9600
//!   },
//!   "applications": {
//!     "browser": "/Applications/Google Chrome.app",
//!     "terminal": "/Applications/iTerm.app"
//!   },
//!   "hotplug": { "poll_interval_ms": 1000 },
//!   "launcher": { "program": "open", "args": ["-a"] }
//! }
//! ```

use crate::command::ActionMapping;
use crate::launcher::LauncherConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which serial device to open and how.
    #[serde(default)]
    pub serial: ConnectionConfig,

    /// Identifier → application path.
    #[serde(default = "default_applications")]
    pub applications: ActionMapping,

    /// Device hot-plug detection.
    #[serde(default)]
    pub hotplug: HotplugConfig,

    /// How resolved actions are launched.
    #[serde(default)]
    pub launcher: LauncherConfig,
}

/// Parameters for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Path of the serial device node.
    pub device_path: String,
    pub baud_rate: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/cu.usbmodemCkbio011".into(),
            baud_rate: 9600,
        }
    }
}

/// Hot-plug watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotplugConfig {
    /// How often the list of serial ports is polled (ms).  `0` disables
    /// hot-plug detection.
    pub poll_interval_ms: u64,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

fn default_applications() -> ActionMapping {
    [
        ("browser", "/Applications/Google Chrome.app"),
        ("calendar", "/Applications/Calendar.app"),
        ("chat", "/Applications/HipChat.app"),
        ("diff", "/Applications/SourceTree.app"),
        ("music", "/Applications/iTunes.app"),
        ("terminal", "/Applications/iTerm.app"),
        ("xcode", "/Applications/Xcode.app"),
    ]
    .into_iter()
    .collect()
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: ConnectionConfig::default(),
            applications: default_applications(),
            hotplug: HotplugConfig::default(),
            launcher: LauncherConfig::default(),
        }
    }
}

/// Error from loading or parsing a configuration file.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(String);

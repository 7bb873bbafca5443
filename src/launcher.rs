//! [`ActionSink`] that opens applications by spawning an opener program.
//!
//! By default this is `open -a <path>` on macOS and `xdg-open <path>`
//! elsewhere.  The child is not waited on by the caller; a detached thread
//! reaps it.

use crate::command::ResolvedAction;
use crate::traits::ActionSink;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::process::{Command, Stdio};

/// Which program opens an application path, and with which leading
/// arguments.  The path is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self {
                program: "open".into(),
                args: vec!["-a".into()],
            }
        } else {
            Self {
                program: "xdg-open".into(),
                args: Vec::new(),
            }
        }
    }
}

/// Error spawning the opener program.
#[derive(Debug, thiserror::Error)]
#[error("failed to run {program}: {source}")]
pub struct LaunchError {
    program: String,
    #[source]
    source: std::io::Error,
}

/// Opens resolved actions with the configured program.
#[derive(Debug, Clone, Default)]
pub struct AppLauncher {
    config: LauncherConfig,
}

impl AppLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to the opener for `action`.
    pub fn arguments(&self, action: &ResolvedAction) -> Vec<OsString> {
        self.config
            .args
            .iter()
            .map(OsString::from)
            .chain(std::iter::once(action.path.clone().into_os_string()))
            .collect()
    }
}

impl ActionSink for AppLauncher {
    type Error = LaunchError;

    fn perform(&mut self, action: &ResolvedAction) -> Result<(), LaunchError> {
        let args = self.arguments(action);
        debug!("running {} {:?}", self.config.program, args);
        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError {
                program: self.config.program.clone(),
                source,
            })?;

        let program = self.config.program.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) if !status.success() => warn!("{} exited with {}", program, status),
            Ok(_) => {}
            Err(e) => warn!("failed to wait for {}: {}", program, e),
        });
        Ok(())
    }
}

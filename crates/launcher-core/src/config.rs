//! Centralized configuration for the launcher.
//!
//! Fixed protocol values (output markers, environment flags, runner arguments,
//! host command ids) live in constant groups. Values a host may tune are in
//! [`LauncherOptions`], which can be loaded from a JSON file.

use crate::error::{LauncherError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Runner protocol constants.
pub struct LaunchConfig;

impl LaunchConfig {
    /// Marker preceding the host process id in runner output.
    pub const PROCESS_ID_MARKER: &'static str = "Process Id: ";
    /// Marker following the host process id on the same line.
    pub const NAME_MARKER: &'static str = ", Name: ";

    /// Makes the test host wait for a debugger before running tests.
    pub const ENV_HOST_DEBUG: &'static str = "VSTEST_HOST_DEBUG";
    /// Stops the test host from breaking into the debugger on its own.
    pub const ENV_NO_BREAKPOINT: &'static str = "VSTEST_DEBUG_NOBP";
    pub const ENV_FLAG_ON: &'static str = "1";

    pub const ADAPTER_PATH_FLAG: &'static str = "--TestAdapterPath:";
    pub const LOADING_STRATEGY_ARG: &'static str =
        "--TestAdapterLoadingStrategy:Explicit,ExtensionsDirectory";

    pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Text shown on the start-debugging command while the debuggee is paused.
    pub const CONTINUE_COMMAND_TEXT: &'static str = "Continue";
}

/// Host command identifiers for the "start debugging" family.
pub struct CommandIds;

impl CommandIds {
    /// Command group of the global debug commands.
    pub const DEBUG_COMMAND_SET: Uuid = Uuid::from_u128(0x6E87CFAD_6C05_4ADF_9CD7_3B7943875B7C);
    /// Command group of the project debug context menu.
    pub const PROJECT_DEBUG_CONTEXT_SET: Uuid =
        Uuid::from_u128(0x1496A755_94DE_11D0_8C3F_00C04FC2AAE2);

    pub const START_DEBUG_TARGET: u32 = 0x101;
    pub const START_PROJECT: u32 = 0x164;
    pub const STEP_INTO_NEW_INSTANCE: u32 = 0x165;
    pub const START_WITHOUT_DEBUGGING: u32 = 0x167;
}

/// Tunable launcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LauncherOptions {
    /// Test runner executable used when a request carries no override.
    pub runner_path: Option<PathBuf>,
    /// How long to wait for the runner to report its host process.
    pub discovery_timeout_ms: u64,
    /// Wait without a deadline when this process is itself being debugged.
    pub skip_timeout_when_debugged: bool,
}

impl Default for LauncherOptions {
    fn default() -> Self {
        Self {
            runner_path: None,
            discovery_timeout_ms: LaunchConfig::DEFAULT_DISCOVERY_TIMEOUT.as_millis() as u64,
            skip_timeout_when_debugged: true,
        }
    }
}

impl LauncherOptions {
    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| LauncherError::io_with_path(e, path))?;
        let options: Self = serde_json::from_str(&content)?;
        options.validate()?;
        Ok(options)
    }

    /// Reject values the launcher cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.discovery_timeout_ms == 0 {
            return Err(LauncherError::Config {
                message: "discoveryTimeoutMs must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Set the runner executable.
    pub fn with_runner_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.runner_path = Some(path.into());
        self
    }

    /// Set the discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_options() {
        let options = LauncherOptions::default();
        assert_eq!(options.discovery_timeout(), Duration::from_secs(5));
        assert!(options.skip_timeout_when_debugged);
        assert!(options.runner_path.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("launcher.json");
        std::fs::write(
            &path,
            r#"{ "runnerPath": "/opt/vstest/vstest.console", "discoveryTimeoutMs": 750 }"#,
        )
        .unwrap();

        let options = LauncherOptions::load(&path).unwrap();
        assert_eq!(
            options.runner_path,
            Some(PathBuf::from("/opt/vstest/vstest.console"))
        );
        assert_eq!(options.discovery_timeout(), Duration::from_millis(750));
        assert!(options.skip_timeout_when_debugged);
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("launcher.json");
        std::fs::write(&path, r#"{ "discoveryTimeoutMs": 0 }"#).unwrap();

        let err = LauncherOptions::load(&path).unwrap_err();
        assert!(matches!(err, LauncherError::Config { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = LauncherOptions::load("/nonexistent/launcher.json").unwrap_err();
        assert!(matches!(err, LauncherError::Io { path: Some(_), .. }));
    }

    #[test]
    fn test_command_set_ids() {
        assert_eq!(
            CommandIds::DEBUG_COMMAND_SET.to_string(),
            "6e87cfad-6c05-4adf-9cd7-3b7943875b7c"
        );
        assert_eq!(
            CommandIds::PROJECT_DEBUG_CONTEXT_SET.to_string(),
            "1496a755-94de-11d0-8c3f-00c04fc2aae2"
        );
    }
}

//! Error types for the test host launcher.
//!
//! Launch-path failures (`TargetResolution`, `LaunchTimeout`, `ProcessStart`)
//! propagate to the caller of [`LaunchCoordinator::launch`]. A failed build is
//! not an error at all; it is the `Error` state of a build-then-launch cycle.
//!
//! [`LaunchCoordinator::launch`]: crate::coordinator::LaunchCoordinator::launch

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the launcher.
#[derive(Debug, Error)]
pub enum LauncherError {
    // Launch errors
    #[error("Cannot resolve launch target {target}: {message}")]
    TargetResolution { target: String, message: String },

    #[error("Host process was not reported within {0:?}")]
    LaunchTimeout(Duration),

    #[error("Failed to start {program}: {message}")]
    ProcessStart {
        program: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Test runner executable not configured or missing: {0}")]
    RunnerNotFound(String),

    #[error("Operation was cancelled")]
    Cancelled,

    // Build-then-launch errors
    #[error("A build-then-launch cycle is already active")]
    CycleActive,

    #[error("{0} has been disposed")]
    Disposed(&'static str),

    #[error("Build system error: {message}")]
    Build { message: String },

    #[error("Debugger attach failed: {message}")]
    Attach { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for launcher operations.
pub type Result<T> = std::result::Result<T, LauncherError>;

impl From<std::io::Error> for LauncherError {
    fn from(err: std::io::Error) -> Self {
        LauncherError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LauncherError {
    fn from(err: serde_json::Error) -> Self {
        LauncherError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl LauncherError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LauncherError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a spawn error for the given program.
    pub fn process_start(program: impl Into<PathBuf>, err: std::io::Error) -> Self {
        LauncherError::ProcessStart {
            program: program.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Whether this error aborts a launch (as opposed to a degraded or
    /// expected outcome).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LauncherError::TargetResolution { .. }
                | LauncherError::LaunchTimeout(_)
                | LauncherError::ProcessStart { .. }
                | LauncherError::RunnerNotFound(_)
        )
    }
}

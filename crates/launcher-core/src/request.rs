//! Launch inputs and outputs.

use crate::host::EngineId;
use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Operation flags chosen by the caller, passed through to the debugger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LaunchOptions {
    pub no_debug: bool,
    pub stop_debugging_on_end: bool,
    pub merge_environment: bool,
}

/// One launch attempt.
///
/// Built with the `with_*` methods and immutable afterwards.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    target: Target,
    options: LaunchOptions,
    working_dir: Option<PathBuf>,
    environment: Vec<(String, String)>,
    extra_args: Vec<String>,
    runner_override: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            options: LaunchOptions::default(),
            working_dir: None,
            environment: Vec::new(),
            extra_args: Vec::new(),
            runner_override: None,
        }
    }

    pub fn with_options(mut self, options: LaunchOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the runner in `dir` instead of the artifact's directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((key.into(), value.into()));
        self
    }

    /// Append an argument after the target path.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Use this runner executable instead of the configured one.
    pub fn with_runner(mut self, runner: impl Into<PathBuf>) -> Self {
        self.runner_override = Some(runner.into());
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn options(&self) -> LaunchOptions {
        self.options
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    pub fn runner_override(&self) -> Option<&Path> {
        self.runner_override.as_deref()
    }
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Program and arguments, for logging.
    pub fn display_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How the debugger should treat the process in [`LaunchSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaunchOperation {
    /// The process is already running; attach to it.
    AlreadyRunning,
}

/// Everything a debugger needs to attach to a launched test host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSettings {
    pub executable: PathBuf,
    pub current_dir: PathBuf,
    pub engine_id: EngineId,
    pub process_id: u32,
    pub environment: BTreeMap<String, String>,
    pub operation: LaunchOperation,
    pub options: LaunchOptions,
}

//! Capabilities the launcher consumes from its host environment.
//!
//! The launcher never reaches for ambient services. Everything it needs from
//! the workspace (project outputs, the build system, the debugger, command
//! routing) is handed to it as one of these narrow traits.

use crate::config::CommandIds;
use crate::error::Result;
use crate::events::{EventHub, Subscription};
use crate::introspect::RuntimeClassification;
use crate::request::LaunchSettings;
use crate::target::ProjectId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub use crate::introspect::RuntimeIntrospector;

/// Debugger engine selector handed to the debugger on attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(Uuid);

impl EngineId {
    /// Engine for processes hosting the cross-platform managed runtime.
    pub const MANAGED_CORE: EngineId =
        EngineId(Uuid::from_u128(0x2E36F1D4_B23C_435D_AB41_18E608940038));
    /// Engine for processes hosting the desktop managed runtime.
    pub const MANAGED_DESKTOP: EngineId =
        EngineId(Uuid::from_u128(0x449EC4CC_30D2_4032_9256_EE18EB41B62B));

    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated())
    }
}

/// Debugger mode as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DebuggerMode {
    /// Not debugging.
    Design,
    Run,
    /// Debuggee paused.
    Break,
}

/// Payload of the build-finished notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildFinished {
    pub succeeded: bool,
}

/// How the host should start a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DebugOperation {
    /// Run without the debugger.
    Launch,
    /// Run under the debugger.
    LaunchDebug,
}

/// The "start debugging" commands the interceptor can take over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchCommand {
    LaunchDebugTarget,
    LaunchProjectSelection,
    StartWithoutDebugging,
    StepIntoNewInstance,
}

impl LaunchCommand {
    /// Map a host command id to a launch command, if it is one.
    pub fn from_command_id(command: CommandId) -> Option<Self> {
        if command.group == CommandIds::DEBUG_COMMAND_SET {
            match command.id {
                CommandIds::START_DEBUG_TARGET => Some(LaunchCommand::LaunchDebugTarget),
                _ => None,
            }
        } else if command.group == CommandIds::PROJECT_DEBUG_CONTEXT_SET {
            match command.id {
                CommandIds::START_PROJECT => Some(LaunchCommand::LaunchProjectSelection),
                CommandIds::START_WITHOUT_DEBUGGING => Some(LaunchCommand::StartWithoutDebugging),
                CommandIds::STEP_INTO_NEW_INSTANCE => Some(LaunchCommand::StepIntoNewInstance),
                _ => None,
            }
        } else {
            None
        }
    }

    pub fn command_id(&self) -> CommandId {
        match self {
            LaunchCommand::LaunchDebugTarget => {
                CommandId::new(CommandIds::DEBUG_COMMAND_SET, CommandIds::START_DEBUG_TARGET)
            }
            LaunchCommand::LaunchProjectSelection => {
                CommandId::new(CommandIds::PROJECT_DEBUG_CONTEXT_SET, CommandIds::START_PROJECT)
            }
            LaunchCommand::StartWithoutDebugging => CommandId::new(
                CommandIds::PROJECT_DEBUG_CONTEXT_SET,
                CommandIds::START_WITHOUT_DEBUGGING,
            ),
            LaunchCommand::StepIntoNewInstance => CommandId::new(
                CommandIds::PROJECT_DEBUG_CONTEXT_SET,
                CommandIds::STEP_INTO_NEW_INSTANCE,
            ),
        }
    }

    pub fn debug_operation(&self) -> DebugOperation {
        match self {
            LaunchCommand::StartWithoutDebugging => DebugOperation::Launch,
            LaunchCommand::LaunchDebugTarget
            | LaunchCommand::LaunchProjectSelection
            | LaunchCommand::StepIntoNewInstance => DebugOperation::LaunchDebug,
        }
    }
}

/// A host command: command group plus numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId {
    pub group: Uuid,
    pub id: u32,
}

impl CommandId {
    pub const fn new(group: Uuid, id: u32) -> Self {
        Self { group, id }
    }
}

/// Answer to a status query for a command a filter handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandStatus {
    /// Replacement caption, if any.
    pub text: Option<String>,
}

/// Resolves project references to the artifact the runner should load.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn output_path(&self, project: ProjectId) -> Result<PathBuf>;
}

/// The host's build system.
pub trait BuildSystem: Send + Sync {
    /// Whether a build is already running.
    fn is_busy(&self) -> bool;

    /// Projects the host would build and start for a debug command.
    fn startup_projects(&self) -> Vec<ProjectId>;

    /// Bring the build output view forward.
    fn show_build_output(&self) -> Result<()>;

    fn start_build(&self, projects: &[ProjectId]) -> Result<()>;

    fn build_finished(&self) -> &EventHub<BuildFinished>;
}

/// Debugger lifecycle notifications.
#[derive(Debug, Clone, Default)]
pub struct DebuggerNotifications {
    pub started: EventHub<()>,
    pub stopped: EventHub<()>,
    pub mode_changed: EventHub<DebuggerMode>,
}

/// The host's debugger.
#[async_trait]
pub trait DebugAttachService: Send + Sync {
    fn mode(&self) -> DebuggerMode;

    fn notifications(&self) -> &DebuggerNotifications;

    /// Start a debug session for the given startup projects.
    fn start_debugging(&self, projects: &[ProjectId], operation: DebugOperation) -> Result<()>;

    /// Attach to an already running process.
    async fn attach(&self, settings: &LaunchSettings) -> Result<()>;
}

/// Picks the debugger engine for a classified process.
pub trait DebugEngineSelector: Send + Sync {
    fn select(&self, runtimes: &[RuntimeClassification]) -> EngineId;
}

/// Engine selection by the first recognised runtime, defaulting to
/// [`EngineId::MANAGED_CORE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownEngines;

impl DebugEngineSelector for KnownEngines {
    fn select(&self, runtimes: &[RuntimeClassification]) -> EngineId {
        runtimes
            .iter()
            .find_map(|runtime| match runtime {
                RuntimeClassification::ManagedCore => Some(EngineId::MANAGED_CORE),
                RuntimeClassification::ManagedDesktop => Some(EngineId::MANAGED_DESKTOP),
                RuntimeClassification::Unknown => None,
            })
            .unwrap_or(EngineId::MANAGED_CORE)
    }
}

/// A command filter that sees commands before the host's own handlers.
pub trait CommandFilter: Send + Sync {
    /// `Some` when the filter handles `command`.
    fn query_status(&self, command: CommandId) -> Option<CommandStatus>;

    /// Returns `true` when the filter handled the command.
    fn exec(&self, command: CommandId) -> bool;
}

/// The host's command routing.
pub trait CommandRouter: Send + Sync {
    /// Register a priority filter. Dropping the returned guard removes it.
    fn register_priority_filter(&self, filter: Arc<dyn CommandFilter>) -> Result<Subscription>;

    fn workspace_closed(&self) -> &EventHub<()>;
}

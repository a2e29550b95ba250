//! Testhost Launcher - debug-launch orchestration for test runners.
//!
//! This crate starts a test runner with host debugging enabled, discovers the
//! test host process the runner spawns by scanning its output, classifies the
//! host's managed runtime, and returns the settings a debugger needs to attach.
//! It can also intercept a host's "start debugging" commands so that armed
//! projects are built first and then started under the debugger.
//!
//! Everything the launcher needs from its host (build system, debugger,
//! command routing, project outputs) is injected through the traits in
//! [`host`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use testhost_launcher::{
//!     CancellationToken, LaunchCoordinator, LaunchRequest, LauncherOptions, Target,
//! };
//!
//! #[tokio::main]
//! async fn main() -> testhost_launcher::Result<()> {
//!     let options = LauncherOptions::default().with_runner_path("/opt/vstest/vstest.console");
//!     let coordinator = LaunchCoordinator::new("/opt/adapter/Adapter.dll", options, resolver());
//!
//!     let request = LaunchRequest::new(Target::executable("/src/tests/bin/Suite.dll"));
//!     let settings = coordinator.launch(&request, &CancellationToken::new()).await?;
//!     println!("Test host running as pid {}", settings.process_id);
//!
//!     coordinator.close().await;
//!     Ok(())
//! }
//! ```

pub mod build_launch;
pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod host;
pub mod interceptor;
pub mod introspect;
pub mod platform;
pub mod request;
pub mod session;
pub mod target;

// Re-export commonly used types
pub use build_launch::{ArmedProject, BuildLaunchState, BuildThenLaunchCoordinator};
pub use cancel::{CancellationToken, CancelledError};
pub use config::{CommandIds, LaunchConfig, LauncherOptions};
pub use coordinator::LaunchCoordinator;
pub use error::{LauncherError, Result};
pub use events::{EventHub, Subscription};
pub use host::{
    BuildFinished, BuildSystem, CommandFilter, CommandId, CommandRouter, CommandStatus,
    DebugAttachService, DebugEngineSelector, DebugOperation, DebuggerMode,
    DebuggerNotifications, EngineId, KnownEngines, LaunchCommand, TargetResolver,
};
pub use interceptor::CommandInterceptor;
pub use introspect::{ModuleScanIntrospector, RuntimeClassification, RuntimeIntrospector};
pub use request::{CommandSpec, LaunchOperation, LaunchOptions, LaunchRequest, LaunchSettings};
pub use session::{parse_host_pid, LaunchSession, SessionState};
pub use target::{ProjectId, Target};

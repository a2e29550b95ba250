//! Build the implicated projects, then start debugging.
//!
//! A [`BuildThenLaunchCoordinator`] runs a single cycle:
//!
//! ```text
//! Idle -> Building -> Debugging -> Idle
//!                  \-> Error
//! ```
//!
//! The build system and debugger report back through notifications. Each
//! subscription is released exactly once, whichever of build-finished,
//! debug-stop, cancellation or disposal gets there first. A fresh cycle needs
//! a fresh coordinator.

use crate::cancel::CancellationToken;
use crate::config::LaunchConfig;
use crate::error::{LauncherError, Result};
use crate::events::{EventHub, Subscription};
use crate::host::{BuildSystem, DebugAttachService, DebuggerMode, LaunchCommand};
use crate::target::ProjectId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, warn};

/// Cycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildLaunchState {
    Idle,
    Building,
    Debugging,
    Error,
}

/// A project registered for interception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArmedProject {
    pub project: ProjectId,
    /// Project to build and start in place of `project`, when its launch
    /// target is a project reference.
    pub launch_target: Option<ProjectId>,
}

impl ArmedProject {
    pub fn new(project: ProjectId, launch_target: Option<ProjectId>) -> Self {
        Self {
            project,
            launch_target,
        }
    }
}

/// Replace each startup project by its armed launch target.
///
/// Returns `None` when no startup project has one.
pub fn effective_build_set(
    startup: &[ProjectId],
    armed: &[ArmedProject],
) -> Option<Vec<ProjectId>> {
    let mut substituted = false;
    let set = startup
        .iter()
        .map(|project| {
            armed
                .iter()
                .find(|a| a.project == *project)
                .and_then(|a| a.launch_target)
                .map(|target| {
                    substituted = true;
                    target
                })
                .unwrap_or(*project)
        })
        .collect();
    substituted.then_some(set)
}

struct CycleShared {
    state: BuildLaunchState,
    started: bool,
    command: LaunchCommand,
    startup: Vec<ProjectId>,
    build_finished: Option<Subscription>,
    debug_started: Option<Subscription>,
    debug_stopped: Option<Subscription>,
    stop_raised: bool,
}

impl CycleShared {
    fn take_subscriptions(&mut self) -> [Option<Subscription>; 3] {
        [
            self.build_finished.take(),
            self.debug_started.take(),
            self.debug_stopped.take(),
        ]
    }
}

struct CycleInner {
    build: Arc<dyn BuildSystem>,
    debugger: Arc<dyn DebugAttachService>,
    shared: Mutex<CycleShared>,
    disposed: AtomicBool,
    is_debugging: AtomicBool,
    cancel: CancellationToken,
    debugging_stop: EventHub<()>,
}

impl CycleInner {
    fn lock(&self) -> MutexGuard<'_, CycleShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_build_finished(self: &Arc<Self>, succeeded: bool) {
        if self.disposed.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
            debug!("Ignoring build result for a released cycle");
            return;
        }

        let (subscription, command, startup) = {
            let mut shared = self.lock();
            if shared.state != BuildLaunchState::Building {
                return;
            }
            (
                shared.build_finished.take(),
                shared.command,
                shared.startup.clone(),
            )
        };
        if subscription.is_none() {
            return;
        }
        drop(subscription);

        if !succeeded {
            warn!("Build failed; not starting the debugger");
            self.lock().state = BuildLaunchState::Error;
            return;
        }

        let weak = Arc::downgrade(self);
        let on_started = self.debugger.notifications().started.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.on_debug_started();
            }
        });
        self.lock().debug_started = Some(on_started);

        let operation = command.debug_operation();
        info!(
            "Build succeeded; starting {} project(s) with {:?}",
            startup.len(),
            operation
        );
        match self.debugger.start_debugging(&startup, operation) {
            Ok(()) => {
                let mut shared = self.lock();
                if shared.state == BuildLaunchState::Building {
                    shared.state = BuildLaunchState::Debugging;
                }
            }
            Err(e) => {
                error!("Failed to start debugging: {}", e);
                let released = {
                    let mut shared = self.lock();
                    shared.state = BuildLaunchState::Error;
                    shared.debug_started.take()
                };
                drop(released);
            }
        }
    }

    fn on_debug_started(&self) {
        self.is_debugging.store(true, Ordering::SeqCst);
        let mut shared = self.lock();
        if shared.state == BuildLaunchState::Building {
            shared.state = BuildLaunchState::Debugging;
        }
    }

    fn on_debug_stopped(&self) {
        self.is_debugging.store(false, Ordering::SeqCst);
        let (released, raise) = {
            let mut shared = self.lock();
            shared.state = BuildLaunchState::Idle;
            let raise = !shared.stop_raised;
            shared.stop_raised = true;
            (shared.take_subscriptions(), raise)
        };
        drop(released);

        if raise {
            debug!("Debugging session ended");
            self.debugging_stop.emit(&());
        }
    }

    fn release(&self) {
        let released = self.lock().take_subscriptions();
        drop(released);
    }
}

/// Builds the projects a debug command implicates, then launches them under
/// the debugger.
pub struct BuildThenLaunchCoordinator {
    inner: Arc<CycleInner>,
}

impl BuildThenLaunchCoordinator {
    pub fn new(build: Arc<dyn BuildSystem>, debugger: Arc<dyn DebugAttachService>) -> Self {
        Self {
            inner: Arc::new(CycleInner {
                build,
                debugger,
                shared: Mutex::new(CycleShared {
                    state: BuildLaunchState::Idle,
                    started: false,
                    command: LaunchCommand::LaunchDebugTarget,
                    startup: Vec::new(),
                    build_finished: None,
                    debug_started: None,
                    debug_stopped: None,
                    stop_raised: false,
                }),
                disposed: AtomicBool::new(false),
                is_debugging: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                debugging_stop: EventHub::new(),
            }),
        }
    }

    pub fn state(&self) -> BuildLaunchState {
        self.inner.lock().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Raised once when the debug session started by this cycle ends.
    pub fn debugging_stop(&self) -> &EventHub<()> {
        &self.inner.debugging_stop
    }

    /// Caption override for the intercepted command: "Continue" while the
    /// debuggee is paused.
    pub fn command_text(&self) -> Option<&'static str> {
        if !self.inner.is_debugging.load(Ordering::SeqCst) {
            return None;
        }
        match self.inner.debugger.mode() {
            DebuggerMode::Break => Some(LaunchConfig::CONTINUE_COMMAND_TEXT),
            _ => None,
        }
    }

    /// Start the build for `command`.
    ///
    /// Returns `Ok(false)` when the command should fall through to the host:
    /// the build system is busy, no startup project is armed with a launch
    /// target, or the cycle was cancelled.
    pub fn build(&self, armed: &[ArmedProject], command: LaunchCommand) -> Result<bool> {
        if self.is_disposed() {
            return Err(LauncherError::Disposed("build-then-launch coordinator"));
        }
        {
            let shared = self.inner.lock();
            if shared.started || shared.state != BuildLaunchState::Idle {
                return Err(LauncherError::CycleActive);
            }
        }

        let build = &self.inner.build;
        if build.is_busy() {
            info!("Build system is busy; letting {:?} through", command);
            return Ok(false);
        }

        let startup = build.startup_projects();
        let Some(projects) = effective_build_set(&startup, armed) else {
            debug!("No startup project is armed; letting {:?} through", command);
            return Ok(false);
        };
        if self.is_cancelled() {
            return Ok(false);
        }

        {
            let mut shared = self.inner.lock();
            shared.started = true;
            shared.state = BuildLaunchState::Building;
            shared.command = command;
            shared.startup = startup;
        }

        if let Err(e) = build.show_build_output() {
            debug!("Cannot show build output: {}", e);
        }

        let weak: Weak<CycleInner> = Arc::downgrade(&self.inner);
        let on_finished = build.build_finished().subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_build_finished(event.succeeded);
            }
        });
        let weak: Weak<CycleInner> = Arc::downgrade(&self.inner);
        let on_stopped = self
            .inner
            .debugger
            .notifications()
            .stopped
            .subscribe(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_debug_stopped();
                }
            });
        {
            let mut shared = self.inner.lock();
            shared.build_finished = Some(on_finished);
            shared.debug_stopped = Some(on_stopped);
        }

        info!("Building {} project(s) before {:?}", projects.len(), command);
        if let Err(e) = build.start_build(&projects) {
            error!("Failed to start build: {}", e);
            let released = {
                let mut shared = self.inner.lock();
                shared.state = BuildLaunchState::Idle;
                shared.started = false;
                shared.take_subscriptions()
            };
            drop(released);
            return Err(e);
        }
        Ok(true)
    }

    /// Abandon the cycle before the build reports back.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        let released = {
            let mut shared = self.inner.lock();
            if shared.state == BuildLaunchState::Building {
                shared.state = BuildLaunchState::Idle;
            }
            shared.build_finished.take()
        };
        drop(released);
    }

    /// Release every subscription. Safe to call repeatedly and from within
    /// this coordinator's own notifications.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.release();
    }
}

impl Drop for BuildThenLaunchCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for BuildThenLaunchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildThenLaunchCoordinator")
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

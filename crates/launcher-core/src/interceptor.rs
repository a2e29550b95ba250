//! Priority command filter that routes "start debugging" through a build.
//!
//! While at least one project is armed, the interceptor is registered with
//! the host's [`CommandRouter`] ahead of the host's own handlers. A start
//! command then builds the armed projects' launch targets and starts them
//! under the debugger instead of the host's default startup behavior.

use crate::build_launch::{ArmedProject, BuildLaunchState, BuildThenLaunchCoordinator};
use crate::events::Subscription;
use crate::host::{
    BuildSystem, CommandFilter, CommandId, CommandRouter, CommandStatus, DebugAttachService,
    LaunchCommand,
};
use crate::target::ProjectId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Registration {
    _filter: Subscription,
    _workspace_closed: Subscription,
}

struct ActiveCycle {
    cycle: Arc<BuildThenLaunchCoordinator>,
    _stop: Subscription,
}

/// Forwards router calls without keeping the interceptor alive.
struct FilterHandle(Weak<CommandInterceptor>);

impl CommandFilter for FilterHandle {
    fn query_status(&self, command: CommandId) -> Option<CommandStatus> {
        self.0.upgrade().and_then(|i| i.query_status(command))
    }

    fn exec(&self, command: CommandId) -> bool {
        self.0.upgrade().is_some_and(|i| i.exec(command))
    }
}

/// Intercepts start-debugging commands for armed projects.
pub struct CommandInterceptor {
    me: Weak<CommandInterceptor>,
    build: Arc<dyn BuildSystem>,
    debugger: Arc<dyn DebugAttachService>,
    router: Arc<dyn CommandRouter>,
    armed: Mutex<Vec<ArmedProject>>,
    registration: Mutex<Option<Registration>>,
    active: Mutex<Option<ActiveCycle>>,
    disposed: AtomicBool,
}

impl CommandInterceptor {
    pub fn new(
        build: Arc<dyn BuildSystem>,
        debugger: Arc<dyn DebugAttachService>,
        router: Arc<dyn CommandRouter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            build,
            debugger,
            router,
            armed: Mutex::new(Vec::new()),
            registration: Mutex::new(None),
            active: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    /// Whether the filter is registered with the router.
    pub fn is_enabled(&self) -> bool {
        lock(&self.registration).is_some()
    }

    pub fn armed_projects(&self) -> Vec<ArmedProject> {
        lock(&self.armed).clone()
    }

    /// State of the running cycle, if one is live.
    pub fn active_state(&self) -> Option<BuildLaunchState> {
        self.active_cycle().map(|cycle| cycle.state())
    }

    /// Arm `project`. Re-arming a project replaces its launch target.
    ///
    /// Returns `true` when this call registered the filter.
    pub fn arm(&self, project: ArmedProject) -> bool {
        if self.disposed.load(Ordering::SeqCst) {
            return false;
        }
        {
            let mut armed = lock(&self.armed);
            match armed.iter_mut().find(|a| a.project == project.project) {
                Some(existing) => *existing = project,
                None => armed.push(project),
            }
        }
        debug!("Armed project {}", project.project);
        self.enable()
    }

    /// Disarm `project`.
    ///
    /// Returns `true` when this call removed the filter registration.
    pub fn disarm(&self, project: ProjectId) -> bool {
        let now_empty = {
            let mut armed = lock(&self.armed);
            armed.retain(|a| a.project != project);
            armed.is_empty()
        };
        debug!("Disarmed project {}", project);
        now_empty && self.disable()
    }

    /// Release the active cycle, the registration and the armed list.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let active = lock(&self.active).take();
        if let Some(active) = active {
            active.cycle.dispose();
        }
        lock(&self.armed).clear();
        self.disable();
    }

    fn enable(&self) -> bool {
        let mut registration = lock(&self.registration);
        if registration.is_some() {
            return false;
        }

        let filter: Arc<dyn CommandFilter> = Arc::new(FilterHandle(self.me.clone()));
        let filter = match self.router.register_priority_filter(filter) {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Failed to register debug command filter: {}", e);
                return false;
            }
        };

        let me = self.me.clone();
        let workspace_closed = self.router.workspace_closed().subscribe(move |_| {
            if let Some(me) = me.upgrade() {
                me.on_workspace_closed();
            }
        });

        *registration = Some(Registration {
            _filter: filter,
            _workspace_closed: workspace_closed,
        });
        info!("Debug command interception enabled");
        true
    }

    fn disable(&self) -> bool {
        let released = lock(&self.registration).take();
        match released {
            Some(registration) => {
                drop(registration);
                info!("Debug command interception disabled");
                true
            }
            None => false,
        }
    }

    fn on_workspace_closed(&self) {
        debug!("Workspace closed; clearing armed projects");
        lock(&self.armed).clear();
        self.disable();
    }

    fn active_cycle(&self) -> Option<Arc<BuildThenLaunchCoordinator>> {
        lock(&self.active).as_ref().map(|a| Arc::clone(&a.cycle))
    }

    /// Drop `cycle` if it is still the active one, then dispose it.
    fn release_cycle(&self, cycle: &Arc<BuildThenLaunchCoordinator>) {
        let released = {
            let mut active = lock(&self.active);
            if active
                .as_ref()
                .is_some_and(|a| Arc::ptr_eq(&a.cycle, cycle))
            {
                active.take()
            } else {
                None
            }
        };
        drop(released);
        cycle.dispose();
    }

    /// Whether a new cycle may start. Cycles that ended in `Error` or were
    /// disposed are cleared out of the way.
    fn can_start_cycle(&self) -> bool {
        let stale = {
            let mut active = lock(&self.active);
            let finished = match active.as_ref() {
                None => return true,
                Some(a) => a.cycle.is_disposed() || a.cycle.state() == BuildLaunchState::Error,
            };
            if !finished {
                return false;
            }
            active.take()
        };
        if let Some(stale) = stale {
            debug!("Replacing finished build-then-launch cycle");
            stale.cycle.dispose();
        }
        true
    }
}

impl CommandFilter for CommandInterceptor {
    fn query_status(&self, command: CommandId) -> Option<CommandStatus> {
        if !self.is_enabled() {
            return None;
        }
        LaunchCommand::from_command_id(command)?;
        let cycle = self.active_cycle()?;
        if cycle.state() != BuildLaunchState::Building {
            return None;
        }
        Some(CommandStatus {
            text: cycle.command_text().map(str::to_string),
        })
    }

    fn exec(&self, command: CommandId) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let Some(command) = LaunchCommand::from_command_id(command) else {
            return false;
        };
        if !self.can_start_cycle() {
            debug!("{:?} ignored; a build-then-launch cycle is running", command);
            return false;
        }
        debug!("Intercepted {:?}", command);

        let cycle = Arc::new(BuildThenLaunchCoordinator::new(
            Arc::clone(&self.build),
            Arc::clone(&self.debugger),
        ));
        let me = self.me.clone();
        let weak_cycle = Arc::downgrade(&cycle);
        let stop = cycle.debugging_stop().subscribe(move |_| {
            let (Some(me), Some(cycle)) = (me.upgrade(), weak_cycle.upgrade()) else {
                return;
            };
            debug!("Build-then-launch debugging session ended");
            me.release_cycle(&cycle);
        });
        *lock(&self.active) = Some(ActiveCycle {
            cycle: Arc::clone(&cycle),
            _stop: stop,
        });

        let armed = self.armed_projects();
        match cycle.build(&armed, command) {
            Ok(true) => true,
            Ok(false) => {
                debug!("Falling back to the default {:?} handler", command);
                self.release_cycle(&cycle);
                false
            }
            Err(e) => {
                warn!("Build-then-launch failed to start: {}", e);
                self.release_cycle(&cycle);
                false
            }
        }
    }
}

impl Drop for CommandInterceptor {
    fn drop(&mut self) {
        self.dispose();
    }
}

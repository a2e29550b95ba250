//! In-memory host collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use testhost_launcher::{
    BuildFinished, BuildSystem, CommandFilter, CommandId, CommandRouter, DebugAttachService,
    DebugOperation, DebuggerMode, DebuggerNotifications, EventHub, LaunchSettings, LauncherError,
    ProjectId, Result, Subscription, TargetResolver,
};
use uuid::Uuid;

pub fn project(n: u128) -> ProjectId {
    ProjectId::new(Uuid::from_u128(n))
}

/// Build system whose builds finish only when the test says so.
pub struct FakeBuildSystem {
    pub busy: AtomicBool,
    pub fail_start: AtomicBool,
    pub startup: Mutex<Vec<ProjectId>>,
    pub builds: Mutex<Vec<Vec<ProjectId>>>,
    pub output_shown: AtomicUsize,
    hub: EventHub<BuildFinished>,
}

impl FakeBuildSystem {
    pub fn new(startup: Vec<ProjectId>) -> Arc<Self> {
        Arc::new(Self {
            busy: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            startup: Mutex::new(startup),
            builds: Mutex::new(Vec::new()),
            output_shown: AtomicUsize::new(0),
            hub: EventHub::new(),
        })
    }

    pub fn finish(&self, succeeded: bool) -> usize {
        self.hub.emit(&BuildFinished { succeeded })
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    pub fn listeners(&self) -> usize {
        self.hub.subscriber_count()
    }
}

impl BuildSystem for FakeBuildSystem {
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn startup_projects(&self) -> Vec<ProjectId> {
        self.startup.lock().unwrap().clone()
    }

    fn show_build_output(&self) -> Result<()> {
        self.output_shown.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_build(&self, projects: &[ProjectId]) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(LauncherError::Build {
                message: "solution is locked".into(),
            });
        }
        self.builds.lock().unwrap().push(projects.to_vec());
        Ok(())
    }

    fn build_finished(&self) -> &EventHub<BuildFinished> {
        &self.hub
    }
}

/// Debugger that records launch and attach requests.
pub struct FakeDebugger {
    pub mode: Mutex<DebuggerMode>,
    pub fail_launch: AtomicBool,
    pub fail_attach: AtomicBool,
    pub launches: Mutex<Vec<(Vec<ProjectId>, DebugOperation)>>,
    pub attaches: Mutex<Vec<LaunchSettings>>,
    notifications: DebuggerNotifications,
}

impl FakeDebugger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(DebuggerMode::Design),
            fail_launch: AtomicBool::new(false),
            fail_attach: AtomicBool::new(false),
            launches: Mutex::new(Vec::new()),
            attaches: Mutex::new(Vec::new()),
            notifications: DebuggerNotifications::default(),
        })
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn set_mode(&self, mode: DebuggerMode) {
        *self.mode.lock().unwrap() = mode;
        self.notifications.mode_changed.emit(&mode);
    }

    pub fn start(&self) {
        *self.mode.lock().unwrap() = DebuggerMode::Run;
        self.notifications.started.emit(&());
    }

    pub fn stop(&self) {
        *self.mode.lock().unwrap() = DebuggerMode::Design;
        self.notifications.stopped.emit(&());
    }
}

#[async_trait]
impl DebugAttachService for FakeDebugger {
    fn mode(&self) -> DebuggerMode {
        *self.mode.lock().unwrap()
    }

    fn notifications(&self) -> &DebuggerNotifications {
        &self.notifications
    }

    fn start_debugging(&self, projects: &[ProjectId], operation: DebugOperation) -> Result<()> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(LauncherError::Attach {
                message: "debugger unavailable".into(),
            });
        }
        self.launches
            .lock()
            .unwrap()
            .push((projects.to_vec(), operation));
        Ok(())
    }

    async fn attach(&self, settings: &LaunchSettings) -> Result<()> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(LauncherError::Other("engine refused the process".into()));
        }
        self.attaches.lock().unwrap().push(settings.clone());
        Ok(())
    }
}

/// A routed command; filters mark it handled.
pub struct RoutedCommand {
    pub command: CommandId,
    pub handled: AtomicBool,
}

/// Router that delivers commands to registered priority filters.
pub struct FakeRouter {
    pub fail_register: AtomicBool,
    pub registrations: AtomicUsize,
    filters: EventHub<RoutedCommand>,
    closed: EventHub<()>,
}

impl FakeRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_register: AtomicBool::new(false),
            registrations: AtomicUsize::new(0),
            filters: EventHub::new(),
            closed: EventHub::new(),
        })
    }

    /// Route `command`; returns whether a filter handled it.
    pub fn exec(&self, command: CommandId) -> bool {
        let routed = RoutedCommand {
            command,
            handled: AtomicBool::new(false),
        };
        self.filters.emit(&routed);
        routed.handled.load(Ordering::SeqCst)
    }

    pub fn filter_count(&self) -> usize {
        self.filters.subscriber_count()
    }

    pub fn close_workspace(&self) {
        self.closed.emit(&());
    }
}

impl CommandRouter for FakeRouter {
    fn register_priority_filter(&self, filter: Arc<dyn CommandFilter>) -> Result<Subscription> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(LauncherError::Other("registration rejected".into()));
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(self.filters.subscribe(move |routed: &RoutedCommand| {
            if routed.handled.load(Ordering::SeqCst) {
                return;
            }
            if filter.exec(routed.command) {
                routed.handled.store(true, Ordering::SeqCst);
            }
        }))
    }

    fn workspace_closed(&self) -> &EventHub<()> {
        &self.closed
    }
}

/// Resolver backed by a fixed project table.
pub struct TableResolver(pub Vec<(ProjectId, PathBuf)>);

#[async_trait]
impl TargetResolver for TableResolver {
    async fn output_path(&self, id: ProjectId) -> Result<PathBuf> {
        self.0
            .iter()
            .find(|(p, _)| *p == id)
            .map(|(_, path)| path.clone())
            .ok_or_else(|| LauncherError::Other(format!("project {} is not loaded", id)))
    }
}

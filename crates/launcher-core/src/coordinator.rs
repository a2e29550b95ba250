//! Turns a [`LaunchRequest`] into a running, attachable test host.
//!
//! The coordinator owns at most one live [`LaunchSession`]. Starting a new
//! launch closes the previous session first. The session is published before
//! discovery begins, so `close` also stops a launch that is still waiting for
//! its test host.

use crate::cancel::CancellationToken;
use crate::config::{LaunchConfig, LauncherOptions};
use crate::error::{LauncherError, Result};
use crate::host::{DebugAttachService, DebugEngineSelector, KnownEngines, TargetResolver};
use crate::introspect::{ModuleScanIntrospector, RuntimeClassification, RuntimeIntrospector};
use crate::request::{CommandSpec, LaunchOperation, LaunchRequest, LaunchSettings};
use crate::session::{LaunchSession, SessionState};
use crate::target::Target;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Launches the test runner with host debugging enabled and reports the
/// test host it started.
pub struct LaunchCoordinator {
    adapter_path: PathBuf,
    options: LauncherOptions,
    resolver: Arc<dyn TargetResolver>,
    introspector: Arc<dyn RuntimeIntrospector>,
    engines: Arc<dyn DebugEngineSelector>,
    debugger: Option<Arc<dyn DebugAttachService>>,
    session: Mutex<Option<LiveSession>>,
}

/// The published session plus the switch that aborts its discovery wait.
struct LiveSession {
    session: Arc<LaunchSession>,
    abort: CancellationToken,
}

impl LiveSession {
    fn close(&self) {
        self.abort.cancel();
        self.session.close();
    }
}

impl LaunchCoordinator {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `adapter_path` - Test adapter the runner is told to load
    /// * `options` - Runner path and discovery settings
    /// * `resolver` - Resolves project references to build outputs
    pub fn new(
        adapter_path: impl Into<PathBuf>,
        options: LauncherOptions,
        resolver: Arc<dyn TargetResolver>,
    ) -> Self {
        Self {
            adapter_path: adapter_path.into(),
            options,
            resolver,
            introspector: Arc::new(ModuleScanIntrospector::new()),
            engines: Arc::new(KnownEngines),
            debugger: None,
            session: Mutex::new(None),
        }
    }

    pub fn with_introspector(mut self, introspector: Arc<dyn RuntimeIntrospector>) -> Self {
        self.introspector = introspector;
        self
    }

    pub fn with_engine_selector(mut self, engines: Arc<dyn DebugEngineSelector>) -> Self {
        self.engines = engines;
        self
    }

    /// Attach through `debugger` and close sessions when it stops.
    pub fn with_debugger(mut self, debugger: Arc<dyn DebugAttachService>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    pub fn options(&self) -> &LauncherOptions {
        &self.options
    }

    /// Launch the runner and wait for the test host it starts.
    pub async fn launch(
        &self,
        request: &LaunchRequest,
        cancel: &CancellationToken,
    ) -> Result<LaunchSettings> {
        cancel.check()?;

        let runner = self.runner_path(request)?;
        let target_path = self.resolve_target(request.target()).await?;
        let working_dir = match request.working_dir() {
            Some(dir) => dir.to_path_buf(),
            None => target_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };

        let mut environment: BTreeMap<String, String> = request
            .environment()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        environment.insert(
            LaunchConfig::ENV_HOST_DEBUG.to_string(),
            LaunchConfig::ENV_FLAG_ON.to_string(),
        );
        environment.insert(
            LaunchConfig::ENV_NO_BREAKPOINT.to_string(),
            LaunchConfig::ENV_FLAG_ON.to_string(),
        );

        let command = CommandSpec {
            program: runner.clone(),
            args: self.runner_args(&target_path, request.extra_args()),
            env: environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            current_dir: if working_dir.as_os_str().is_empty() {
                None
            } else {
                Some(working_dir.clone())
            },
        };

        let session = Arc::new(LaunchSession::new(&self.options));
        let abort = CancellationToken::new();
        {
            let mut slot = self.session.lock().await;
            if let Some(previous) = slot.take() {
                debug!("Closing previous launch session");
                previous.close();
            }
            if let Some(debugger) = &self.debugger {
                session.watch_debugger(debugger.notifications());
            }
            *slot = Some(LiveSession {
                session: Arc::clone(&session),
                abort: abort.clone(),
            });
        }

        let started = tokio::select! {
            biased;
            _ = abort.cancelled() => Err(LauncherError::Cancelled),
            result = session.start(&command, cancel) => result,
        };
        let pid = match started {
            Ok(pid) if session.state() == SessionState::Running => pid,
            Ok(pid) => {
                debug!("Launch session closed after test host {} was reported", pid);
                self.release(&session).await;
                return Err(LauncherError::Cancelled);
            }
            Err(e) => {
                session.close();
                self.release(&session).await;
                return Err(e);
            }
        };

        let runtimes = self.classify(pid).await;
        let engine_id = self.engines.select(&runtimes);
        info!(
            "Test host {} classified as {:?}, using engine {}",
            pid, runtimes, engine_id
        );

        Ok(LaunchSettings {
            executable: runner,
            current_dir: working_dir,
            engine_id,
            process_id: pid,
            environment,
            operation: LaunchOperation::AlreadyRunning,
            options: request.options(),
        })
    }

    /// Launch, then attach the debugger to the reported test host.
    ///
    /// An attach failure closes the session.
    pub async fn launch_and_attach(
        &self,
        request: &LaunchRequest,
        cancel: &CancellationToken,
    ) -> Result<LaunchSettings> {
        let Some(debugger) = self.debugger.clone() else {
            return Err(LauncherError::Attach {
                message: "no debugger configured".into(),
            });
        };

        let settings = self.launch(request, cancel).await?;
        if let Err(e) = debugger.attach(&settings).await {
            error!("Failed to attach to test host {}: {}", settings.process_id, e);
            self.close().await;
            return Err(match e {
                LauncherError::Attach { .. } => e,
                other => LauncherError::Attach {
                    message: other.to_string(),
                },
            });
        }
        info!("Debugger attached to test host {}", settings.process_id);
        Ok(settings)
    }

    /// Close the live session, if any, including one still waiting for its
    /// test host.
    pub async fn close(&self) {
        let live = self.session.lock().await.take();
        if let Some(live) = live {
            live.close();
        }
    }

    /// Host process id of the live session.
    pub async fn current_host_pid(&self) -> Option<u32> {
        self.session
            .lock()
            .await
            .as_ref()
            .and_then(|live| live.session.host_pid())
    }

    /// Clear the slot if it still holds `session`.
    async fn release(&self, session: &Arc<LaunchSession>) {
        let mut slot = self.session.lock().await;
        if slot
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(&live.session, session))
        {
            *slot = None;
        }
    }

    fn runner_path(&self, request: &LaunchRequest) -> Result<PathBuf> {
        request
            .runner_override()
            .map(Path::to_path_buf)
            .or_else(|| self.options.runner_path.clone())
            .ok_or_else(|| {
                LauncherError::RunnerNotFound(
                    "set runnerPath in the launcher options or pass a runner override".into(),
                )
            })
    }

    async fn resolve_target(&self, target: &Target) -> Result<PathBuf> {
        match target {
            Target::Executable(path) => Ok(path.clone()),
            Target::ProjectReference { id, .. } => match self.resolver.output_path(*id).await {
                Ok(path) => Ok(path),
                Err(e @ LauncherError::TargetResolution { .. }) => Err(e),
                Err(e) => Err(LauncherError::TargetResolution {
                    target: target.to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }

    fn runner_args(&self, target_path: &Path, extra: &[String]) -> Vec<String> {
        let mut args = vec![
            format!(
                "{}{}",
                LaunchConfig::ADAPTER_PATH_FLAG,
                self.adapter_path.display()
            ),
            LaunchConfig::LOADING_STRATEGY_ARG.to_string(),
            target_path.display().to_string(),
        ];
        args.extend(extra.iter().cloned());
        args
    }

    async fn classify(&self, pid: u32) -> Vec<RuntimeClassification> {
        let introspector = Arc::clone(&self.introspector);
        let runtimes = match tokio::task::spawn_blocking(move || introspector.classify(pid)).await
        {
            Ok(runtimes) => runtimes,
            Err(e) => {
                error!("Runtime introspection task failed: {}", e);
                Vec::new()
            }
        };

        if runtimes.is_empty() {
            warn!(
                "Could not determine the runtime of process {}; assuming {:?}",
                pid,
                RuntimeClassification::ManagedCore
            );
            return vec![RuntimeClassification::ManagedCore];
        }
        runtimes
    }
}

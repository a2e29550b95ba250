//! Lifecycle of one runner process.
//!
//! A [`LaunchSession`] spawns the test runner, reads both output streams line
//! by line and waits for the runner to report the id of the test host process
//! it started. The report races against the discovery timeout and the
//! caller's cancellation token; the first outcome wins.
//!
//! Closing is idempotent and may be triggered from several places at once:
//! the owner, a debugger "stopped" notification, a debugger mode change, or a
//! failed discovery.

use crate::cancel::CancellationToken;
use crate::config::{LaunchConfig, LauncherOptions};
use crate::error::{LauncherError, Result};
use crate::events::Subscription;
use crate::host::{DebuggerMode, DebuggerNotifications};
use crate::platform;
use crate::request::CommandSpec;
use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// `Process Id: <digits>, Name: `, allowing only whitespace around the digits.
static HOST_PID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{}\s*([0-9]+)\s*{}",
        regex::escape(LaunchConfig::PROCESS_ID_MARKER),
        regex::escape(LaunchConfig::NAME_MARKER)
    ))
    .expect("host pid pattern must compile")
});

/// Extract the test host process id from one line of runner output.
pub fn parse_host_pid(line: &str) -> Option<u32> {
    HOST_PID_PATTERN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

/// Session lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Starting,
    WaitingForHostPid,
    Running,
    Stopped,
}

struct SessionShared {
    state: SessionState,
    child: Option<Child>,
    runner_pid: Option<u32>,
    host_pid: Option<u32>,
    readers: Vec<JoinHandle<()>>,
    subscriptions: Vec<Subscription>,
}

struct SessionInner {
    shared: Mutex<SessionShared>,
    closed: Notify,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the discovered host. Returns `false` if the session moved on.
    fn mark_running(&self, host_pid: u32) -> bool {
        let mut shared = self.lock();
        if shared.state != SessionState::WaitingForHostPid {
            return false;
        }
        shared.state = SessionState::Running;
        shared.host_pid = Some(host_pid);
        true
    }

    fn close(&self) {
        let (host_pid, child, readers, subscriptions) = {
            let mut shared = self.lock();
            match shared.state {
                SessionState::NotStarted | SessionState::Stopped => return,
                _ => {}
            }
            shared.state = SessionState::Stopped;
            (
                shared.host_pid,
                shared.child.take(),
                std::mem::take(&mut shared.readers),
                std::mem::take(&mut shared.subscriptions),
            )
        };
        self.closed.notify_waiters();

        if let Some(pid) = host_pid {
            if !platform::is_process_alive(pid) {
                debug!("Test host process {} already exited", pid);
            } else {
                match platform::kill_process(pid) {
                    Ok(true) => info!("Killed test host process {}", pid),
                    Ok(false) => debug!("Test host process {} already exited", pid),
                    Err(e) => warn!("Failed to kill test host process {}: {}", pid, e),
                }
            }
        }

        if let Some(mut child) = child {
            let pid = child.id();
            match child.start_kill() {
                Ok(()) => info!("Killed runner process {:?}", pid),
                Err(e) => warn!("Failed to kill runner process {:?}: {}", pid, e),
            }
        }

        for reader in readers {
            reader.abort();
        }
        drop(subscriptions);
        debug!("Launch session closed");
    }
}

/// One runner process and the test host it reports.
pub struct LaunchSession {
    inner: Arc<SessionInner>,
    discovery_timeout: Duration,
    skip_timeout_when_debugged: bool,
}

impl LaunchSession {
    pub fn new(options: &LauncherOptions) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                shared: Mutex::new(SessionShared {
                    state: SessionState::NotStarted,
                    child: None,
                    runner_pid: None,
                    host_pid: None,
                    readers: Vec::new(),
                    subscriptions: Vec::new(),
                }),
                closed: Notify::new(),
            }),
            discovery_timeout: options.discovery_timeout(),
            skip_timeout_when_debugged: options.skip_timeout_when_debugged,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn runner_pid(&self) -> Option<u32> {
        self.inner.lock().runner_pid
    }

    pub fn host_pid(&self) -> Option<u32> {
        self.inner.lock().host_pid
    }

    /// Close this session when the debugger stops or returns to design mode.
    pub fn watch_debugger(&self, notifications: &DebuggerNotifications) {
        let weak = Arc::downgrade(&self.inner);
        let on_stopped = notifications.stopped.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                debug!("Debugger stopped; closing launch session");
                inner.close();
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let on_mode = notifications.mode_changed.subscribe(move |mode| {
            if *mode != DebuggerMode::Design {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                debug!("Debugger returned to design mode; closing launch session");
                inner.close();
            }
        });

        let mut shared = self.inner.lock();
        if shared.state == SessionState::Stopped {
            return;
        }
        shared.subscriptions.push(on_stopped);
        shared.subscriptions.push(on_mode);
    }

    /// Spawn the runner and wait for it to report the test host.
    ///
    /// Returns the host process id. Fails with `LaunchTimeout` when no report
    /// arrives in time and `Cancelled` when `cancel` fires or the session is
    /// closed first; the runner is killed in both cases.
    pub async fn start(&self, command: &CommandSpec, cancel: &CancellationToken) -> Result<u32> {
        {
            let mut shared = self.inner.lock();
            if shared.state != SessionState::NotStarted {
                return Err(LauncherError::Other(format!(
                    "Launch session already started ({:?})",
                    shared.state
                )));
            }
            shared.state = SessionState::Starting;
        }
        let closed = self.inner.closed.notified();

        info!("Starting runner: {}", command.display_line());
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start {}: {}", command.program.display(), e);
                self.inner.lock().state = SessionState::Stopped;
                return Err(LauncherError::process_start(&command.program, e));
            }
        };

        let runner_pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = oneshot::channel::<u32>();

        {
            let mut shared = self.inner.lock();
            if shared.state != SessionState::Starting {
                drop(shared);
                warn!("Launch session closed while starting the runner");
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill runner process {:?}: {}", runner_pid, e);
                }
                return Err(LauncherError::Cancelled);
            }
            shared.state = SessionState::WaitingForHostPid;
            shared.runner_pid = runner_pid;
            shared.child = Some(child);
            if let Some(stdout) = stdout {
                shared.readers.push(tokio::spawn(read_stdout(
                    stdout,
                    Arc::downgrade(&self.inner),
                    tx,
                )));
            }
            if let Some(stderr) = stderr {
                shared.readers.push(tokio::spawn(read_stderr(stderr)));
            }
        }
        debug!("Runner started with pid {:?}", runner_pid);

        let discovery = async move {
            match rx.await {
                Ok(pid) => pid,
                // Runner output ended without a report; only timeout or
                // cancellation can finish the wait now.
                Err(_) => std::future::pending().await,
            }
        };
        let use_timeout =
            !(self.skip_timeout_when_debugged && platform::is_debugger_attached());
        if !use_timeout {
            info!("Debugger attached to launcher; waiting for test host without timeout");
        }
        let timeout = self.discovery_timeout;

        let outcome = tokio::select! {
            pid = discovery => Ok(pid),
            _ = tokio::time::sleep(timeout), if use_timeout => {
                Err(LauncherError::LaunchTimeout(timeout))
            }
            _ = cancel.cancelled() => Err(LauncherError::Cancelled),
            _ = closed => Err(LauncherError::Cancelled),
        };

        match outcome {
            Ok(pid) => {
                info!("Test host process {} reported by runner {:?}", pid, runner_pid);
                Ok(pid)
            }
            Err(e) => {
                warn!("Test host discovery failed: {}", e);
                self.kill_runner().await;
                self.inner.close();
                Err(e)
            }
        }
    }

    /// Kill the runner and wait for it to exit.
    async fn kill_runner(&self) {
        let child = self.inner.lock().child.take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill runner process {:?}: {}", child.id(), e);
            }
        }
    }

    /// Kill the test host and the runner. Safe to call any number of times.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for LaunchSession {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for LaunchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("LaunchSession")
            .field("state", &shared.state)
            .field("runner_pid", &shared.runner_pid)
            .field("host_pid", &shared.host_pid)
            .finish()
    }
}

async fn read_stdout(stdout: ChildStdout, inner: Weak<SessionInner>, tx: oneshot::Sender<u32>) {
    let mut lines = BufReader::new(stdout).lines();
    let mut discovery = Some(tx);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                info!("[STDOUT] {}", line);
                if discovery.is_none() {
                    continue;
                }
                let Some(pid) = parse_host_pid(&line) else {
                    continue;
                };
                let running = inner.upgrade().is_some_and(|inner| inner.mark_running(pid));
                if let Some(tx) = discovery.take() {
                    if running {
                        let _ = tx.send(pid);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read runner stdout: {}", e);
                break;
            }
        }
    }
}

async fn read_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!("[STDERR] {}", line),
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read runner stderr: {}", e);
                break;
            }
        }
    }
}

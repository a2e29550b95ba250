//! Runtime classification of a discovered host process.
//!
//! Classification is advisory: a process that exited or cannot be inspected
//! yields an empty list and the caller picks a default engine.

use crate::platform;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Managed runtime flavor found in a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeClassification {
    Unknown,
    ManagedDesktop,
    ManagedCore,
}

/// Read-only inspection of a live process.
///
/// Implementations must not pause or otherwise disturb the target. Calls may
/// block; the launcher runs them on a blocking worker.
pub trait RuntimeIntrospector: Send + Sync {
    fn classify(&self, pid: u32) -> Vec<RuntimeClassification>;
}

/// Classifies a process by the runtime images it has loaded.
pub struct ModuleScanIntrospector {
    system: Mutex<System>,
}

impl ModuleScanIntrospector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn process_exists(&self, pid: u32) -> bool {
        let sysinfo_pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sysinfo_pid]),
            true,
            ProcessRefreshKind::new(),
        );
        system.process(sysinfo_pid).is_some()
    }
}

impl Default for ModuleScanIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeIntrospector for ModuleScanIntrospector {
    fn classify(&self, pid: u32) -> Vec<RuntimeClassification> {
        if !self.process_exists(pid) {
            debug!("Process {} is gone; nothing to classify", pid);
            return Vec::new();
        }

        match platform::loaded_modules(pid) {
            Ok(modules) => classify_modules(&modules),
            Err(e) => {
                warn!("Cannot inspect modules of process {}: {}", pid, e);
                Vec::new()
            }
        }
    }
}

/// Map loaded image names to runtime flavors, first appearance first.
pub fn classify_modules<S: AsRef<str>>(modules: &[S]) -> Vec<RuntimeClassification> {
    let mut found = Vec::new();
    for module in modules {
        let Some(runtime) = runtime_for_module(module.as_ref()) else {
            continue;
        };
        if !found.contains(&runtime) {
            found.push(runtime);
        }
    }
    found
}

fn runtime_for_module(name: &str) -> Option<RuntimeClassification> {
    let name = name.to_ascii_lowercase();
    match name.as_str() {
        "libcoreclr.so" | "coreclr.dll" | "libcoreclr.dylib" => {
            Some(RuntimeClassification::ManagedCore)
        }
        "clr.dll" | "mscorwks.dll" => Some(RuntimeClassification::ManagedDesktop),
        _ => None,
    }
}

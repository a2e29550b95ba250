//! Platform-specific process management.
//!
//! This module provides cross-platform abstractions for checking and killing
//! processes by id, detecting an attached debugger, and listing the images a
//! process has loaded.

// OS process APIs are FFI; each block documents its SAFETY contract.
#![allow(unsafe_code)]

use crate::error::{LauncherError, Result};
use tracing::debug;

/// Whether a process with the given PID is still running.
///
/// An exited process that has not been reaped yet counts as gone.
///
/// # Platform Behavior
/// - **Linux**: `kill(pid, 0)`, then the state field of `/proc/<pid>/stat`
/// - **macOS**: `kill(pid, 0)` only
/// - **Windows**: Uses `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 performs only the existence/permission check.
        if unsafe { libc::kill(raw, 0) } != 0 {
            return false;
        }
        #[cfg(target_os = "linux")]
        {
            if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                return !stat_is_zombie(&stat);
            }
        }
        true
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        // SAFETY: the handle is checked for null and closed before returning.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if !handle.is_null() {
                CloseHandle(handle);
                true
            } else {
                false
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        tracing::warn!("Process alive check not implemented for this platform");
        true
    }
}

/// `/proc/<pid>/stat` reads `pid (comm) state ...`; `comm` may itself contain
/// spaces and parentheses, so the state follows the last `)`.
#[cfg(any(target_os = "linux", test))]
fn stat_is_zombie(stat: &str) -> bool {
    stat.rsplit_once(')')
        .map(|(_, rest)| matches!(rest.trim_start().chars().next(), Some('Z' | 'X')))
        .unwrap_or(false)
}

/// Forcefully kill a single process.
///
/// Returns `Ok(true)` if a kill was delivered, `Ok(false)` if the process was
/// already gone.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends `SIGKILL`
/// - **Windows**: `TerminateProcess` with exit code 1
pub fn kill_process(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| LauncherError::Other(format!("Invalid process id {pid}")))?;

        debug!("Sending SIGKILL to process {}", pid);
        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => Ok(true),
            Err(nix::errno::Errno::ESRCH) => Ok(false),
            Err(e) => Err(LauncherError::Other(format!(
                "Failed to kill process {}: {}",
                pid, e
            ))),
        }
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenProcess, TerminateProcess, PROCESS_TERMINATE,
        };

        debug!("Terminating process {}", pid);
        // SAFETY: the handle is checked for null and closed on every path.
        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                return Ok(false);
            }
            let ok = TerminateProcess(handle, 1) != 0;
            CloseHandle(handle);
            if ok {
                Ok(true)
            } else {
                Err(LauncherError::Other(format!(
                    "Failed to kill process {}: {}",
                    pid,
                    std::io::Error::last_os_error()
                )))
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(LauncherError::Other(format!(
            "Process termination not implemented for this platform (pid {pid})"
        )))
    }
}

/// Whether the current process is running under a debugger.
///
/// # Platform Behavior
/// - **Linux**: non-zero `TracerPid` in `/proc/self/status`
/// - **Windows**: `IsDebuggerPresent`
/// - **Other**: always `false`
pub fn is_debugger_attached() -> bool {
    #[cfg(target_os = "linux")]
    {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => tracer_pid(&status).is_some_and(|pid| pid != 0),
            Err(e) => {
                debug!("Cannot read /proc/self/status: {}", e);
                false
            }
        }
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Diagnostics::Debug::IsDebuggerPresent;
        // SAFETY: no arguments, no preconditions.
        unsafe { IsDebuggerPresent() != 0 }
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    {
        false
    }
}

#[cfg(any(target_os = "linux", test))]
fn tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}

/// List the file names of the images loaded into a process.
///
/// Only reads process metadata; the target is never stopped. Names are
/// returned once each, in load-map order.
pub fn loaded_modules(pid: u32) -> std::io::Result<Vec<String>> {
    #[cfg(target_os = "linux")]
    {
        let maps = std::fs::read_to_string(format!("/proc/{pid}/maps"))?;
        Ok(module_names_from_maps(&maps))
    }

    #[cfg(windows)]
    {
        loaded_modules_windows(pid)
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    {
        debug!("Module enumeration not implemented for this platform (pid {})", pid);
        Ok(Vec::new())
    }
}

#[cfg(any(target_os = "linux", test))]
fn module_names_from_maps(maps: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for line in maps.lines() {
        // address perms offset dev inode pathname
        let Some(path) = line.split_whitespace().nth(5) else {
            continue;
        };
        if !path.starts_with('/') {
            continue;
        }
        let name = path.rsplit('/').next().unwrap_or(path);
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

#[cfg(windows)]
fn loaded_modules_windows(pid: u32) -> std::io::Result<Vec<String>> {
    use windows_sys::Win32::Foundation::{CloseHandle, HMODULE};
    use windows_sys::Win32::System::ProcessStatus::{
        K32EnumProcessModules, K32GetModuleBaseNameW,
    };
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
    };

    // SAFETY: buffers are sized from the byte counts the API reports, and the
    // process handle is closed before returning.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, 0, pid);
        if handle.is_null() {
            return Err(std::io::Error::last_os_error());
        }

        let mut modules: Vec<HMODULE> = vec![std::ptr::null_mut(); 512];
        let mut needed: u32 = 0;
        let slot = std::mem::size_of::<HMODULE>() as u32;
        if K32EnumProcessModules(
            handle,
            modules.as_mut_ptr(),
            modules.len() as u32 * slot,
            &mut needed,
        ) == 0
        {
            let err = std::io::Error::last_os_error();
            CloseHandle(handle);
            return Err(err);
        }
        let count = ((needed / slot) as usize).min(modules.len());

        let mut names: Vec<String> = Vec::with_capacity(count);
        let mut buf = [0u16; 260];
        for module in &modules[..count] {
            let len = K32GetModuleBaseNameW(handle, *module, buf.as_mut_ptr(), buf.len() as u32);
            if len == 0 {
                continue;
            }
            let name = String::from_utf16_lossy(&buf[..len as usize]);
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
        CloseHandle(handle);
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_self() {
        let pid = std::process::id();
        assert!(is_process_alive(pid));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(4_000_000_000));
    }

    #[test]
    fn test_stat_zombie_state() {
        assert!(stat_is_zombie("4242 (sleep) Z 1 4242 4242 0 -1 4227660"));
        assert!(stat_is_zombie("7 (odd) name)) X 1 7"));
        assert!(!stat_is_zombie("4242 (sleep) S 1 4242 4242 0 -1 4194304"));
        assert!(!stat_is_zombie("9 (Z) R 1 9"));
        assert!(!stat_is_zombie(""));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while is_process_alive(pid) && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(!is_process_alive(pid));
        child.wait().unwrap();
    }

    #[test]
    fn test_kill_nonexistent() {
        // Either "already gone" or an error; never a successful kill.
        if let Ok(killed) = kill_process(4_000_000_000) {
            assert!(!killed);
        }
    }

    #[test]
    fn test_tracer_pid_parsing() {
        let status = "Name:\tcargo\nState:\tS (sleeping)\nTracerPid:\t0\nUid:\t0\n";
        assert_eq!(tracer_pid(status), Some(0));
        let status = "Name:\tapp\nTracerPid:\t4242\n";
        assert_eq!(tracer_pid(status), Some(4242));
        assert_eq!(tracer_pid("Name:\tapp\n"), None);
    }

    #[test]
    fn test_module_names_from_maps() {
        let maps = "\
55d0c0a00000-55d0c0a01000 r--p 00000000 08:01 1311 /usr/share/dotnet/dotnet
7f1c2a000000-7f1c2a100000 r-xp 00000000 08:01 2422 /usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0/libcoreclr.so
7f1c2a100000-7f1c2a200000 r--p 00100000 08:01 2422 /usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0/libcoreclr.so
7f1c2b000000-7f1c2b021000 rw-p 00000000 00:00 0
7ffd4c000000-7ffd4c021000 rw-p 00000000 00:00 0 [stack]
";
        assert_eq!(
            module_names_from_maps(maps),
            vec!["dotnet".to_string(), "libcoreclr.so".to_string()]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_loaded_modules_self() {
        let modules = loaded_modules(std::process::id()).unwrap();
        assert!(!modules.is_empty());
    }

    #[test]
    fn test_loaded_modules_nonexistent() {
        #[cfg(any(target_os = "linux", windows))]
        assert!(loaded_modules(4_000_000_000).is_err());
    }
}

//! Platform abstraction layer for cross-platform compatibility.
//!
//! All `#[cfg]` blocks for OS-specific behavior live in this module rather
//! than being scattered through the launcher.
//!
//! # Supported Platforms
//!
//! - **Linux**: Full support
//! - **Windows**: Full support
//! - **macOS**: Process control only; module enumeration returns nothing

pub mod process;

pub use process::{is_debugger_attached, is_process_alive, kill_process, loaded_modules};

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}

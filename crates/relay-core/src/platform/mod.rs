//! Platform abstraction layer for cross-platform compatibility.
//!
//! All `#[cfg]` blocks for OS-specific behavior live in this module rather
//! than being scattered through the installer and transport.
//!
//! - `paths` - installation layout and race-free directory creation
//! - `permissions` - executable bits

pub mod paths;
pub mod permissions;

pub use paths::{create_dir_segments, home_dir, DirCreation, InstallationPath};
pub use permissions::{is_executable, set_executable};

/// Operating system slug used by the distribution endpoints.
pub fn os_slug() -> &'static str {
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
        "mac"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}

/// CPU architecture slug used by the distribution endpoints.
pub fn arch_slug() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "x86",
        other => other,
    }
}

/// Returns true if the runtime is distributed for the current platform.
pub fn is_supported_platform() -> bool {
    cfg!(any(target_os = "linux", target_os = "windows", target_os = "macos"))
}

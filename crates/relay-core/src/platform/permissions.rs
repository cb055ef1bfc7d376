//! Platform-specific file permission handling.

use crate::error::{RelayError, Result};
use std::path::Path;
use tracing::debug;

/// Make a file executable.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sets the executable bit (mode 0o755)
/// - **Windows**: No-op (Windows determines executability by file extension)
///
/// # Errors
/// Returns an error if the file doesn't exist or permissions can't be changed.
pub async fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| RelayError::io_with_path(e, path))?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o755);
        tokio::fs::set_permissions(path, permissions)
            .await
            .map_err(|e| RelayError::io_with_path(e, path))?;
        debug!("Set executable permissions on: {}", path.display());
    }

    #[cfg(windows)]
    {
        if !path.exists() {
            return Err(RelayError::io_with_path(
                std::io::Error::from(std::io::ErrorKind::NotFound),
                path,
            ));
        }
        debug!("Skipping executable bit on Windows for: {}", path.display());
    }

    Ok(())
}

/// Check if a file has executable permissions.
///
/// # Platform Behavior
/// - **Linux/macOS**: Checks if any execute bit is set
/// - **Windows**: Returns true for `.exe` files
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|metadata| metadata.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        path.extension()
            .map(|ext| ext.eq_ignore_ascii_case("exe"))
            .unwrap_or(false)
    }
}

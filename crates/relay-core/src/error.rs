//! Error types for Relay.
//!
//! One enum covers the whole bootstrap pipeline (resolve, install, launch)
//! and the steady-state protocol (actions, connection loss). Callers match
//! on the variant to decide whether a failure is local to one call or
//! terminal for the launch / connection.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Relay.
#[derive(Debug, Error)]
pub enum RelayError {
    // Bootstrap errors
    #[error("Could not resolve runtime version '{spec}': {message}")]
    VersionResolution { spec: String, message: String },

    #[error("Runtime {version} is not published for this platform ({url})")]
    DownloadNotFound { version: String, url: String },

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Installation of runtime {version} failed: {message}")]
    InstallFailed { version: String, message: String },

    #[error("Launch of runtime {version} failed: {message}")]
    LaunchFailed { version: String, message: String },

    // Protocol errors
    #[error("Action '{action}' failed: {message}")]
    Action { action: String, message: String },

    #[error("Connection to runtime closed")]
    ConnectionClosed,

    #[error("Channel '{channel}' was not opened within {timeout:?}")]
    ChannelTimeout { channel: String, timeout: Duration },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RelayError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RelayError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// The runtime version (or version spec) this error refers to, if any.
    pub fn version(&self) -> Option<&str> {
        match self {
            RelayError::VersionResolution { spec, .. } => Some(spec),
            RelayError::DownloadNotFound { version, .. }
            | RelayError::InstallFailed { version, .. }
            | RelayError::LaunchFailed { version, .. } => Some(version),
            _ => None,
        }
    }

    /// Whether this error came from acquiring a runtime (resolve, download,
    /// extract). The launcher's fallback version only applies to these.
    pub fn is_install_failure(&self) -> bool {
        matches!(
            self,
            RelayError::VersionResolution { .. }
                | RelayError::DownloadNotFound { .. }
                | RelayError::DownloadFailed { .. }
                | RelayError::InstallFailed { .. }
                | RelayError::Network { .. }
                | RelayError::Io { .. }
        )
    }

    /// Whether this error ends the connection it was raised on.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayError::ConnectionClosed)
    }
}

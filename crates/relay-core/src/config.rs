//! Centralized configuration for Relay.
//!
//! Constants for network operations, the IPC transport and the on-disk
//! installation layout.

use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "relay/0.3";
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const DEFAULT_DISTRIBUTION_BASE: &'static str = "https://cdn.openfin.co/release/runtime";
    /// Environment variables consulted (in order) for an HTTPS proxy.
    pub const PROXY_ENV_VARS: [&'static str; 2] = ["HTTPS_PROXY", "https_proxy"];
}

/// IPC transport configuration.
pub struct TransportConfig;

impl TransportConfig {
    /// Maximum accepted frame size (16 MiB).
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
    pub const CHANNEL_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CHANNEL_POLL_INTERVAL: Duration = Duration::from_millis(250);
}

/// Installation directory layout.
pub struct PathsConfig;

impl PathsConfig {
    pub const DEFAULT_VENDOR: &'static str = "OpenFin";
    pub const RUNTIME_DIR_NAME: &'static str = "Runtime";
    pub const STAGING_DIR_NAME: &'static str = "tmp";
    pub const ARCHIVE_FILE_SUFFIX: &'static str = ".archive";
}

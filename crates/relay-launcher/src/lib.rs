//! Relay Launcher - acquire, launch and connect to the desktop runtime.
//!
//! This crate turns a requested runtime version into a running process
//! bound to an IPC channel:
//!
//! 1. [`VersionResolver`] maps a version spec to a concrete version
//! 2. [`RuntimeInstaller`] downloads and extracts it if needed
//! 3. [`ProcessLauncher`] spawns it, falling back to a second version once
//! 4. [`relay_core::connect_channel`] opens the protocol connection
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_launcher::{launch_and_connect, ConnectionConfig, RuntimeSettings};
//!
//! #[tokio::main]
//! async fn main() -> relay_core::Result<()> {
//!     let settings = RuntimeSettings::from_env()?;
//!     let config = ConnectionConfig::new("https://example.com/app.json", "stable")
//!         .with_fallback_version("10.65.1.2");
//!
//!     let (mut runtime, conn) = launch_and_connect(&config, &settings).await?;
//!     conn.publish("status", serde_json::json!("ready")).await?;
//!
//!     conn.closed().await;
//!     runtime.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod installer;
pub mod launcher;
pub mod progress;
pub mod resolver;
pub mod settings;

pub use installer::{ArchiveFormat, RuntimeInstaller};
pub use launcher::{
    build_args, ConnectionConfig, InstalledRuntime, ProcessLauncher, RemoteRuntimeProvider,
    RuntimeProcessHandle, RuntimeProvider,
};
pub use progress::{InstallStage, ProgressUpdate};
pub use resolver::{VersionResolver, VersionSpec};
pub use settings::{DistributionEndpoints, RuntimeSettings};

use relay_core::{Connection, Result};
use std::sync::Arc;

/// Resolve, install and spawn the runtime described by `config`.
pub async fn launch(
    config: &ConnectionConfig,
    settings: &RuntimeSettings,
) -> Result<RuntimeProcessHandle> {
    let launcher = ProcessLauncher::new(Arc::new(RemoteRuntimeProvider::from_settings(settings)?));
    launcher.launch(config).await
}

/// [`launch`], then connect to the runtime's channel.
///
/// Waits up to `settings.connect_timeout` for the channel; the runtime is
/// killed if it never opens.
pub async fn launch_and_connect(
    config: &ConnectionConfig,
    settings: &RuntimeSettings,
) -> Result<(RuntimeProcessHandle, Connection)> {
    let launcher = ProcessLauncher::new(Arc::new(RemoteRuntimeProvider::from_settings(settings)?));
    launcher
        .launch_and_connect(config, settings.connect_timeout)
        .await
}

//! Launching runtimes.
//!
//! - `config` - per-launch configuration and the argument vector
//! - `provider` - the acquisition seam (resolve + install)
//! - `process` - spawning, fallback and the process handle

mod config;
mod process;
mod provider;

pub use config::{build_args, ConnectionConfig};
pub use process::{ProcessLauncher, RuntimeProcessHandle};
pub use provider::{InstalledRuntime, RemoteRuntimeProvider, RuntimeProvider};

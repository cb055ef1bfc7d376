//! Process launching with one-level version fallback.

use super::config::{build_args, ConnectionConfig};
use super::provider::{InstalledRuntime, RuntimeProvider};
use relay_core::{connect_channel, Connection, RelayError, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// A spawned runtime process, owned by whoever launched it.
///
/// Dropping the handle does not terminate the runtime.
#[derive(Debug)]
pub struct RuntimeProcessHandle {
    child: Child,
    pid: Option<u32>,
    version: String,
    binary_path: PathBuf,
    args: Vec<String>,
    used_fallback: bool,
}

impl RuntimeProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The version that was actually launched.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the fallback version was launched instead of the requested one.
    pub fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    /// Exit status if the process has already exited.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Terminate the process and reap it.
    pub async fn kill(&mut self) -> Result<()> {
        info!("Killing runtime {} (pid {:?})", self.version, self.pid);
        Ok(self.child.kill().await?)
    }
}

/// Launches runtimes acquired through a [`RuntimeProvider`].
#[derive(Clone)]
pub struct ProcessLauncher {
    provider: Arc<dyn RuntimeProvider>,
}

impl ProcessLauncher {
    pub fn new(provider: Arc<dyn RuntimeProvider>) -> Self {
        Self { provider }
    }

    /// Acquire and spawn the runtime described by `config`.
    ///
    /// If acquiring the requested version fails and a fallback is
    /// configured, the fallback is tried exactly once. When both fail the
    /// error for the requested version is returned. Spawn failures are
    /// never retried.
    pub async fn launch(&self, config: &ConnectionConfig) -> Result<RuntimeProcessHandle> {
        let (runtime, used_fallback) = self.acquire(config).await?;
        let args = build_args(config, &runtime.version);
        Self::spawn(config, runtime, args, used_fallback)
    }

    /// Launch, then wait up to `timeout` for the runtime to open its channel.
    ///
    /// The process is killed if the channel never opens.
    pub async fn launch_and_connect(
        &self,
        config: &ConnectionConfig,
        timeout: Duration,
    ) -> Result<(RuntimeProcessHandle, Connection)> {
        let mut handle = self.launch(config).await?;

        match connect_channel(&config.channel_name, timeout).await {
            Ok(connection) => Ok((handle, connection)),
            Err(e) => {
                warn!(
                    "Runtime {} never opened channel '{}': {}",
                    handle.version(),
                    config.channel_name,
                    e
                );
                if let Err(kill_err) = handle.kill().await {
                    warn!("Failed to kill runtime {}: {}", handle.version(), kill_err);
                }
                Err(e)
            }
        }
    }

    async fn acquire(&self, config: &ConnectionConfig) -> Result<(InstalledRuntime, bool)> {
        let primary_err = match self.provider.acquire(&config.version).await {
            Ok(runtime) => return Ok((runtime, false)),
            Err(e) => e,
        };

        let fallback = match &config.fallback_version {
            Some(fallback) if primary_err.is_install_failure() => fallback,
            _ => return Err(primary_err),
        };

        warn!(
            "Runtime {} unavailable ({}), trying fallback {}",
            config.version, primary_err, fallback
        );
        match self.provider.acquire(fallback).await {
            Ok(runtime) => Ok((runtime, true)),
            Err(fallback_err) => {
                warn!("Fallback runtime {} unavailable: {}", fallback, fallback_err);
                Err(primary_err)
            }
        }
    }

    fn spawn(
        config: &ConnectionConfig,
        runtime: InstalledRuntime,
        args: Vec<String>,
        used_fallback: bool,
    ) -> Result<RuntimeProcessHandle> {
        let launch_error = |message: String| RelayError::LaunchFailed {
            version: runtime.version.clone(),
            message,
        };

        let mut cmd = Command::new(&runtime.binary_path);
        cmd.args(&args).stdin(Stdio::null());

        if let Some(dir) = runtime.binary_path.parent() {
            cmd.current_dir(dir);
        }

        match &config.log_file {
            Some(log_file) => {
                if let Some(parent) = log_file.parent() {
                    std::fs::create_dir_all(parent).ok();
                }
                let file = std::fs::File::create(log_file)
                    .map_err(|e| RelayError::io_with_path(e, log_file))?;
                let stdout_file = file
                    .try_clone()
                    .map_err(|e| RelayError::io_with_path(e, log_file))?;
                cmd.stdout(Stdio::from(stdout_file));
                cmd.stderr(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
            }
        }

        // Detach from the caller's process group so terminal signals don't reach it
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let child = cmd.spawn().map_err(|e| {
            launch_error(format!(
                "Failed to spawn {}: {}",
                runtime.binary_path.display(),
                e
            ))
        })?;
        let pid = child.id();

        info!(
            "Launched runtime {} (pid {:?}) on channel '{}'",
            runtime.version, pid, config.channel_name
        );

        Ok(RuntimeProcessHandle {
            child,
            pid,
            version: runtime.version,
            binary_path: runtime.binary_path,
            args,
            used_fallback,
        })
    }
}

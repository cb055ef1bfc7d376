//! Runtime acquisition trait.

use crate::installer::RuntimeInstaller;
use crate::progress::ProgressUpdate;
use crate::resolver::VersionResolver;
use crate::settings::RuntimeSettings;
use async_trait::async_trait;
use relay_core::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// A runtime ready to be spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRuntime {
    /// Concrete version.
    pub version: String,
    pub binary_path: PathBuf,
}

/// Turns a version spec into an installed runtime.
///
/// The launcher only talks to this trait, so acquisition can be swapped
/// out (pre-provisioned installs, tests).
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    async fn acquire(&self, spec: &str) -> Result<InstalledRuntime>;
}

/// Resolves against the distribution endpoints and installs on demand.
#[derive(Debug, Clone)]
pub struct RemoteRuntimeProvider {
    resolver: VersionResolver,
    installer: RuntimeInstaller,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl RemoteRuntimeProvider {
    pub fn new(resolver: VersionResolver, installer: RuntimeInstaller) -> Self {
        Self {
            resolver,
            installer,
            progress_tx: None,
        }
    }

    /// Provider sharing one proxy-aware HTTP client between both stages.
    pub fn from_settings(settings: &RuntimeSettings) -> Result<Self> {
        let resolver = VersionResolver::new(settings.http_client()?, settings.endpoints.clone());
        let installer = RuntimeInstaller::new(settings)?;
        Ok(Self::new(resolver, installer))
    }

    /// Report installation progress on `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    pub fn installer(&self) -> &RuntimeInstaller {
        &self.installer
    }
}

#[async_trait]
impl RuntimeProvider for RemoteRuntimeProvider {
    async fn acquire(&self, spec: &str) -> Result<InstalledRuntime> {
        let version = self.resolver.resolve(spec).await?;
        let binary_path = self
            .installer
            .ensure_installed_with_progress(&version, self.progress_tx.clone())
            .await?;
        Ok(InstalledRuntime {
            version,
            binary_path,
        })
    }
}

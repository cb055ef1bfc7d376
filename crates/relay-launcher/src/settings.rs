//! Where runtimes come from and where they go.

use relay_core::config::{NetworkConfig, PathsConfig, TransportConfig};
use relay_core::platform::{self, InstallationPath};
use relay_core::{HttpClient, ProxyConfig, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Distribution endpoints, all derived from one base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionEndpoints {
    base_url: String,
}

impl DistributionEndpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Newline-delimited list of concrete versions, newest first.
    pub fn index_url(&self) -> String {
        format!("{}/versions", self.base_url)
    }

    /// Plain-text concrete version for a named channel.
    pub fn channel_url(&self, channel: &str) -> String {
        format!("{}/{}", self.base_url, channel)
    }

    /// Archive for `version` on the current platform.
    pub fn archive_url(&self, version: &str) -> String {
        self.archive_url_for(version, platform::os_slug(), platform::arch_slug())
    }

    pub fn archive_url_for(&self, version: &str, os: &str, arch: &str) -> String {
        format!("{}/{}/{}/{}", self.base_url, os, arch, version)
    }
}

impl Default for DistributionEndpoints {
    fn default() -> Self {
        Self::new(NetworkConfig::DEFAULT_DISTRIBUTION_BASE)
    }
}

/// Everything resolution, installation and connection need from the host.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Ownership root for installations (normally the home directory).
    pub install_root: PathBuf,
    /// Vendor directory name below the root.
    pub vendor: String,
    pub endpoints: DistributionEndpoints,
    /// HTTPS proxy for both the index and archive requests.
    pub proxy: Option<ProxyConfig>,
    /// How long to wait for a launched runtime to open its channel.
    pub connect_timeout: Duration,
}

impl RuntimeSettings {
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            vendor: PathsConfig::DEFAULT_VENDOR.to_string(),
            endpoints: DistributionEndpoints::default(),
            proxy: None,
            connect_timeout: TransportConfig::CHANNEL_CONNECT_TIMEOUT,
        }
    }

    /// Settings for the current user: home directory root and the proxy
    /// from `HTTPS_PROXY` / `https_proxy`.
    ///
    /// This is the only place the process environment is consulted.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::new(platform::home_dir()?);
        settings.proxy = ProxyConfig::from_env();
        Ok(settings)
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn with_endpoints(mut self, endpoints: DistributionEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn installation_path(&self, version: &str) -> InstallationPath {
        InstallationPath::new(&self.install_root, &self.vendor, version)
    }

    /// HTTP client carrying the configured proxy.
    pub fn http_client(&self) -> Result<HttpClient> {
        HttpClient::new(self.proxy.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let endpoints = DistributionEndpoints::new("https://cdn.example.com/runtime/");
        assert_eq!(endpoints.index_url(), "https://cdn.example.com/runtime/versions");
        assert_eq!(
            endpoints.channel_url("stable"),
            "https://cdn.example.com/runtime/stable"
        );
        assert_eq!(
            endpoints.archive_url_for("10.65.1.2", "linux", "x64"),
            "https://cdn.example.com/runtime/linux/x64/10.65.1.2"
        );
        assert!(endpoints.archive_url("1.2.3.4").ends_with("/1.2.3.4"));
    }

    #[test]
    fn test_installation_path_uses_vendor() {
        let settings = RuntimeSettings::new("/home/me").with_vendor("Acme");
        assert_eq!(
            settings.installation_path("1.2.3.4").dir(),
            PathBuf::from("/home/me/Acme/Runtime/1.2.3.4")
        );
    }

    #[test]
    fn test_proxy_is_explicit() {
        let proxy = ProxyConfig::parse("http://proxy.corp:3128").unwrap();
        let settings = RuntimeSettings::new("/tmp").with_proxy(Some(proxy.clone()));
        let client = settings.http_client().unwrap();
        assert_eq!(client.proxy(), Some(&proxy));
    }
}

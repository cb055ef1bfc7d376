//! HTTP client for the distribution endpoints.
//!
//! Thin wrapper around reqwest that applies the configured proxy, the user
//! agent and the connect timeout. Short metadata requests (version index,
//! channel lookup) additionally carry a request timeout; archive downloads
//! do not, since runtime archives can take a long time on slow links.

use crate::config::NetworkConfig;
use crate::error::{RelayError, Result};
use crate::network::proxy::ProxyConfig;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

/// HTTP client shared by the resolver and the installer.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    proxy: Option<ProxyConfig>,
    request_timeout: Duration,
}

impl HttpClient {
    /// Create a client, routing HTTPS traffic through `proxy` when given.
    pub fn new(proxy: Option<&ProxyConfig>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT);

        // Only the explicit proxy applies; reqwest's own env lookup is disabled
        builder = match proxy {
            Some(proxy) => {
                debug!("Using HTTPS proxy {}", proxy.url());
                builder.proxy(proxy.to_reqwest()?)
            }
            None => builder.no_proxy(),
        };

        let client = builder.build().map_err(|e| RelayError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            client,
            proxy: proxy.cloned(),
            request_timeout: NetworkConfig::REQUEST_TIMEOUT,
        })
    }

    /// Override the timeout applied to metadata requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Get a reference to the underlying reqwest client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// The proxy this client was built with.
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    /// Start a streaming GET. The status is not checked.
    pub async fn get_stream(&self, url: &str) -> Result<Response> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::Network {
                message: format!("GET {} failed: {}", url, e),
                source: Some(e),
            })
    }

    /// GET a small text document, failing on any non-success status.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| RelayError::Network {
                message: format!("GET {} failed: {}", url, e),
                source: Some(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Network {
                message: format!("GET {} returned status {}", url, status),
                source: None,
            });
        }

        response.text().await.map_err(|e| RelayError::Network {
            message: format!("Failed to read body of {}: {}", url, e),
            source: Some(e),
        })
    }
}

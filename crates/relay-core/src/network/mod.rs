//! Network utilities for talking to the runtime distribution endpoints.
//!
//! This module provides:
//! - Explicit HTTPS proxy configuration
//! - An HTTP client wrapper applying proxy, user agent and timeouts
//! - A streaming download manager with progress tracking

mod client;
mod download;
mod proxy;

pub use client::HttpClient;
pub use download::{DownloadManager, DownloadProgress};
pub use proxy::ProxyConfig;

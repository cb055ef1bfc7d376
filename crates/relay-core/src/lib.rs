//! Relay Core - runtime plumbing shared by the launcher and API wrappers.
//!
//! This crate provides the pieces that do not depend on how a runtime is
//! acquired: the error taxonomy, configuration constants, the platform
//! layer (installation paths, race-free directory creation, permissions),
//! HTTP access to the distribution endpoints, and the IPC protocol spoken
//! with a running runtime.
//!
//! For resolving, installing and launching a runtime, see the
//! `relay-launcher` crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_core::{connect_channel, Identity};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> relay_core::Result<()> {
//!     let conn = connect_channel("my-channel", Duration::from_secs(30)).await?;
//!
//!     conn.subscribe(Identity::any(), "news", |event| {
//!         println!("{} says {}", event.source, event.payload);
//!     })
//!     .await?;
//!
//!     conn.publish("news", serde_json::json!("hello")).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ipc;
pub mod network;
pub mod platform;

// Re-export commonly used types
pub use config::{NetworkConfig, PathsConfig, TransportConfig};
pub use error::{RelayError, Result};
pub use ipc::{connect_channel, Connection, Event, EventRouter, Identity, ListenerId};
pub use network::{DownloadManager, DownloadProgress, HttpClient, ProxyConfig};
pub use platform::{create_dir_segments, DirCreation, InstallationPath};

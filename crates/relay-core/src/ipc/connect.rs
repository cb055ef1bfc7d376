//! Channel rendezvous with a freshly launched runtime.
//!
//! The launcher passes a channel name to the runtime, which opens the
//! channel once it is ready. The client polls until the channel accepts a
//! connection.
//!
//! # Platform Behavior
//! - **Unix**: domain socket at `<temp_dir>/<channel>.sock`
//! - **Windows**: named pipe `\\.\pipe\<channel>`

use super::connection::Connection;
use crate::config::TransportConfig;
use crate::error::{RelayError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Filesystem path of the Unix socket for `channel`.
#[cfg(unix)]
pub fn channel_path(channel: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{}.sock", channel))
}

/// Named pipe for `channel`.
#[cfg(windows)]
pub fn channel_path(channel: &str) -> String {
    format!(r"\\.\pipe\{}", channel)
}

#[cfg(unix)]
async fn try_open(channel: &str) -> std::io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(channel_path(channel)).await
}

#[cfg(windows)]
async fn try_open(
    channel: &str,
) -> std::io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(channel_path(channel))
}

/// Connect to `channel`, retrying until the runtime opens it.
///
/// # Errors
///
/// Returns `ChannelTimeout` if the channel does not accept a connection
/// within `timeout`.
pub async fn connect_channel(channel: &str, timeout: Duration) -> Result<Connection> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match try_open(channel).await {
            Ok(stream) => {
                info!("Connected to channel '{}' after {} attempts", channel, attempts);
                return Ok(Connection::start(stream));
            }
            Err(e) => {
                debug!("Channel '{}' not ready: {}", channel, e);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(RelayError::ChannelTimeout {
                channel: channel.to_string(),
                timeout,
            });
        }
        let wait = TransportConfig::CHANNEL_POLL_INTERVAL.min(deadline - now);
        tokio::time::sleep(wait).await;
    }
}

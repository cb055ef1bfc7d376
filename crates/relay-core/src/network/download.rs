//! Streaming download with progress reporting.
//!
//! Provides:
//! - Chunked streaming to disk (never buffers the whole archive)
//! - Monotonic percent-complete progress over an mpsc channel
//! - Atomic file operations (temp file → final)
//! - 404 distinguished from other failures

use crate::config::NetworkConfig;
use crate::error::{RelayError, Result};
use crate::network::client::HttpClient;
use futures::StreamExt;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Progress information for a download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes (if the server sent a content length).
    pub total_bytes: Option<u64>,
    /// Whole percent complete (0-100), when the total is known.
    pub percent: Option<u8>,
}

impl DownloadProgress {
    fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                ((bytes_downloaded.min(total) * 100) / total) as u8
            } else {
                100
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            percent,
        }
    }
}

/// Download manager for runtime archives.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    http: HttpClient,
    temp_suffix: String,
}

impl DownloadManager {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            temp_suffix: NetworkConfig::DOWNLOAD_TEMP_SUFFIX.to_string(),
        }
    }

    /// Download `url` for runtime `version` to `destination`.
    ///
    /// Data is streamed into `<destination>.part` and renamed into place once
    /// complete. Progress updates carry a strictly increasing percentage when
    /// the total size is known.
    ///
    /// # Errors
    ///
    /// - `DownloadNotFound` when the server answers 404
    /// - `DownloadFailed` for any other non-200 status or a broken stream
    /// - `Io` when the destination cannot be written
    pub async fn download(
        &self,
        url: &str,
        version: &str,
        destination: &Path,
        progress_tx: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<u64> {
        let temp_path = PathBuf::from(format!(
            "{}{}",
            destination.display(),
            self.temp_suffix
        ));

        match self.do_download(url, version, &temp_path, progress_tx).await {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::rename(&temp_path, destination).await {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(RelayError::Io {
                        message: format!("Failed to move download to final destination: {}", e),
                        path: Some(destination.to_path_buf()),
                        source: Some(e),
                    });
                }

                info!("Downloaded {} bytes to {}", bytes, destination.display());
                Ok(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    async fn do_download(
        &self,
        url: &str,
        version: &str,
        temp_path: &Path,
        progress_tx: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<u64> {
        let response = self
            .http
            .get_stream(url)
            .await
            .map_err(|e| RelayError::DownloadFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RelayError::DownloadNotFound {
                version: version.to_string(),
                url: url.to_string(),
            });
        }
        if status != StatusCode::OK {
            return Err(RelayError::DownloadFailed {
                url: url.to_string(),
                message: format!("Download failed with status {}", status),
            });
        }

        let total_bytes = response.content_length();
        let mut file = tokio::fs::File::create(temp_path)
            .await
            .map_err(|e| RelayError::Io {
                message: format!("Failed to create temp file: {}", e),
                path: Some(temp_path.to_path_buf()),
                source: Some(e),
            })?;

        let mut tracker = ProgressTracker::new(total_bytes, progress_tx);
        tracker.start().await;

        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| RelayError::DownloadFailed {
                url: url.to_string(),
                message: format!("Error reading download stream: {}", e),
            })?;

            file.write_all(&chunk).await.map_err(|e| RelayError::Io {
                message: format!("Failed to write to temp file: {}", e),
                path: Some(temp_path.to_path_buf()),
                source: Some(e),
            })?;

            tracker.advance(chunk.len() as u64).await;
        }

        file.flush().await.map_err(|e| RelayError::Io {
            message: format!("Failed to flush temp file: {}", e),
            path: Some(temp_path.to_path_buf()),
            source: Some(e),
        })?;

        debug!("Finished streaming {} ({} bytes)", url, tracker.bytes);
        Ok(tracker.bytes)
    }
}

/// Emits a progress update whenever the whole percentage moves forward.
///
/// Without a known total every chunk is reported (bytes still increase).
struct ProgressTracker {
    bytes: u64,
    total: Option<u64>,
    last_percent: Option<u8>,
    tx: Option<mpsc::Sender<DownloadProgress>>,
}

impl ProgressTracker {
    fn new(total: Option<u64>, tx: Option<mpsc::Sender<DownloadProgress>>) -> Self {
        Self {
            bytes: 0,
            total,
            last_percent: None,
            tx,
        }
    }

    async fn start(&mut self) {
        self.emit().await;
    }

    async fn advance(&mut self, len: u64) {
        self.bytes += len;
        if len > 0 {
            self.emit().await;
        }
    }

    async fn emit(&mut self) {
        let Some(tx) = &self.tx else {
            return;
        };

        let progress = DownloadProgress::new(self.bytes, self.total);
        if let Some(percent) = progress.percent {
            if self.last_percent.is_some_and(|last| percent <= last) {
                return;
            }
            self.last_percent = Some(percent);
        }
        let _ = tx.send(progress).await;
    }
}

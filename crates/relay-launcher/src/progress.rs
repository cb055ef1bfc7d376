//! Installation progress reporting.

use relay_core::DownloadProgress;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Installation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStage {
    Download,
    Extract,
    Finalize,
}

/// Progress update sent through channels.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Stage changed.
    StageChanged { stage: InstallStage, message: String },
    /// Download progress. `percent` only ever increases.
    Download {
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        percent: Option<u8>,
    },
    /// Installation finished.
    Completed { success: bool },
}

impl From<DownloadProgress> for ProgressUpdate {
    fn from(progress: DownloadProgress) -> Self {
        ProgressUpdate::Download {
            downloaded_bytes: progress.bytes_downloaded,
            total_bytes: progress.total_bytes,
            percent: progress.percent,
        }
    }
}

/// Optional sink for progress updates. A closed receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProgressReporter {
    tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl ProgressReporter {
    pub(crate) fn new(tx: Option<mpsc::Sender<ProgressUpdate>>) -> Self {
        Self { tx }
    }

    pub(crate) async fn send(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(update).await;
        }
    }

    pub(crate) async fn stage(&self, stage: InstallStage, message: impl Into<String>) {
        self.send(ProgressUpdate::StageChanged {
            stage,
            message: message.into(),
        })
        .await;
    }

    /// Channel to hand to the download manager, plus the task forwarding
    /// its updates here. `None` when nobody is listening.
    pub(crate) fn download_channel(
        &self,
    ) -> Option<(mpsc::Sender<DownloadProgress>, tokio::task::JoinHandle<()>)> {
        let outer = self.tx.clone()?;
        let (tx, mut rx) = mpsc::channel::<DownloadProgress>(32);
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                if outer.send(progress.into()).await.is_err() {
                    break;
                }
            }
        });
        Some((tx, forwarder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&InstallStage::Extract).unwrap(),
            "\"extract\""
        );
    }

    #[tokio::test]
    async fn test_download_updates_are_forwarded() {
        let (tx, mut rx) = mpsc::channel(8);
        let reporter = ProgressReporter::new(Some(tx));
        let (download_tx, forwarder) = reporter.download_channel().unwrap();

        download_tx
            .send(DownloadProgress {
                bytes_downloaded: 5,
                total_bytes: Some(10),
                percent: Some(50),
            })
            .await
            .unwrap();
        drop(download_tx);
        forwarder.await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ProgressUpdate::Download {
                downloaded_bytes: 5,
                total_bytes: Some(10),
                percent: Some(50),
            })
        );
    }

    #[tokio::test]
    async fn test_silent_reporter() {
        let reporter = ProgressReporter::default();
        assert!(reporter.download_channel().is_none());
        reporter.stage(InstallStage::Download, "ignored").await;
    }
}

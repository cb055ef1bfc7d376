//! Runtime installation.
//!
//! Downloads the platform archive for a concrete version into a transient
//! staging directory, extracts it into the installation directory and
//! removes the staging directory again. An existing binary short-circuits
//! the whole process.

use crate::progress::{InstallStage, ProgressReporter, ProgressUpdate};
use crate::settings::{DistributionEndpoints, RuntimeSettings};
use relay_core::config::PathsConfig;
use relay_core::platform::{
    create_dir_segments, is_supported_platform, os_slug, set_executable, InstallationPath,
};
use relay_core::{DownloadManager, RelayError, Result};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Archive formats the distribution may serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarZst,
    Zip,
}

impl ArchiveFormat {
    /// Identify the format from the first bytes of the file.
    pub fn detect(header: &[u8]) -> Option<Self> {
        if header.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveFormat::TarGz)
        } else if header.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(ArchiveFormat::TarZst)
        } else if header.starts_with(b"PK\x03\x04") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }
}

/// Ensures runtime versions are present on disk.
///
/// Concurrent installs of the same version are not coordinated; callers
/// that may launch the same version twice at once must serialize.
#[derive(Debug, Clone)]
pub struct RuntimeInstaller {
    install_root: PathBuf,
    vendor: String,
    endpoints: DistributionEndpoints,
    downloads: DownloadManager,
}

impl RuntimeInstaller {
    pub fn new(settings: &RuntimeSettings) -> Result<Self> {
        Ok(Self {
            install_root: settings.install_root.clone(),
            vendor: settings.vendor.clone(),
            endpoints: settings.endpoints.clone(),
            downloads: DownloadManager::new(settings.http_client()?),
        })
    }

    pub fn installation_path(&self, version: &str) -> InstallationPath {
        InstallationPath::new(&self.install_root, &self.vendor, version)
    }

    /// Whether the binary for `version` is already on disk.
    pub async fn is_installed(&self, version: &str) -> bool {
        tokio::fs::try_exists(self.installation_path(version).binary())
            .await
            .unwrap_or(false)
    }

    /// Make sure `version` is installed and return its binary path.
    pub async fn ensure_installed(&self, version: &str) -> Result<PathBuf> {
        self.ensure_installed_with_progress(version, None).await
    }

    /// Like [`RuntimeInstaller::ensure_installed`], reporting progress.
    ///
    /// On failure the installation directory is left in place for
    /// diagnosis; only the staging directory is removed.
    pub async fn ensure_installed_with_progress(
        &self,
        version: &str,
        progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> Result<PathBuf> {
        let path = self.installation_path(version);
        path.validate()
            .map_err(|e| Self::install_error(version, e.to_string()))?;
        let binary = path.binary();

        if self.is_installed(version).await {
            set_executable(&binary).await?;
            debug!("Runtime {} already installed at {}", version, binary.display());
            return Ok(binary);
        }

        if !is_supported_platform() {
            return Err(Self::install_error(
                version,
                format!("runtime is not distributed for platform '{}'", os_slug()),
            ));
        }

        info!("Installing runtime {} into {}", version, path.dir().display());
        let progress = ProgressReporter::new(progress_tx);
        let staging = path.staging_dir();

        Self::remove_stale_staging(&staging).await?;
        create_dir_segments(path.root(), &path.segments()).await?;
        create_dir_segments(&path.dir(), &[PathsConfig::STAGING_DIR_NAME]).await?;

        let result = self.do_install(&path, &staging, &progress).await;

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove staging directory {}: {}", staging.display(), e);
            }
        }

        progress
            .send(ProgressUpdate::Completed {
                success: result.is_ok(),
            })
            .await;

        match &result {
            Ok(binary) => info!("Runtime {} installed at {}", version, binary.display()),
            Err(e) => warn!("Installation of runtime {} failed: {}", version, e),
        }
        result
    }

    async fn remove_stale_staging(staging: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(staging).await {
            Ok(()) => {
                debug!("Removed stale staging directory {}", staging.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RelayError::io_with_path(e, staging)),
        }
    }

    async fn do_install(
        &self,
        path: &InstallationPath,
        staging: &Path,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        let version = path.version();

        // Download
        progress
            .stage(InstallStage::Download, format!("Downloading runtime {}", version))
            .await;
        let url = self.endpoints.archive_url(version);
        let archive = staging.join(format!("{}{}", version, PathsConfig::ARCHIVE_FILE_SUFFIX));

        let (download_tx, forwarder) = match progress.download_channel() {
            Some((tx, handle)) => (Some(tx), Some(handle)),
            None => (None, None),
        };
        let downloaded = self
            .downloads
            .download(&url, version, &archive, download_tx)
            .await;
        if let Some(forwarder) = forwarder {
            let _ = forwarder.await;
        }
        downloaded?;

        // Extract
        progress
            .stage(InstallStage::Extract, "Extracting archive")
            .await;
        let dest = path.dir();
        let extract_result = {
            let archive = archive.clone();
            let dest = dest.clone();
            tokio::task::spawn_blocking(move || extract_archive(&archive, &dest)).await
        };
        match extract_result {
            Ok(Ok(format)) => debug!("Extracted {:?} archive into {}", format, dest.display()),
            Ok(Err(e)) => return Err(Self::install_error(version, e.to_string())),
            Err(e) => {
                return Err(Self::install_error(
                    version,
                    format!("Extraction task failed: {}", e),
                ))
            }
        }

        // Finalize
        progress
            .stage(InstallStage::Finalize, "Finalizing installation")
            .await;
        let binary = path.binary();
        if !tokio::fs::try_exists(&binary).await.unwrap_or(false) {
            return Err(Self::install_error(
                version,
                format!("Archive did not contain {}", binary.display()),
            ));
        }
        set_executable(&binary).await?;

        Ok(binary)
    }

    fn install_error(version: &str, message: impl Into<String>) -> RelayError {
        RelayError::InstallFailed {
            version: version.to_string(),
            message: message.into(),
        }
    }
}

/// Extract `archive_path` into `dest_dir`, detecting the format.
///
/// Blocking; run on the blocking pool.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> Result<ArchiveFormat> {
    let mut header = [0u8; 4];
    let read = File::open(archive_path)
        .and_then(|mut f| f.read(&mut header))
        .map_err(|e| RelayError::io_with_path(e, archive_path))?;

    let format = ArchiveFormat::detect(&header[..read]).ok_or_else(|| RelayError::Validation {
        field: "archive".to_string(),
        message: format!("Unrecognized archive format: {}", archive_path.display()),
    })?;

    match format {
        ArchiveFormat::TarGz => extract_tar_gz(archive_path, dest_dir)?,
        ArchiveFormat::TarZst => extract_tar_zst(archive_path, dest_dir)?,
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir)?,
    }
    Ok(format)
}

fn open_archive(archive_path: &Path) -> Result<BufReader<File>> {
    File::open(archive_path)
        .map(BufReader::new)
        .map_err(|e| RelayError::io_with_path(e, archive_path))
}

fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let decoder = flate2::read::GzDecoder::new(open_archive(archive_path)?);
    tar::Archive::new(decoder)
        .unpack(dest_dir)
        .map_err(|e| RelayError::Io {
            message: format!("Failed to extract tarball: {}", e),
            path: Some(dest_dir.to_path_buf()),
            source: Some(e),
        })
}

fn extract_tar_zst(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let decoder = zstd::Decoder::new(open_archive(archive_path)?).map_err(|e| RelayError::Io {
        message: format!("Failed to create zstd decoder: {}", e),
        path: Some(archive_path.to_path_buf()),
        source: Some(e),
    })?;
    tar::Archive::new(decoder)
        .unpack(dest_dir)
        .map_err(|e| RelayError::Io {
            message: format!("Failed to extract tar.zst: {}", e),
            path: Some(dest_dir.to_path_buf()),
            source: Some(e),
        })
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(open_archive(archive_path)?).map_err(|e| {
        RelayError::Validation {
            field: "archive".to_string(),
            message: format!("Invalid zip archive: {}", e),
        }
    })?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| RelayError::Validation {
            field: "archive".to_string(),
            message: format!("Failed to read zip entry {}: {}", i, e),
        })?;

        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let outpath = dest_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(|e| RelayError::io_with_path(e, &outpath))?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RelayError::io_with_path(e, parent))?;
            }
            let mut outfile =
                File::create(&outpath).map_err(|e| RelayError::io_with_path(e, &outpath))?;
            std::io::copy(&mut entry, &mut outfile)
                .map_err(|e| RelayError::io_with_path(e, &outpath))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    Ok(())
}

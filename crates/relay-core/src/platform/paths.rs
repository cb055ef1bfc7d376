//! Installation layout and directory creation.
//!
//! Runtimes live under `<home>/<vendor>/Runtime/<version>`, with the
//! platform binary somewhere inside that directory and a transient `tmp/`
//! staging directory next to it while an install is in flight.

use crate::config::PathsConfig;
use crate::error::{RelayError, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// The user's home directory.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| RelayError::Config {
        message: "Could not determine home directory".to_string(),
    })
}

/// Path of the runtime binary relative to its installation directory.
///
/// # Platform Behavior
/// - **Linux**: `openfin`
/// - **macOS**: `OpenFin.app/Contents/MacOS/OpenFin`
/// - **Windows**: `OpenFin/openfin.exe`
pub fn runtime_binary_relative() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        PathBuf::from("OpenFin.app")
            .join("Contents")
            .join("MacOS")
            .join("OpenFin")
    }
    #[cfg(windows)]
    {
        PathBuf::from("OpenFin").join("openfin.exe")
    }
    #[cfg(not(any(target_os = "macos", windows)))]
    {
        PathBuf::from("openfin")
    }
}

/// Ownership-rooted location of one runtime version on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationPath {
    root: PathBuf,
    vendor: String,
    version: String,
}

impl InstallationPath {
    pub fn new(root: impl Into<PathBuf>, vendor: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            vendor: vendor.into(),
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Check that the version stays a single directory below the runtime
    /// root. Must pass before anything is created on disk.
    pub fn validate(&self) -> Result<()> {
        let mut components = Path::new(&self.version).components();
        let single = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        let charset = self
            .version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if single && charset {
            Ok(())
        } else {
            Err(RelayError::Validation {
                field: "version".to_string(),
                message: format!("'{}' is not a valid installation directory name", self.version),
            })
        }
    }

    /// The ownership root (normally the home directory).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path segments below the root, in creation order.
    pub fn segments(&self) -> [&str; 3] {
        [
            self.vendor.as_str(),
            PathsConfig::RUNTIME_DIR_NAME,
            self.version.as_str(),
        ]
    }

    /// `<root>/<vendor>/Runtime/<version>`
    pub fn dir(&self) -> PathBuf {
        self.segments()
            .iter()
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// The platform binary inside the installation directory.
    pub fn binary(&self) -> PathBuf {
        self.dir().join(runtime_binary_relative())
    }

    /// Transient staging directory used only while installing.
    pub fn staging_dir(&self) -> PathBuf {
        self.dir().join(PathsConfig::STAGING_DIR_NAME)
    }
}

/// Outcome of creating one directory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirCreation {
    Created,
    AlreadyExists,
}

/// Create `root/seg1/seg2/...` one segment at a time.
///
/// A segment that already exists as a directory is adopted, so concurrent
/// creators never fail each other. Any other error is returned with the
/// offending path. The root itself must already exist.
pub async fn create_dir_segments<S: AsRef<Path>>(
    root: &Path,
    segments: &[S],
) -> Result<Vec<DirCreation>> {
    let mut current = root.to_path_buf();
    let mut outcomes = Vec::with_capacity(segments.len());

    for segment in segments {
        current.push(segment);
        let outcome = match tokio::fs::create_dir(&current).await {
            Ok(()) => DirCreation::Created,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !tokio::fs::metadata(&current)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false)
                {
                    return Err(RelayError::io_with_path(e, &current));
                }
                DirCreation::AlreadyExists
            }
            Err(e) => return Err(RelayError::io_with_path(e, &current)),
        };
        debug!("{:?}: {}", outcome, current.display());
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_installation_path_layout() {
        let path = InstallationPath::new("/home/me", "OpenFin", "10.65.1.2");
        assert_eq!(
            path.dir(),
            PathBuf::from("/home/me/OpenFin/Runtime/10.65.1.2")
        );
        assert_eq!(
            path.staging_dir(),
            PathBuf::from("/home/me/OpenFin/Runtime/10.65.1.2/tmp")
        );
        assert!(path.binary().starts_with(path.dir()));
        assert_eq!(path.version(), "10.65.1.2");
    }

    #[test]
    fn test_validate_rejects_escaping_versions() {
        assert!(InstallationPath::new("/home/me", "OpenFin", "10.65.1.2")
            .validate()
            .is_ok());
        for bad in ["", ".", "..", "../../../escape", "a/b", "a\\b", "/abs", "1.2\n<html>"] {
            let result = InstallationPath::new("/home/me", "OpenFin", bad).validate();
            assert!(
                matches!(result, Err(RelayError::Validation { .. })),
                "accepted {:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_create_dir_segments_fresh() {
        let temp = TempDir::new().unwrap();
        let outcomes = create_dir_segments(temp.path(), &["a", "b", "c"])
            .await
            .unwrap();
        assert_eq!(outcomes, vec![DirCreation::Created; 3]);
        assert!(temp.path().join("a/b/c").is_dir());
    }

    #[tokio::test]
    async fn test_create_dir_segments_adopts_existing() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();

        let outcomes = create_dir_segments(temp.path(), &["a", "b", "c"])
            .await
            .unwrap();
        assert_eq!(
            outcomes,
            vec![
                DirCreation::AlreadyExists,
                DirCreation::AlreadyExists,
                DirCreation::Created
            ]
        );

        // Running again adopts every segment
        let again = create_dir_segments(temp.path(), &["a", "b", "c"])
            .await
            .unwrap();
        assert_eq!(again, vec![DirCreation::AlreadyExists; 3]);
    }

    #[tokio::test]
    async fn test_create_dir_segments_concurrent_creators() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                tokio::spawn(async move {
                    create_dir_segments(&root, &["vendor", "Runtime", "1.2.3.4"]).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert!(root.join("vendor/Runtime/1.2.3.4").is_dir());
    }

    #[tokio::test]
    async fn test_create_dir_segments_file_in_the_way() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a"), b"not a dir").unwrap();

        let result = create_dir_segments(temp.path(), &["a", "b"]).await;
        match result {
            Err(RelayError::Io { path, .. }) => assert_eq!(path, Some(temp.path().join("a"))),
            other => panic!("Expected Io error, got: {:?}", other),
        }
    }
}

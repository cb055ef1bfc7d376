//! Per-launch configuration supplied by the caller.

use std::path::{Path, PathBuf};

/// Immutable description of one launch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Requested runtime version spec (exact, wildcard pattern or channel).
    pub version: String,
    /// Tried once if acquiring `version` fails.
    pub fallback_version: Option<String>,
    /// Extra runtime arguments, whitespace separated. Placed first.
    pub extra_args: Option<String>,
    pub security_realm: Option<String>,
    /// Adds verbose logging and console attachment flags.
    pub verbose: bool,
    /// Startup manifest location.
    pub manifest_url: String,
    /// Channel the runtime opens for this client.
    pub channel_name: String,
    /// Where the runtime's stdout/stderr go. Discarded when unset.
    pub log_file: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Config for `version` with a fresh random channel name.
    pub fn new(manifest_url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            fallback_version: None,
            extra_args: None,
            security_realm: None,
            verbose: false,
            manifest_url: manifest_url.into(),
            channel_name: uuid::Uuid::new_v4().to_string(),
            log_file: None,
        }
    }

    pub fn with_fallback_version(mut self, version: impl Into<String>) -> Self {
        self.fallback_version = Some(version.into());
        self
    }

    pub fn with_extra_args(mut self, args: impl Into<String>) -> Self {
        self.extra_args = Some(args.into());
        self
    }

    pub fn with_security_realm(mut self, realm: impl Into<String>) -> Self {
        self.security_realm = Some(realm.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_channel_name(mut self, channel: impl Into<String>) -> Self {
        self.channel_name = channel.into();
        self
    }

    pub fn with_log_file(mut self, path: impl AsRef<Path>) -> Self {
        self.log_file = Some(path.as_ref().to_path_buf());
        self
    }
}

/// Argument vector for a runtime launched as `launched_version`.
///
/// Order: caller-supplied extras, startup manifest, version keyword,
/// channel name, then the optional realm and verbosity flags.
pub fn build_args(config: &ConnectionConfig, launched_version: &str) -> Vec<String> {
    let mut args: Vec<String> = config
        .extra_args
        .as_deref()
        .map(|extra| extra.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    args.push(format!("--startup-url={}", config.manifest_url));
    args.push(format!("--version-keyword={}", launched_version));
    args.push(format!(
        "--runtime-information-channel-v6={}",
        config.channel_name
    ));

    if let Some(realm) = &config.security_realm {
        args.push(format!("--security-realm={}", realm));
    }
    if config.verbose {
        args.push("--v=1".to_string());
        args.push("--attach-console".to_string());
    }

    args
}

//! Runtime version resolution.
//!
//! A version spec is one of:
//! - a concrete dotted version (`10.65.1.2`), used verbatim
//! - a dotted pattern with `*` components (`10.*.*.*`), matched against the
//!   remote version index
//! - anything else, treated as a channel name (`stable`) and looked up remotely
//!
//! Resolution never retries; fallback is the launcher's job.

use crate::settings::DistributionEndpoints;
use relay_core::{HttpClient, RelayError, Result};
use std::fmt;
use tracing::{debug, info};

const COMPONENTS: usize = 4;
const WILDCARD: &str = "*";

/// Parsed form of a user-supplied version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// Four numeric components.
    Exact(String),
    /// Four components, at least one wildcard. `None` marks a wildcard.
    Pattern(Vec<Option<String>>),
    /// A named release channel.
    Channel(String),
}

impl VersionSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(RelayError::VersionResolution {
                spec: spec.to_string(),
                message: "empty version".to_string(),
            });
        }

        let parts: Vec<&str> = spec.split('.').collect();
        let dotted = parts.len() == COMPONENTS
            && parts
                .iter()
                .all(|p| *p == WILDCARD || (!p.is_empty() && p.chars().all(|c| c.is_ascii_digit())));

        if dotted {
            if parts.iter().all(|p| *p != WILDCARD) {
                return Ok(VersionSpec::Exact(spec.to_string()));
            }
            let components = parts
                .iter()
                .map(|p| (*p != WILDCARD).then(|| p.to_string()))
                .collect();
            return Ok(VersionSpec::Pattern(components));
        }

        let valid_channel = spec
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid_channel {
            return Err(RelayError::VersionResolution {
                spec: spec.to_string(),
                message: "not a version and not a valid channel name".to_string(),
            });
        }
        Ok(VersionSpec::Channel(spec.to_string()))
    }

    /// Whether `candidate` satisfies a pattern. Exact specs compare verbatim;
    /// channels match nothing.
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            VersionSpec::Exact(v) => v == candidate,
            VersionSpec::Pattern(components) => {
                let parts: Vec<&str> = candidate.split('.').collect();
                parts.len() == COMPONENTS
                    && components
                        .iter()
                        .zip(&parts)
                        .all(|(fixed, part)| fixed.as_deref().map_or(true, |f| f == *part))
            }
            VersionSpec::Channel(_) => false,
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Exact(v) | VersionSpec::Channel(v) => write!(f, "{}", v),
            VersionSpec::Pattern(components) => {
                let text: Vec<&str> = components
                    .iter()
                    .map(|c| c.as_deref().unwrap_or(WILDCARD))
                    .collect();
                write!(f, "{}", text.join("."))
            }
        }
    }
}

/// Turns version specs into concrete versions.
#[derive(Debug, Clone)]
pub struct VersionResolver {
    http: HttpClient,
    endpoints: DistributionEndpoints,
}

impl VersionResolver {
    pub fn new(http: HttpClient, endpoints: DistributionEndpoints) -> Self {
        Self { http, endpoints }
    }

    /// Resolve `spec` to a concrete version.
    ///
    /// Exact specs return immediately without touching the network. Patterns
    /// return the first index entry that matches; an all-wildcard pattern
    /// therefore returns the newest published version.
    pub async fn resolve(&self, spec: &str) -> Result<String> {
        let parsed = VersionSpec::parse(spec)?;
        let resolved = match &parsed {
            VersionSpec::Exact(version) => return Ok(version.clone()),
            VersionSpec::Pattern(_) => self.resolve_pattern(spec, &parsed).await?,
            VersionSpec::Channel(channel) => self.resolve_channel(spec, channel).await?,
        };
        info!("Resolved runtime version {} to {}", spec, resolved);
        Ok(resolved)
    }

    /// Fetch the ordered list of published versions.
    pub async fn fetch_index(&self) -> Result<Vec<String>> {
        let body = self.http.get_text(&self.endpoints.index_url()).await?;
        Ok(body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn resolve_pattern(&self, spec: &str, pattern: &VersionSpec) -> Result<String> {
        let index = self
            .fetch_index()
            .await
            .map_err(|e| Self::resolution_error(spec, format!("version index unavailable: {}", e)))?;
        debug!("Version index has {} entries", index.len());

        index
            .into_iter()
            .find(|candidate| Self::is_concrete(candidate) && pattern.matches(candidate))
            .ok_or_else(|| Self::resolution_error(spec, "no published version matches"))
    }

    async fn resolve_channel(&self, spec: &str, channel: &str) -> Result<String> {
        let body = self
            .http
            .get_text(&self.endpoints.channel_url(channel))
            .await
            .map_err(|e| Self::resolution_error(spec, format!("channel lookup failed: {}", e)))?;

        let version = body.trim();
        if version.is_empty() {
            return Err(Self::resolution_error(spec, "channel lookup returned no version"));
        }
        if !Self::is_concrete(version) {
            return Err(Self::resolution_error(
                spec,
                format!("channel lookup returned '{}', not a concrete version", version.escape_debug()),
            ));
        }
        Ok(version.to_string())
    }

    /// Only four numeric components may leave the resolver; the result
    /// becomes a directory name and part of the archive URL.
    fn is_concrete(candidate: &str) -> bool {
        matches!(VersionSpec::parse(candidate), Ok(VersionSpec::Exact(v)) if v == candidate)
    }

    fn resolution_error(spec: &str, message: impl Into<String>) -> RelayError {
        RelayError::VersionResolution {
            spec: spec.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INDEX: &str = "10.65.1.2\n10.65.0.9\n9.0.0.0\n";

    fn resolver(server: &MockServer) -> VersionResolver {
        VersionResolver::new(
            HttpClient::new(None).unwrap(),
            DistributionEndpoints::new(server.uri()),
        )
    }

    async fn serve_index(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
            .mount(server)
            .await;
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!(
            VersionSpec::parse("10.65.1.2").unwrap(),
            VersionSpec::Exact("10.65.1.2".to_string())
        );
        assert_eq!(
            VersionSpec::parse("10.*.*.*").unwrap(),
            VersionSpec::Pattern(vec![Some("10".to_string()), None, None, None])
        );
        assert_eq!(
            VersionSpec::parse("stable").unwrap(),
            VersionSpec::Channel("stable".to_string())
        );
        // Not four components: a channel name
        assert_eq!(
            VersionSpec::parse("10.65").unwrap(),
            VersionSpec::Channel("10.65".to_string())
        );
        assert!(VersionSpec::parse("").is_err());
        assert!(VersionSpec::parse("../etc").is_err());
    }

    #[test]
    fn test_pattern_matching() {
        let spec = VersionSpec::parse("10.*.1.*").unwrap();
        assert!(spec.matches("10.65.1.2"));
        assert!(!spec.matches("10.65.0.9"));
        assert!(!spec.matches("10.65.1"));
        assert_eq!(spec.to_string(), "10.*.1.*");
    }

    #[tokio::test]
    async fn test_exact_spec_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let version = resolver(&server).resolve("10.65.1.2").await.unwrap();
        assert_eq!(version, "10.65.1.2");
    }

    #[tokio::test]
    async fn test_wildcard_takes_first_index_match() {
        let server = MockServer::start().await;
        serve_index(&server).await;
        let resolver = resolver(&server);

        assert_eq!(resolver.resolve("10.*.*.*").await.unwrap(), "10.65.1.2");
        assert_eq!(resolver.resolve("10.65.0.*").await.unwrap(), "10.65.0.9");
        assert_eq!(resolver.resolve("9.*.*.*").await.unwrap(), "9.0.0.0");
        // Deterministic against an unchanged index
        assert_eq!(resolver.resolve("10.*.*.*").await.unwrap(), "10.65.1.2");
    }

    #[tokio::test]
    async fn test_all_wildcard_takes_newest() {
        let server = MockServer::start().await;
        serve_index(&server).await;

        assert_eq!(resolver(&server).resolve("*.*.*.*").await.unwrap(), "10.65.1.2");
    }

    #[tokio::test]
    async fn test_no_match_is_resolution_error() {
        let server = MockServer::start().await;
        serve_index(&server).await;

        match resolver(&server).resolve("11.*.*.*").await {
            Err(RelayError::VersionResolution { spec, .. }) => assert_eq!(spec, "11.*.*.*"),
            other => panic!("Expected VersionResolution, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_index_is_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/versions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = resolver(&server).resolve("10.*.*.*").await;
        assert!(matches!(result, Err(RelayError::VersionResolution { .. })));
    }

    #[tokio::test]
    async fn test_channel_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stable"))
            .respond_with(ResponseTemplate::new(200).set_body_string("10.65.1.2\n"))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(resolver(&server).resolve("stable").await.unwrap(), "10.65.1.2");
    }

    #[tokio::test]
    async fn test_channel_body_must_be_a_version() {
        for body in ["../../../escape\n", "<html>\n<body>10.65.1.2</body>\n</html>", "10.*.*.*", "stable"] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/stable"))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;

            match resolver(&server).resolve("stable").await {
                Err(RelayError::VersionResolution { spec, .. }) => assert_eq!(spec, "stable"),
                other => panic!("Expected VersionResolution for {:?}, got: {:?}", body, other),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_index_entries_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/versions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("10.65.1.x/y\n10.65.1.\n10.65.1.3\n"),
            )
            .mount(&server)
            .await;

        assert_eq!(resolver(&server).resolve("10.65.1.*").await.unwrap(), "10.65.1.3");
    }

    #[tokio::test]
    async fn test_unknown_channel_is_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = resolver(&server).resolve("nightly").await;
        assert!(matches!(result, Err(RelayError::VersionResolution { .. })));
    }
}

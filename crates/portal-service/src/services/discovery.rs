//! OpenID Connect discovery.
//!
//! The discovery document is fetched from the identity provider once per
//! process and cached. A failed fetch caches nothing, so the next caller
//! tries again.

use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

/// Path of the discovery document below the authority.
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Default timeout for discovery requests.
const DISCOVERY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery document URL for an authority.
///
/// A trailing slash is added to the authority when missing.
#[must_use]
pub fn discovery_url(authority: &str) -> String {
    if authority.ends_with('/') {
        format!("{authority}{DISCOVERY_PATH}")
    } else {
        format!("{authority}/{DISCOVERY_PATH}")
    }
}

/// Errors fetching the discovery document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Discovery request failed: {0}")]
    Http(String),

    #[error("Discovery endpoint returned status {0}")]
    Status(u16),

    #[error("Invalid discovery document: {0}")]
    InvalidDocument(String),
}

/// The parts of the provider metadata the portal uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Fetches and caches the provider's discovery document.
#[derive(Debug)]
pub struct DiscoveryClient {
    url: String,
    http_client: Client,
    document: OnceCell<Arc<DiscoveryDocument>>,
}

impl DiscoveryClient {
    /// Create a client for `authority`.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::Http` if the HTTP client cannot be built.
    pub fn new(authority: &str) -> Result<Self, DiscoveryError> {
        let http_client = Client::builder()
            .timeout(DISCOVERY_REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| DiscoveryError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: discovery_url(authority),
            http_client,
            document: OnceCell::new(),
        })
    }

    /// Discovery document URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cached document, fetching it on first use.
    ///
    /// Concurrent first callers share one fetch.
    ///
    /// # Errors
    ///
    /// - `DiscoveryError::Http` - Transport failure
    /// - `DiscoveryError::Status` - Non-success status
    /// - `DiscoveryError::InvalidDocument` - Body is not a discovery document
    pub async fn document(&self) -> Result<Arc<DiscoveryDocument>, DiscoveryError> {
        self.document
            .get_or_try_init(|| self.fetch())
            .await
            .map(Arc::clone)
    }

    #[instrument(skip_all, name = "portal.discovery.fetch", fields(url = %self.url))]
    async fn fetch(&self) -> Result<Arc<DiscoveryDocument>, DiscoveryError> {
        let started = Instant::now();
        let response = self.http_client.get(&self.url).send().await.map_err(|e| {
            warn!(target: "portal.discovery", error = %e, "Discovery request failed");
            DiscoveryError::Http(e.to_string())
        })?;

        let status = response.status();
        debug!(
            target: "portal.discovery",
            url = %self.url,
            status = %status,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Discovery endpoint responded"
        );

        if !status.is_success() {
            warn!(target: "portal.discovery", status = %status, "Discovery endpoint returned error status");
            return Err(DiscoveryError::Status(status.as_u16()));
        }

        let document: DiscoveryDocument = response.json().await.map_err(|e| {
            warn!(target: "portal.discovery", error = %e, "Failed to parse discovery document");
            DiscoveryError::InvalidDocument(e.to_string())
        })?;

        debug!(
            target: "portal.discovery",
            issuer = %document.issuer,
            token_endpoint = %document.token_endpoint,
            "Discovery document cached"
        );

        Ok(Arc::new(document))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn document_json(base: &str) -> serde_json::Value {
        serde_json::json!({
            "issuer": base,
            "token_endpoint": format!("{base}/connect/token"),
            "userinfo_endpoint": format!("{base}/connect/userinfo"),
            "jwks_uri": format!("{base}/.well-known/openid-configuration/jwks"),
            "end_session_endpoint": format!("{base}/connect/endsession"),
            "scopes_supported": ["openid", "profile"]
        })
    }

    #[test]
    fn test_discovery_url_normalizes_trailing_slash() {
        assert_eq!(
            discovery_url("https://idp.example"),
            "https://idp.example/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://idp.example/"),
            "https://idp.example/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://idp.example/tenant"),
            "https://idp.example/tenant/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn test_document_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_json(&server.uri())))
            .expect(1)
            .mount(&server)
            .await;

        let client = DiscoveryClient::new(&server.uri()).unwrap();

        let first = client.document().await.unwrap();
        let second = client.document().await.unwrap();

        assert_eq!(first.token_endpoint, format!("{}/connect/token", server.uri()));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document_json(&server.uri())))
            .mount(&server)
            .await;

        let client = DiscoveryClient::new(&server.uri()).unwrap();

        assert_eq!(client.document().await, Err(DiscoveryError::Status(500)));
        assert!(client.document().await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"issuer": "x"})))
            .mount(&server)
            .await;

        let client = DiscoveryClient::new(&server.uri()).unwrap();

        assert!(matches!(
            client.document().await,
            Err(DiscoveryError::InvalidDocument(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        let client = DiscoveryClient::new("http://127.0.0.1:1").unwrap();
        assert!(matches!(client.document().await, Err(DiscoveryError::Http(_))));
    }
}

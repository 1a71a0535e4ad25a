//! Client for the downstream protected API.
//!
//! Calls are authenticated with the session's access token as a bearer
//! token.
//!
//! # Security
//!
//! - The access token is only exposed when building the `Authorization` header
//! - Timeouts prevent hanging connections
//! - Errors are logged server-side with generic messages returned

use crate::errors::PortalError;
use crate::session::Claim;
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

/// Default timeout for downstream API requests.
const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Path of the data endpoint below the API base URL.
const DATA_PATH: &str = "/payments/get";

/// Data returned by the downstream API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiData {
    /// Name of the authenticated caller as seen by the API.
    pub name: String,

    /// Claims the API saw in the access token.
    #[serde(default)]
    pub claims: Vec<Claim>,
}

/// HTTP client for the downstream API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:7001`).
    ///
    /// # Errors
    ///
    /// Returns `PortalError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, PortalError> {
        let client = Client::builder()
            .timeout(API_REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| PortalError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the caller's data.
    ///
    /// # Errors
    ///
    /// - `PortalError::SessionExpired` if the API rejects the access token
    /// - `PortalError::BadGateway` if the API is unreachable, fails, or
    ///   returns an unreadable body
    #[instrument(skip_all, name = "portal.api_client.get_data")]
    pub async fn get_data(&self, access_token: &SecretString) -> Result<ApiData, PortalError> {
        let url = format!("{}{DATA_PATH}", self.base_url);

        let started = Instant::now();
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                warn!(target: "portal.api_client", error = %e, "Downstream API request failed");
                PortalError::BadGateway(format!("Downstream API unreachable: {e}"))
            })?;

        let status = response.status();
        debug!(
            target: "portal.api_client",
            url = %url,
            status = %status,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Downstream API responded"
        );

        if status.is_success() {
            response.json().await.map_err(|e| {
                error!(target: "portal.api_client", error = %e, "Failed to parse downstream API response");
                PortalError::BadGateway(format!("Invalid downstream API response: {e}"))
            })
        } else if status.as_u16() == 401 {
            warn!(target: "portal.api_client", "Downstream API rejected the access token");
            Err(PortalError::SessionExpired(
                "Downstream API rejected the access token".to_string(),
            ))
        } else {
            warn!(target: "portal.api_client", status = %status, "Unexpected downstream API response");
            Err(PortalError::BadGateway(format!(
                "Downstream API returned {status}"
            )))
        }
    }
}

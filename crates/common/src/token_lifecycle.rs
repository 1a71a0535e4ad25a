//! Access-token lifetime bookkeeping and the OAuth 2.0 refresh-token grant.
//!
//! Two halves:
//!
//! - Pure functions that decide when a held access token is close enough to
//!   expiry to be renewed ([`remaining_seconds`], [`needs_renewal`]).
//! - [`RefreshClient`], which exchanges a refresh token for a new token set at
//!   the identity provider's token endpoint.
//!
//! The client performs exactly one exchange per call. It never retries; retry
//! policy belongs to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::token_lifecycle::{needs_renewal, RefreshClient, RefreshClientConfig};
//! use common::secret::SecretString;
//!
//! let client = RefreshClient::new(RefreshClientConfig::new(
//!     "authcodeflowclient".to_string(),
//!     SecretString::from("mysecret"),
//! ))?;
//!
//! let remaining = window.remaining_seconds(chrono::Utc::now());
//! if needs_renewal(remaining, 5) {
//!     let tokens = client.refresh(&token_endpoint, Some(&refresh_token)).await?;
//! }
//! ```
//!
//! # Security
//!
//! - Client secret and all tokens are held as `SecretString` (never logged)
//! - Error response bodies are logged at trace level only

use crate::jwt::TokenWindow;
use crate::secret::{is_blank, ExposeSecret, SecretString};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default renewal threshold: renew when fewer than 5 seconds remain.
pub const DEFAULT_RENEWAL_THRESHOLD: Duration = Duration::from_secs(5);

/// Default connection timeout for the HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Lifetime Decisions
// =============================================================================

/// Seconds left until `valid_to`, truncated toward zero.
///
/// Negative once the token has expired; callers treat any negative value as
/// "expired, renew unconditionally".
#[must_use]
pub fn remaining_seconds(valid_to: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    valid_to.signed_duration_since(now).num_seconds()
}

/// True when fewer than `threshold_secs` seconds remain.
#[must_use]
pub fn needs_renewal(remaining_seconds: i64, threshold_secs: i64) -> bool {
    remaining_seconds < threshold_secs
}

impl TokenWindow {
    /// Seconds left in this window at `now`.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        remaining_seconds(self.valid_to, now)
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during a refresh-token exchange.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// No refresh token is held. Raised before any network call.
    #[error("Refresh token missing")]
    MissingRefreshToken,

    /// The identity provider refused the grant (400, 401).
    #[error("Refresh rejected: {0}")]
    Rejected(String),

    /// Transport failure, server error, or unexpected status.
    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// Token response parsing failed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Client credentials used at the token endpoint.
#[derive(Clone)]
pub struct RefreshClientConfig {
    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret (as `SecretString`).
    pub client_secret: SecretString,

    /// Whole-request timeout. `None` leaves the bound to the caller.
    pub http_timeout: Option<Duration>,
}

impl std::fmt::Debug for RefreshClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl RefreshClientConfig {
    /// Create a configuration with no request timeout.
    #[must_use]
    pub fn new(client_id: String, client_secret: SecretString) -> Self {
        Self {
            client_id,
            client_secret,
            http_timeout: None,
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }
}

// =============================================================================
// Token Set
// =============================================================================

/// Credentials produced by a successful refresh.
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// New access token.
    pub access_token: SecretString,

    /// New refresh token, or the previous one if the provider did not rotate it.
    pub refresh_token: SecretString,

    /// New id token, when the provider returns one.
    pub id_token: Option<SecretString>,

    /// Absolute expiry of the access token (`now + expires_in`).
    pub expires_at: DateTime<Utc>,
}

/// OAuth 2.0 token response.
#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    scope: Option<String>,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

// =============================================================================
// Refresh Client
// =============================================================================

/// HTTP client for the `refresh_token` grant.
#[derive(Clone)]
pub struct RefreshClient {
    config: RefreshClientConfig,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for RefreshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RefreshClient {
    /// Build a refresh client.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: RefreshClientConfig) -> Result<Self, TokenError> {
        let mut builder = reqwest::Client::builder().connect_timeout(DEFAULT_CONNECT_TIMEOUT);
        if let Some(timeout) = config.http_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// OAuth client ID this client authenticates as.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Exchange `refresh_token` for a new token set.
    ///
    /// # Errors
    ///
    /// - `TokenError::MissingRefreshToken` - `refresh_token` is absent or blank;
    ///   no request is sent
    /// - `TokenError::Rejected` - The provider answered 400 or 401
    /// - `TokenError::HttpError` - Transport failure or other non-success status
    /// - `TokenError::InvalidResponse` - Success status with an unreadable body
    #[instrument(skip_all, fields(client_id = %self.config.client_id))]
    pub async fn refresh(
        &self,
        token_endpoint: &str,
        refresh_token: Option<&SecretString>,
    ) -> Result<TokenSet, TokenError> {
        let refresh_token = match refresh_token {
            Some(token) if !is_blank(Some(token)) => token,
            _ => {
                debug!(target: "common.token_lifecycle", "No refresh token held, refusing to call token endpoint");
                return Err(TokenError::MissingRefreshToken);
            }
        };

        let form_body = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
        ];

        let started = Instant::now();
        let response = self
            .http_client
            .post(token_endpoint)
            .form(&form_body)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "common.token_lifecycle", error = %e, "HTTP request failed");
                TokenError::HttpError(e.to_string())
            })?;

        let status = response.status();
        debug!(
            target: "common.token_lifecycle",
            url = %token_endpoint,
            status = %status,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Token endpoint responded"
        );

        if status.is_success() {
            let token_response: OAuthTokenResponse = response.json().await.map_err(|e| {
                warn!(target: "common.token_lifecycle", error = %e, "Failed to parse token response");
                TokenError::InvalidResponse(e.to_string())
            })?;

            if token_response.access_token.is_empty() {
                warn!(target: "common.token_lifecycle", "Token response carried an empty access token");
                return Err(TokenError::InvalidResponse(
                    "empty access_token".to_string(),
                ));
            }

            let expires_in = i64::try_from(token_response.expires_in).unwrap_or(i64::MAX);
            let expires_at = Utc::now()
                .checked_add_signed(chrono::Duration::seconds(expires_in))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

            let rotated = token_response.refresh_token.is_some();
            debug!(
                target: "common.token_lifecycle",
                expires_in_secs = token_response.expires_in,
                refresh_token_rotated = rotated,
                "Token refreshed"
            );

            Ok(TokenSet {
                access_token: SecretString::from(token_response.access_token),
                refresh_token: token_response
                    .refresh_token
                    .map_or_else(|| refresh_token.clone(), SecretString::from),
                id_token: token_response.id_token.map(SecretString::from),
                expires_at,
            })
        } else if status.as_u16() == 401 || status.as_u16() == 400 {
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(target: "common.token_lifecycle", error = %e, "Failed to read error response body");
                "<failed to read body>".to_string()
            });
            warn!(
                target: "common.token_lifecycle",
                status = %status,
                "Refresh rejected by identity provider"
            );
            trace!(
                target: "common.token_lifecycle",
                body = %body,
                "Refresh rejection response body"
            );
            Err(TokenError::Rejected(format!("Status {status}")))
        } else if status.is_server_error() {
            warn!(
                target: "common.token_lifecycle",
                status = %status,
                "Identity provider returned server error"
            );
            Err(TokenError::HttpError(format!("Server error: {status}")))
        } else {
            warn!(
                target: "common.token_lifecycle",
                status = %status,
                "Unexpected response from token endpoint"
            );
            Err(TokenError::HttpError(format!("Unexpected status: {status}")))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Portal configuration.
//!
//! Configuration is loaded from environment variables. The OIDC client
//! secret is redacted in Debug output.

use crate::middleware::readiness::{
    ReadinessConfig, DEFAULT_PROBE_TIMEOUT, DEFAULT_RETRY_INTERVAL, MAX_RETRY_INTERVAL,
};
use crate::session::cookie::DEFAULT_COOKIE_NAME;
use crate::session::memory::{DEFAULT_MAX_ENTRIES, DEFAULT_MAX_TTL, DEFAULT_TTL};
use crate::session::{SessionCookie, TicketStoreConfig};
use common::secret::SecretString;
use common::token_lifecycle::{RefreshClientConfig, DEFAULT_RENEWAL_THRESHOLD};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default downstream API base URL.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:7001";

/// Default graceful-shutdown drain period in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 30;

/// Portal configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// Identity provider authority URL (e.g. "https://localhost:6001").
    pub oidc_authority: String,

    /// OAuth client ID registered at the identity provider.
    pub oidc_client_id: String,

    /// OAuth client secret.
    pub oidc_client_secret: SecretString,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Base URL of the downstream protected API.
    pub api_base_url: String,

    /// Pause between readiness probes (default: 2s).
    pub readiness_retry_interval: Duration,

    /// Bound on a single readiness probe (default: 3s).
    pub readiness_probe_timeout: Duration,

    /// Renew access tokens with less than this much lifetime left (default: 5s).
    pub token_renewal_threshold: Duration,

    /// Maximum live sessions (default: 100000).
    pub session_max_entries: u64,

    /// Lifetime of sessions without their own expiry (default: 1h).
    pub session_default_ttl: Duration,

    /// Upper bound on any session's lifetime (default: 8h).
    pub session_max_ttl: Duration,

    /// Session cookie name (default: "portal.session").
    pub session_cookie_name: String,

    /// Whether the session cookie is marked `Secure` (default: true).
    pub session_cookie_secure: bool,

    /// Seconds to keep draining connections on shutdown (default: 30).
    pub drain_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("oidc_authority", &self.oidc_authority)
            .field("oidc_client_id", &self.oidc_client_id)
            .field("oidc_client_secret", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("api_base_url", &self.api_base_url)
            .field("readiness_retry_interval", &self.readiness_retry_interval)
            .field("readiness_probe_timeout", &self.readiness_probe_timeout)
            .field("token_renewal_threshold", &self.token_renewal_threshold)
            .field("session_max_entries", &self.session_max_entries)
            .field("session_default_ttl", &self.session_default_ttl)
            .field("session_max_ttl", &self.session_max_ttl)
            .field("session_cookie_name", &self.session_cookie_name)
            .field("session_cookie_secure", &self.session_cookie_secure)
            .field("drain_seconds", &self.drain_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid session store configuration: {0}")]
    InvalidSessionLimits(String),

    #[error("Invalid session cookie configuration: {0}")]
    InvalidCookie(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let oidc_authority = required(vars, "OIDC_AUTHORITY")?;
        validate_http_url("OIDC_AUTHORITY", &oidc_authority)?;

        let oidc_client_id = required(vars, "OIDC_CLIENT_ID")?;
        let oidc_client_secret = SecretString::from(required(vars, "OIDC_CLIENT_SECRET")?);

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let api_base_url = vars
            .get("API_BASE_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        validate_http_url("API_BASE_URL", &api_base_url)?;

        let readiness_retry_interval = positive_seconds(
            vars,
            "READINESS_RETRY_INTERVAL_SECONDS",
            DEFAULT_RETRY_INTERVAL,
        )?;
        if readiness_retry_interval > MAX_RETRY_INTERVAL {
            return Err(ConfigError::InvalidDuration(format!(
                "READINESS_RETRY_INTERVAL_SECONDS must be at most {}",
                MAX_RETRY_INTERVAL.as_secs()
            )));
        }
        let readiness_probe_timeout = positive_seconds(
            vars,
            "READINESS_PROBE_TIMEOUT_SECONDS",
            DEFAULT_PROBE_TIMEOUT,
        )?;

        // Zero disables proactive renewal; expired tokens are still renewed
        let token_renewal_threshold = match vars.get("TOKEN_RENEWAL_THRESHOLD_SECONDS") {
            Some(value_str) => Duration::from_secs(parse_u64(
                "TOKEN_RENEWAL_THRESHOLD_SECONDS",
                value_str,
                ConfigError::InvalidDuration,
            )?),
            None => DEFAULT_RENEWAL_THRESHOLD,
        };

        let session_max_entries = match vars.get("SESSION_MAX_ENTRIES") {
            Some(value_str) => {
                let value =
                    parse_u64("SESSION_MAX_ENTRIES", value_str, ConfigError::InvalidSessionLimits)?;
                if value == 0 {
                    return Err(ConfigError::InvalidSessionLimits(
                        "SESSION_MAX_ENTRIES must be greater than 0".to_string(),
                    ));
                }
                value
            }
            None => DEFAULT_MAX_ENTRIES,
        };

        let session_default_ttl =
            positive_seconds(vars, "SESSION_DEFAULT_TTL_SECONDS", DEFAULT_TTL)?;
        let session_max_ttl = positive_seconds(vars, "SESSION_MAX_TTL_SECONDS", DEFAULT_MAX_TTL)?;

        if session_max_ttl < session_default_ttl {
            return Err(ConfigError::InvalidSessionLimits(format!(
                "SESSION_MAX_TTL_SECONDS ({}) must not be less than SESSION_DEFAULT_TTL_SECONDS ({})",
                session_max_ttl.as_secs(),
                session_default_ttl.as_secs()
            )));
        }

        let session_cookie_name = vars
            .get("SESSION_COOKIE_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string());
        if !is_cookie_name(&session_cookie_name) {
            return Err(ConfigError::InvalidCookie(format!(
                "SESSION_COOKIE_NAME '{session_cookie_name}' is not a valid cookie name"
            )));
        }

        let session_cookie_secure = match vars.get("SESSION_COOKIE_SECURE").map(String::as_str) {
            None | Some("true" | "1") => true,
            Some("false" | "0") => false,
            Some(other) => {
                return Err(ConfigError::InvalidCookie(format!(
                    "SESSION_COOKIE_SECURE must be true or false, got '{other}'"
                )))
            }
        };

        let drain_seconds = match vars.get("DRAIN_SECONDS") {
            Some(value_str) => parse_u64("DRAIN_SECONDS", value_str, ConfigError::InvalidDuration)?,
            None => DEFAULT_DRAIN_SECONDS,
        };

        Ok(Config {
            oidc_authority,
            oidc_client_id,
            oidc_client_secret,
            bind_address,
            api_base_url,
            readiness_retry_interval,
            readiness_probe_timeout,
            token_renewal_threshold,
            session_max_entries,
            session_default_ttl,
            session_max_ttl,
            session_cookie_name,
            session_cookie_secure,
            drain_seconds,
        })
    }

    /// Readiness gate settings.
    #[must_use]
    pub fn readiness(&self) -> ReadinessConfig {
        ReadinessConfig {
            authority: self.oidc_authority.clone(),
            retry_interval: self.readiness_retry_interval,
            probe_timeout: self.readiness_probe_timeout,
        }
    }

    /// Ticket store limits.
    #[must_use]
    pub fn ticket_store(&self) -> TicketStoreConfig {
        TicketStoreConfig {
            max_entries: self.session_max_entries,
            default_ttl: self.session_default_ttl,
            max_ttl: self.session_max_ttl,
        }
    }

    /// Session cookie settings.
    #[must_use]
    pub fn session_cookie(&self) -> SessionCookie {
        SessionCookie::new(self.session_cookie_name.clone(), self.session_cookie_secure)
    }

    /// Client credentials for the refresh-token grant.
    #[must_use]
    pub fn refresh_client(&self) -> RefreshClientConfig {
        RefreshClientConfig::new(self.oidc_client_id.clone(), self.oidc_client_secret.clone())
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn validate_http_url(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl(format!(
            "{name} must be an http(s) URL, got '{value}'"
        )))
    }
}

fn parse_u64(
    name: &str,
    value_str: &str,
    error: fn(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    value_str.parse().map_err(|e| {
        error(format!(
            "{name} must be a valid non-negative integer, got '{value_str}': {e}"
        ))
    })
}

fn positive_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value = parse_u64(name, value_str, ConfigError::InvalidDuration)?;
    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{name} must be greater than 0"
        )));
    }

    Ok(Duration::from_secs(value))
}

/// RFC 6265 cookie-name token characters.
fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

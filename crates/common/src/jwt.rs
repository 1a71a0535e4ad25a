//! JWT validity-window decoding.
//!
//! Reads the `nbf`/`iat`/`exp` claims out of an access token so the portal
//! can decide when the token has to be renewed.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (`DoS` prevention)
//! - The signature is NOT verified. A [`TokenWindow`] is bookkeeping for the
//!   holder of a token, never an input to a trust decision. The resource
//!   server that receives the token validates it.
//! - Error messages are generic; details are logged at debug level

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Maximum accepted JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected before any base64 decoding.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Errors that can occur while reading a token window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtError {
    /// Token size exceeds maximum allowed.
    #[error("The access token could not be read")]
    TokenTooLarge,

    /// Token is not a three-segment JWT with a base64url JSON payload.
    #[error("The access token could not be read")]
    MalformedToken,

    /// Payload has no usable `exp` claim.
    #[error("The access token has no expiry")]
    MissingExpiry,
}

/// Validity window of a credential.
///
/// Computed on demand from the token itself; never cached past the decision
/// it was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenWindow {
    /// Start of validity (`nbf`, falling back to `iat`).
    pub valid_from: Option<DateTime<Utc>>,

    /// End of validity (`exp`).
    pub valid_to: DateTime<Utc>,
}

/// The subset of registered claims needed for the window.
#[derive(Deserialize)]
struct WindowClaims {
    #[serde(default)]
    nbf: Option<i64>,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
}

/// Read the validity window of a JWT without verifying its signature.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Wrong structure, bad base64, or invalid JSON
/// - `MissingExpiry` - No numeric `exp` claim, or one outside the
///   representable date range
///
/// # Example
///
/// ```rust,ignore
/// use common::jwt::read_token_window;
///
/// let window = read_token_window(access_token.expose_secret())?;
/// let remaining = window.remaining_seconds(chrono::Utc::now());
/// ```
pub fn read_token_window(token: &str) -> Result<TokenWindow, JwtError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtError::MalformedToken);
    };

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT payload base64");
        JwtError::MalformedToken
    })?;

    let claims: WindowClaims = serde_json::from_slice(&payload_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT payload JSON");
        JwtError::MalformedToken
    })?;

    let valid_to = claims
        .exp
        .and_then(|exp| DateTime::from_timestamp(exp, 0))
        .ok_or(JwtError::MissingExpiry)?;

    let valid_from = claims
        .nbf
        .or(claims.iat)
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    Ok(TokenWindow {
        valid_from,
        valid_to,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"at+jwt"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.c2lnbmF0dXJl")
    }

    #[test]
    fn test_reads_nbf_and_exp() {
        let token = token_with_payload(&serde_json::json!({
            "sub": "alice",
            "nbf": 1_700_000_000,
            "iat": 1_699_999_990,
            "exp": 1_700_000_300
        }));

        let window = read_token_window(&token).unwrap();

        assert_eq!(window.valid_to.timestamp(), 1_700_000_300);
        assert_eq!(window.valid_from.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_valid_from_falls_back_to_iat() {
        let token = token_with_payload(&serde_json::json!({
            "iat": 1_700_000_000,
            "exp": 1_700_000_060
        }));

        let window = read_token_window(&token).unwrap();
        assert_eq!(window.valid_from.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_exp_rejected() {
        let token = token_with_payload(&serde_json::json!({ "sub": "alice" }));
        assert_eq!(read_token_window(&token), Err(JwtError::MissingExpiry));
    }

    #[test]
    fn test_non_numeric_exp_rejected() {
        let token = token_with_payload(&serde_json::json!({ "exp": "tomorrow" }));
        assert_eq!(read_token_window(&token), Err(JwtError::MalformedToken));
    }

    #[test]
    fn test_wrong_segment_count_rejected() {
        assert_eq!(read_token_window("a.b"), Err(JwtError::MalformedToken));
        assert_eq!(read_token_window("a.b.c.d"), Err(JwtError::MalformedToken));
        assert_eq!(read_token_window(""), Err(JwtError::MalformedToken));
    }

    #[test]
    fn test_bad_base64_rejected() {
        assert_eq!(
            read_token_window("header.!!!not-base64!!!.sig"),
            Err(JwtError::MalformedToken)
        );
    }

    #[test]
    fn test_oversized_token_rejected_before_parsing() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(read_token_window(&token), Err(JwtError::TokenTooLarge));
    }

    #[test]
    fn test_error_messages_are_generic() {
        assert_eq!(
            JwtError::TokenTooLarge.to_string(),
            JwtError::MalformedToken.to_string()
        );
    }
}

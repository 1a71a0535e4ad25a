//! Portal error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.

use crate::services::discovery::DiscoveryError;
use crate::services::token_renewal::RenewalError;
use crate::session::SessionStoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::token_lifecycle::TokenError;
use serde::Serialize;
use thiserror::Error;

/// Portal error type.
///
/// Maps to HTTP status codes:
/// - Unauthenticated, RefreshTokenMissing, SessionExpired: 401 Unauthorized
/// - BadGateway: 502 Bad Gateway
/// - ServiceUnavailable: 503 Service Unavailable
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Not signed in")]
    Unauthenticated,

    #[error("No refresh token held for the session")]
    RefreshTokenMissing,

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            PortalError::Unauthenticated
            | PortalError::RefreshTokenMissing
            | PortalError::SessionExpired(_) => 401,
            PortalError::BadGateway(_) => 502,
            PortalError::ServiceUnavailable(_) => 503,
            PortalError::Internal(_) => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            PortalError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "Sign in required".to_string(),
            ),
            PortalError::RefreshTokenMissing => (
                StatusCode::UNAUTHORIZED,
                "REFRESH_TOKEN_MISSING",
                "No refresh token available. Please login again.".to_string(),
            ),
            PortalError::SessionExpired(reason) => {
                tracing::info!(target: "portal.session", reason = %reason, "Session could not be renewed");
                (
                    StatusCode::UNAUTHORIZED,
                    "SESSION_EXPIRED",
                    "Session expired. Please login again.".to_string(),
                )
            }
            PortalError::BadGateway(reason) => {
                tracing::warn!(target: "portal.upstream", reason = %reason, "Upstream call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "An upstream service failed".to_string(),
                )
            }
            PortalError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "portal.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            PortalError::Internal(reason) => {
                tracing::error!(target: "portal.internal", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<SessionStoreError> for PortalError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::KeySpaceExhausted { .. } => {
                PortalError::ServiceUnavailable(err.to_string())
            }
            SessionStoreError::KeyGeneration => PortalError::Internal(err.to_string()),
        }
    }
}

impl From<DiscoveryError> for PortalError {
    fn from(err: DiscoveryError) -> Self {
        PortalError::ServiceUnavailable(format!("Identity provider discovery failed: {err}"))
    }
}

impl From<RenewalError> for PortalError {
    fn from(err: RenewalError) -> Self {
        match err {
            RenewalError::Discovery(e) => e.into(),
            RenewalError::Token(TokenError::MissingRefreshToken) => PortalError::RefreshTokenMissing,
            RenewalError::Token(TokenError::Rejected(reason)) => PortalError::SessionExpired(reason),
            RenewalError::Token(e @ (TokenError::HttpError(_) | TokenError::InvalidResponse(_))) => {
                PortalError::BadGateway(e.to_string())
            }
            RenewalError::Token(e @ TokenError::Configuration(_)) => {
                PortalError::Internal(e.to_string())
            }
        }
    }
}

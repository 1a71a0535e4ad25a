//! Session handlers.
//!
//! - `GET /v1/session` - Who is signed in, with their claims and tokens
//! - `POST /v1/session/logout` - End the session and clear the cookie

use crate::errors::PortalError;
use crate::routes::AppState;
use crate::session::Claim;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Current session as shown to its owner.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub subject: String,
    pub name: Option<String>,
    pub claims: Vec<Claim>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    /// Omitted unless it is plain token text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Omitted unless it is plain token text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Handler for GET /v1/session
///
/// # Response
///
/// - 200 OK with [`SessionInfo`]
/// - 401 Unauthorized when there is no live session
#[instrument(skip_all, name = "portal.session.info")]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionInfo>, PortalError> {
    let (_, ticket) = state
        .sessions
        .resolve(&headers)
        .await
        .ok_or(PortalError::Unauthenticated)?;

    Ok(Json(SessionInfo {
        access_token: displayable(Some(&ticket.tokens.access_token)),
        id_token: displayable(ticket.tokens.id_token.as_ref()),
        access_token_expires_at: ticket.tokens.access_token_expires_at,
        subject: ticket.subject,
        name: ticket.name,
        claims: ticket.claims,
        issued_at: ticket.issued_at,
        expires_at: ticket.expires_at,
    }))
}

/// Handler for POST /v1/session/logout
///
/// Always answers 204 with a clearing cookie, whether or not a session
/// existed.
#[instrument(skip_all, name = "portal.session.logout")]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, PortalError> {
    let clear_cookie = state.sessions.sign_out(&headers).await?;
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, clear_cookie)]).into_response())
}

/// Token text is echoed back only when every character is in
/// `[A-Za-z0-9_+/=.-]`.
fn displayable(token: Option<&SecretString>) -> Option<String> {
    let value = token?.expose_secret();
    let plain = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_+/=.-".contains(&b));

    plain.then(|| value.to_string())
}

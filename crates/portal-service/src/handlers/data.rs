//! Downstream data handler.
//!
//! Calls the protected API on the user's behalf, renewing the access token
//! first when it is about to expire.

use crate::errors::PortalError;
use crate::routes::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Response body for GET /v1/data.
#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub name: String,
}

/// Handler for GET /v1/data
///
/// # Response
///
/// - 200 OK with `{"name": "Got Data <name> (Access token expires in <n> sec)"}`
/// - 401 Unauthorized without a live session, without a refresh token when
///   one is needed, or when the provider rejects the refresh
/// - 502 Bad Gateway when the provider or the API fails
/// - 503 Service Unavailable when discovery fails
#[instrument(skip_all, name = "portal.data.get")]
pub async fn get_data(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DataResponse>, PortalError> {
    let (key, ticket) = state
        .sessions
        .resolve(&headers)
        .await
        .ok_or(PortalError::Unauthenticated)?;

    let fresh = state
        .renewal
        .access_token_for(&key, &ticket, Utc::now())
        .await?;

    let data = state.api_client.get_data(&fresh.token).await?;

    Ok(Json(DataResponse {
        name: format!(
            "Got Data {} (Access token expires in {} sec)",
            data.name, fresh.remaining_seconds
        ),
    }))
}

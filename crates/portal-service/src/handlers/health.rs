//! Health check handlers.
//!
//! - `/health`: Liveness probe - returns OK if the process is running
//! - `/ready`: Readiness probe - 200 once the identity provider has answered
//!
//! Both are outside the readiness gate, so an orchestrator can tell a live
//! process that is still waiting for its identity provider from a dead one.

use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Readiness probe response body.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub identity_provider: &'static str,
}

/// Liveness probe handler.
///
/// Does NOT check any dependencies - failure means the process is hung.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Runs the gate's own check: an idle instance probes from here too, under
/// the same single-flight and retry-interval rules as gated traffic.
#[tracing::instrument(skip_all, name = "portal.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.gate.check("/ready").await {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                identity_provider: "available",
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                identity_provider: "waiting",
            }),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }

    #[test]
    fn test_readiness_response_serialization() {
        let json = serde_json::to_value(ReadinessResponse {
            status: "not_ready",
            identity_provider: "waiting",
        })
        .unwrap();

        assert_eq!(
            json,
            serde_json::json!({"status": "not_ready", "identity_provider": "waiting"})
        );
    }
}

//! Prometheus metrics endpoint handler.
//!
//! # Security
//!
//! This endpoint is unauthenticated and sits outside the readiness gate so
//! Prometheus can scrape while the identity provider is down. No PII, tokens
//! or session keys are exposed in metrics.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Returns Prometheus-formatted metrics for scraping:
/// ```text
/// # TYPE portal_readiness_rejections_total counter
/// portal_readiness_rejections_total 3
/// ```
#[tracing::instrument(skip_all, name = "portal.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

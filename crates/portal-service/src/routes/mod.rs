//! HTTP routes for the portal.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::errors::PortalError;
use crate::handlers;
use crate::middleware::{wait_for_identity_provider, ReadinessGate};
use crate::services::{ApiClient, DiscoveryClient, TokenRenewalService};
use crate::session::{InMemoryTicketStore, SessionManager, TicketStore};
use axum::{
    http::{header, HeaderValue},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use common::token_lifecycle::RefreshClient;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{set_header::SetResponseHeaderLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Content security policy applied to every response that has none.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; script-src 'self'; connect-src 'self'; img-src 'self'; style-src 'self'; base-uri 'self'; frame-ancestors 'none'";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Session cookie and ticket store.
    pub sessions: SessionManager,

    /// Access-token renewal.
    pub renewal: Arc<TokenRenewalService>,

    /// Downstream API client.
    pub api_client: ApiClient,

    /// Identity provider readiness gate.
    pub gate: Arc<ReadinessGate>,
}

impl AppState {
    /// Wire up the portal's services from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::Internal` if an HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, PortalError> {
        let store: Arc<dyn TicketStore> =
            Arc::new(InMemoryTicketStore::new(config.ticket_store()));

        let discovery = Arc::new(
            DiscoveryClient::new(&config.oidc_authority)
                .map_err(|e| PortalError::Internal(e.to_string()))?,
        );

        let refresh_client = RefreshClient::new(config.refresh_client())
            .map_err(|e| PortalError::Internal(e.to_string()))?;

        let renewal = Arc::new(TokenRenewalService::new(
            Arc::clone(&store),
            discovery,
            refresh_client,
            config.token_renewal_threshold,
        ));

        let api_client = ApiClient::new(&config.api_base_url)?;
        let gate = Arc::new(ReadinessGate::new(&config.readiness())?);
        let sessions = SessionManager::new(store, config.session_cookie());

        Ok(Self {
            config,
            sessions,
            renewal,
            api_client,
            gate,
        })
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (not gated)
/// - `/ready` - Readiness probe reporting the gate state (not gated)
/// - `/metrics` - Prometheus metrics (not gated)
/// - `/v1/session`, `/v1/session/logout`, `/v1/data` - Behind the readiness gate
/// - Security headers on every response that does not set them itself
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    // Probes must answer while the identity provider is still down
    let operational_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(Arc::clone(&state));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let gated_routes = Router::new()
        .route("/v1/session", get(handlers::get_session))
        .route("/v1/session/logout", post(handlers::logout))
        .route("/v1/data", get(handlers::get_data))
        .layer(from_fn_with_state(
            Arc::clone(&state.gate),
            wait_for_identity_provider,
        ))
        .with_state(state);

    // Apply global middleware layers
    // Layer order (bottom-to-top execution):
    // 1. Security headers - Added to responses that lack them (innermost)
    // 2. TraceLayer - Log request details
    // 3. TimeoutLayer - Timeout the request (outermost)
    Router::new()
        .merge(operational_routes)
        .merge(metrics_routes)
        .merge(gated_routes)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

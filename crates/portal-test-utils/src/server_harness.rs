//! Test server harness for E2E testing
//!
//! Provides TestPortalServer for spawning real portal instances in tests.

use crate::mock_idp::{MockIdentityProvider, TEST_CLIENT_ID, TEST_CLIENT_SECRET};
use portal_service::config::Config;
use portal_service::routes::{self, AppState};
use portal_service::session::Ticket;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the portal in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_session_flow_e2e() -> Result<()> {
///     let idp = MockIdentityProvider::start().await;
///     idp.mount_discovery().await;
///     let server = TestPortalServer::spawn(&idp).await?;
///     let cookie = server.sign_in(signed_in_ticket("at", Some("rt"))).await?;
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/v1/session", server.url()))
///         .header("cookie", cookie)
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestPortalServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    handle: JoinHandle<()>,
}

impl TestPortalServer {
    /// Spawn a portal whose authority and downstream API are `idp`.
    ///
    /// Retry interval and probe timeout are one second so readiness tests
    /// run quickly.
    pub async fn spawn(idp: &MockIdentityProvider) -> Result<Self, anyhow::Error> {
        Self::spawn_with(idp, &[]).await
    }

    /// Like [`Self::spawn`], with extra or overriding environment variables.
    pub async fn spawn_with(
        idp: &MockIdentityProvider,
        overrides: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("OIDC_AUTHORITY".to_string(), idp.uri()),
            ("OIDC_CLIENT_ID".to_string(), TEST_CLIENT_ID.to_string()),
            ("OIDC_CLIENT_SECRET".to_string(), TEST_CLIENT_SECRET.to_string()),
            ("API_BASE_URL".to_string(), idp.uri()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("READINESS_RETRY_INTERVAL_SECONDS".to_string(), "1".to_string()),
            ("READINESS_PROBE_TIMEOUT_SECONDS".to_string(), "1".to_string()),
            ("SESSION_COOKIE_SECURE".to_string(), "false".to_string()),
            ("DRAIN_SECONDS".to_string(), "0".to_string()),
        ]);
        for (name, value) in overrides {
            vars.insert((*name).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Invalid test configuration: {}", e))?;
        let state = Arc::new(
            AppState::new(config)
                .map_err(|e| anyhow::anyhow!("Failed to build application state: {}", e))?,
        );

        // Standalone recorder: installing globally would fail on the second
        // server in the same test binary
        let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();

        let app = routes::build_routes(Arc::clone(&state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared application state, for inspecting the ticket store.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Store `ticket` as a completed sign-in would and return the `Cookie`
    /// header value a browser would send back.
    pub async fn sign_in(&self, ticket: Ticket) -> Result<String, anyhow::Error> {
        let (key, _set_cookie) = self
            .state
            .sessions
            .sign_in(ticket)
            .await
            .map_err(|e| anyhow::anyhow!("Sign-in failed: {}", e))?;

        Ok(format!(
            "{}={}",
            self.state.sessions.cookie().name(),
            key.as_str()
        ))
    }
}

impl Drop for TestPortalServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

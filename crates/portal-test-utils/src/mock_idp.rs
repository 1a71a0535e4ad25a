//! Mock identity provider for E2E tests
//!
//! One wiremock server plays both the OIDC provider (discovery and token
//! endpoints) and the downstream API, so a test portal needs a single
//! upstream address.

use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Client id the test portal is configured with.
pub const TEST_CLIENT_ID: &str = "authcodeflowclient";

/// Client secret the test portal is configured with.
pub const TEST_CLIENT_SECRET: &str = "mysecret";

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
pub const TOKEN_PATH: &str = "/connect/token";
pub const DATA_PATH: &str = "/payments/get";

/// Wiremock-backed identity provider and downstream API.
pub struct MockIdentityProvider {
    server: MockServer,
}

impl MockIdentityProvider {
    /// Start a provider with nothing mounted; every request gets a 404.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL, used as both the OIDC authority and the API base URL.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Underlying server, for tests that mount their own mocks.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Drop every mounted mock, making the provider unavailable again.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Serve a discovery document pointing at this server's token endpoint.
    pub async fn mount_discovery(&self) {
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": self.uri(),
                "token_endpoint": format!("{}{TOKEN_PATH}", self.uri()),
                "userinfo_endpoint": format!("{}/connect/userinfo", self.uri()),
                "jwks_uri": format!("{}/.well-known/openid-configuration/jwks", self.uri()),
                "end_session_endpoint": format!("{}/connect/endsession", self.uri()),
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer discovery with `status`, as a provider that is still starting.
    pub async fn mount_discovery_failure(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Accept a refresh-token grant for `refresh_token`, expecting exactly
    /// `times` calls.
    pub async fn mount_refresh_success(
        &self,
        refresh_token: &str,
        access_token: &str,
        rotated_refresh_token: &str,
        expires_in: u64,
        times: u64,
    ) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains(format!("refresh_token={refresh_token}")))
            .and(body_string_contains(format!("client_id={TEST_CLIENT_ID}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": expires_in,
                "refresh_token": rotated_refresh_token,
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Reject every refresh-token grant with `invalid_grant`.
    pub async fn mount_refresh_rejected(&self) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "error": "invalid_grant" })),
            )
            .mount(&self.server)
            .await;
    }

    /// Fail the test if the token endpoint is called at all.
    pub async fn expect_no_refresh(&self) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&self.server)
            .await;
    }

    /// Serve downstream data to callers presenting `access_token`.
    pub async fn mount_data(&self, access_token: &str, name: &str) {
        Mock::given(method("GET"))
            .and(path(DATA_PATH))
            .and(header("authorization", format!("Bearer {access_token}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": name,
                "claims": [{ "type": "sub", "value": name }],
            })))
            .mount(&self.server)
            .await;
    }
}

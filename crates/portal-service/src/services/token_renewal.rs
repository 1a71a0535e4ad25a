//! Access-token renewal for stored sessions.
//!
//! Handlers that call a protected API ask [`TokenRenewalService::access_token_for`]
//! for a usable access token. When the held token is within the renewal
//! threshold of expiry (or already expired), the service exchanges the refresh
//! token at the provider's token endpoint and replaces the stored ticket.
//!
//! A failed renewal leaves the stored ticket untouched and is returned to the
//! caller. Nothing here retries.

use crate::observability::metrics;
use crate::services::discovery::{DiscoveryClient, DiscoveryError};
use crate::session::{SessionKey, Ticket, TicketStore};
use chrono::{DateTime, Utc};
use common::jwt::{read_token_window, TokenWindow};
use common::secret::{is_blank, ExposeSecret, SecretString};
use common::token_lifecycle::{needs_renewal, remaining_seconds, RefreshClient, TokenError, TokenSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors from a renewal attempt.
#[derive(Debug, Error)]
pub enum RenewalError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// An access token ready to present downstream.
#[derive(Debug, Clone)]
pub struct FreshAccessToken {
    pub token: SecretString,

    /// Seconds until `token` expires.
    pub remaining_seconds: i64,

    /// Whether a refresh was performed to obtain it.
    pub renewed: bool,
}

/// Renews session tokens against the identity provider.
pub struct TokenRenewalService {
    store: Arc<dyn TicketStore>,
    discovery: Arc<DiscoveryClient>,
    refresh_client: RefreshClient,
    threshold_secs: i64,
}

impl std::fmt::Debug for TokenRenewalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRenewalService")
            .field("refresh_client", &self.refresh_client)
            .field("threshold_secs", &self.threshold_secs)
            .finish_non_exhaustive()
    }
}

impl TokenRenewalService {
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        discovery: Arc<DiscoveryClient>,
        refresh_client: RefreshClient,
        threshold: Duration,
    ) -> Self {
        Self {
            store,
            discovery,
            refresh_client,
            threshold_secs: i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Exchange the ticket's refresh token and store the renewed ticket
    /// under `key`.
    ///
    /// # Errors
    ///
    /// - `RenewalError::Token(TokenError::MissingRefreshToken)` - The ticket
    ///   holds no refresh token; nothing is fetched
    /// - `RenewalError::Discovery` - The token endpoint could not be discovered
    /// - `RenewalError::Token` - The refresh grant failed
    #[instrument(skip_all, name = "portal.token_renewal.renew", fields(key_prefix = %key.log_prefix()))]
    pub async fn renew(&self, key: &SessionKey, ticket: &Ticket) -> Result<TokenSet, RenewalError> {
        if is_blank(ticket.tokens.refresh_token.as_ref()) {
            info!(
                target: "portal.token_renewal",
                subject = %ticket.subject,
                "No refresh token held, session must sign in again"
            );
            metrics::record_token_renewal("missing_refresh_token");
            return Err(TokenError::MissingRefreshToken.into());
        }

        let document = self.discovery.document().await.map_err(|e| {
            metrics::record_token_renewal("error");
            e
        })?;

        let tokens = match self
            .refresh_client
            .refresh(&document.token_endpoint, ticket.tokens.refresh_token.as_ref())
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(
                    target: "portal.token_renewal",
                    subject = %ticket.subject,
                    error = %e,
                    "Token renewal failed, keeping existing ticket"
                );
                metrics::record_token_renewal(match &e {
                    TokenError::Rejected(_) => "rejected",
                    _ => "error",
                });
                return Err(e.into());
            }
        };

        self.store.renew(key, ticket.with_tokens(&tokens)).await;

        debug!(
            target: "portal.token_renewal",
            subject = %ticket.subject,
            expires_at = %tokens.expires_at,
            "Session tokens renewed"
        );
        metrics::record_token_renewal("success");

        Ok(tokens)
    }

    /// Access token for the session, renewed first when it is about to expire.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::renew`] when a renewal was needed.
    pub async fn access_token_for(
        &self,
        key: &SessionKey,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> Result<FreshAccessToken, RenewalError> {
        match access_token_window(ticket) {
            Some(window) => {
                let remaining = window.remaining_seconds(now);
                if !needs_renewal(remaining, self.threshold_secs) {
                    return Ok(FreshAccessToken {
                        token: ticket.tokens.access_token.clone(),
                        remaining_seconds: remaining,
                        renewed: false,
                    });
                }
                debug!(
                    target: "portal.token_renewal",
                    remaining_seconds = remaining,
                    threshold_secs = self.threshold_secs,
                    "Access token about to expire, renewing"
                );
            }
            None => {
                debug!(
                    target: "portal.token_renewal",
                    "Access token expiry unknown, renewing"
                );
            }
        }

        let tokens = self.renew(key, ticket).await?;

        Ok(FreshAccessToken {
            remaining_seconds: remaining_seconds(tokens.expires_at, now),
            token: tokens.access_token,
            renewed: true,
        })
    }
}

/// Validity window of the ticket's access token.
///
/// Prefers the expiry recorded at sign-in or renewal, else reads the token.
fn access_token_window(ticket: &Ticket) -> Option<TokenWindow> {
    if let Some(valid_to) = ticket.tokens.access_token_expires_at {
        return Some(TokenWindow {
            valid_from: None,
            valid_to,
        });
    }

    read_token_window(ticket.tokens.access_token.expose_secret()).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::{Claim, InMemoryTicketStore, TicketStoreConfig, TicketTokens};
    use common::token_lifecycle::RefreshClientConfig;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        idp: MockServer,
        store: Arc<InMemoryTicketStore>,
        service: TokenRenewalService,
    }

    async fn fixture() -> Fixture {
        let idp = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": idp.uri(),
                "token_endpoint": format!("{}/connect/token", idp.uri()),
            })))
            .mount(&idp)
            .await;

        let store = Arc::new(InMemoryTicketStore::new(TicketStoreConfig::default()));
        let service = TokenRenewalService::new(
            Arc::clone(&store) as Arc<dyn TicketStore>,
            Arc::new(DiscoveryClient::new(&idp.uri()).unwrap()),
            RefreshClient::new(RefreshClientConfig::new(
                "authcodeflowclient".to_string(),
                SecretString::from("mysecret"),
            ))
            .unwrap(),
            Duration::from_secs(5),
        );

        Fixture {
            idp,
            store,
            service,
        }
    }

    fn jwt_expiring_in(secs: i64) -> String {
        let now = Utc::now().timestamp();
        encode(
            &Header::default(),
            &serde_json::json!({ "sub": "alice", "nbf": now - 60, "exp": now + secs }),
            &EncodingKey::from_secret(b"test-signing-key"),
        )
        .unwrap()
    }

    fn ticket_with(access_token: String, refresh_token: Option<&str>) -> Ticket {
        Ticket::new(
            "alice",
            TicketTokens {
                access_token: SecretString::from(access_token),
                refresh_token: refresh_token.map(|t| SecretString::from(t.to_string())),
                id_token: None,
                access_token_expires_at: None,
            },
        )
        .with_name("Alice")
        .with_claims(vec![Claim::new("sub", "alice")])
    }

    async fn mount_token_endpoint(idp: &MockServer, access_token: &str, expires_in: u64) {
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": expires_in,
                "refresh_token": "rotated-refresh"
            })))
            .expect(1)
            .mount(idp)
            .await;
    }

    #[tokio::test]
    async fn test_fresh_token_is_not_renewed() {
        let fx = fixture().await;
        let ticket = ticket_with(jwt_expiring_in(3600), Some("rt"));
        let key = fx.store.store(ticket.clone()).await.unwrap();

        let fresh = fx
            .service
            .access_token_for(&key, &ticket, Utc::now())
            .await
            .unwrap();

        assert!(!fresh.renewed);
        assert!(fresh.remaining_seconds > 3500);
        assert_eq!(
            fresh.token.expose_secret(),
            ticket.tokens.access_token.expose_secret()
        );
    }

    #[tokio::test]
    async fn test_expiring_token_is_renewed_and_stored() {
        let fx = fixture().await;
        mount_token_endpoint(&fx.idp, "renewed-access", 60).await;

        let ticket = ticket_with(jwt_expiring_in(4), Some("rt"));
        let key = fx.store.store(ticket.clone()).await.unwrap();

        let fresh = fx
            .service
            .access_token_for(&key, &ticket, Utc::now())
            .await
            .unwrap();

        assert!(fresh.renewed);
        assert_eq!(fresh.token.expose_secret(), "renewed-access");
        assert!((59..=61).contains(&fresh.remaining_seconds));

        let stored = fx.store.retrieve(&key).await.unwrap();
        assert_eq!(stored.tokens.access_token.expose_secret(), "renewed-access");
        assert_eq!(
            stored.tokens.refresh_token.unwrap().expose_secret(),
            "rotated-refresh"
        );
        assert!(stored.tokens.access_token_expires_at.is_some());
        assert_eq!(stored.claims, ticket.claims);
        fx.idp.verify().await;
    }

    #[tokio::test]
    async fn test_expired_token_is_renewed() {
        let fx = fixture().await;
        mount_token_endpoint(&fx.idp, "renewed-access", 300).await;

        let ticket = ticket_with(jwt_expiring_in(-10), Some("rt"));
        let key = fx.store.store(ticket.clone()).await.unwrap();

        let fresh = fx
            .service
            .access_token_for(&key, &ticket, Utc::now())
            .await
            .unwrap();

        assert!(fresh.renewed);
    }

    #[tokio::test]
    async fn test_stored_expiry_takes_precedence_over_token() {
        let fx = fixture().await;
        mount_token_endpoint(&fx.idp, "renewed-access", 300).await;

        // Token itself says an hour, but the recorded expiry is imminent
        let mut ticket = ticket_with(jwt_expiring_in(3600), Some("rt"));
        ticket.tokens.access_token_expires_at = Some(Utc::now() + chrono::Duration::seconds(2));
        let key = fx.store.store(ticket.clone()).await.unwrap();

        let fresh = fx
            .service
            .access_token_for(&key, &ticket, Utc::now())
            .await
            .unwrap();

        assert!(fresh.renewed);
    }

    #[tokio::test]
    async fn test_opaque_token_without_expiry_is_renewed() {
        let fx = fixture().await;
        mount_token_endpoint(&fx.idp, "renewed-access", 300).await;

        let ticket = ticket_with("opaque-reference-token".to_string(), Some("rt"));
        let key = fx.store.store(ticket.clone()).await.unwrap();

        let fresh = fx
            .service
            .access_token_for(&key, &ticket, Utc::now())
            .await
            .unwrap();

        assert!(fresh.renewed);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_fails_before_any_request() {
        let idp = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&idp)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&idp)
            .await;

        let store = Arc::new(InMemoryTicketStore::new(TicketStoreConfig::default()));
        let service = TokenRenewalService::new(
            Arc::clone(&store) as Arc<dyn TicketStore>,
            Arc::new(DiscoveryClient::new(&idp.uri()).unwrap()),
            RefreshClient::new(RefreshClientConfig::new(
                "client".to_string(),
                SecretString::from("secret"),
            ))
            .unwrap(),
            Duration::from_secs(5),
        );

        let ticket = ticket_with(jwt_expiring_in(1), None);
        let key = store.store(ticket.clone()).await.unwrap();

        let result = service.access_token_for(&key, &ticket, Utc::now()).await;

        assert!(matches!(
            result,
            Err(RenewalError::Token(TokenError::MissingRefreshToken))
        ));
        idp.verify().await;
    }

    #[tokio::test]
    async fn test_rejected_renewal_keeps_ticket() {
        let fx = fixture().await;
        Mock::given(method("POST"))
            .and(path("/connect/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .expect(1)
            .mount(&fx.idp)
            .await;

        let ticket = ticket_with(jwt_expiring_in(1), Some("revoked"));
        let key = fx.store.store(ticket.clone()).await.unwrap();

        let result = fx.service.renew(&key, &ticket).await;

        assert!(matches!(
            result,
            Err(RenewalError::Token(TokenError::Rejected(_)))
        ));
        let stored = fx.store.retrieve(&key).await.unwrap();
        assert_eq!(
            stored.tokens.access_token.expose_secret(),
            ticket.tokens.access_token.expose_secret()
        );
        assert_eq!(
            stored.tokens.refresh_token.unwrap().expose_secret(),
            "revoked"
        );
        fx.idp.verify().await;
    }

    #[tokio::test]
    async fn test_discovery_failure_surfaces() {
        let store = Arc::new(InMemoryTicketStore::new(TicketStoreConfig::default()));
        let service = TokenRenewalService::new(
            Arc::clone(&store) as Arc<dyn TicketStore>,
            Arc::new(DiscoveryClient::new("http://127.0.0.1:1").unwrap()),
            RefreshClient::new(RefreshClientConfig::new(
                "client".to_string(),
                SecretString::from("secret"),
            ))
            .unwrap(),
            Duration::from_secs(5),
        );

        let ticket = ticket_with(jwt_expiring_in(1), Some("rt"));
        let key = store.store(ticket.clone()).await.unwrap();

        let result = service.renew(&key, &ticket).await;
        assert!(matches!(result, Err(RenewalError::Discovery(_))));
    }
}

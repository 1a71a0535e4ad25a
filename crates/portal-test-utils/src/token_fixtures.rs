//! Token fixtures for E2E tests
//!
//! Access tokens are HS256 JWTs; the portal only reads their validity
//! window and never verifies the signature.

use chrono::Utc;
use common::secret::SecretString;
use jsonwebtoken::{encode, EncodingKey, Header};
use portal_service::session::{Claim, Ticket, TicketTokens};

const TEST_SIGNING_KEY: &[u8] = b"portal-test-signing-key";

/// JWT for `alice` that expires `secs` seconds from now (negative: already
/// expired).
pub fn jwt_expiring_in(secs: i64) -> String {
    let now = Utc::now().timestamp();
    encode(
        &Header::default(),
        &serde_json::json!({
            "sub": "alice",
            "name": "Alice",
            "nbf": now - 60,
            "iat": now - 60,
            "exp": now + secs,
        }),
        &EncodingKey::from_secret(TEST_SIGNING_KEY),
    )
    .expect("test JWT should encode")
}

/// Ticket as produced by a completed sign-in for `alice`.
pub fn signed_in_ticket(access_token: &str, refresh_token: Option<&str>) -> Ticket {
    Ticket::new(
        "alice",
        TicketTokens {
            access_token: SecretString::from(access_token.to_string()),
            refresh_token: refresh_token.map(|t| SecretString::from(t.to_string())),
            id_token: Some(SecretString::from(jwt_expiring_in(3600))),
            access_token_expires_at: None,
        },
    )
    .with_name("Alice")
    .with_claims(vec![
        Claim::new("sub", "alice"),
        Claim::new("name", "Alice"),
        Claim::new("role", "payments.reader"),
    ])
}

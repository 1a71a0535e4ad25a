//! Server-side session tickets.
//!
//! A signed-in user's credentials (access, refresh and id tokens, claims)
//! never leave the process. The browser only holds an opaque [`SessionKey`]
//! in a cookie; every request resolves that key back to a [`Ticket`] through
//! a [`TicketStore`].
//!
//! # Components
//!
//! - [`TicketStore`] - async store contract (store, retrieve, renew, remove)
//! - [`memory::InMemoryTicketStore`] - bounded, expiring in-memory store
//! - [`cookie::SessionCookie`] - `Set-Cookie` / `Cookie` header handling
//! - [`manager::SessionManager`] - sign-in, resolve and sign-out on top of both

pub mod cookie;
pub mod manager;
pub mod memory;

pub use cookie::SessionCookie;
pub use manager::SessionManager;
pub use memory::{InMemoryTicketStore, TicketStoreConfig};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::token_lifecycle::TokenSet;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of random bytes in a generated session key.
pub const SESSION_KEY_BYTES: usize = 32;

/// Characters of a session key shown in logs and `Debug` output.
const KEY_LOG_PREFIX_LEN: usize = 8;

// =============================================================================
// Session Key
// =============================================================================

/// Opaque handle to a stored ticket.
///
/// Generated by the store, never chosen by the client. Only a short prefix is
/// ever printed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wrap a raw key value (e.g. one read back from a cookie).
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Full key value, for writing into a cookie.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix that is safe to log.
    #[must_use]
    pub fn log_prefix(&self) -> &str {
        self.0.get(..KEY_LOG_PREFIX_LEN).unwrap_or(&self.0)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({}...)", self.log_prefix())
    }
}

// =============================================================================
// Ticket
// =============================================================================

/// A single identity claim carried in a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type, e.g. `sub`, `email`, `role`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Claim value.
    pub value: String,
}

impl Claim {
    #[must_use]
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Credentials held on behalf of the user.
#[derive(Debug, Clone)]
pub struct TicketTokens {
    /// Access token presented to downstream APIs.
    pub access_token: SecretString,

    /// Refresh token, absent when the provider did not issue one.
    pub refresh_token: Option<SecretString>,

    /// Id token from sign-in.
    pub id_token: Option<SecretString>,

    /// Absolute expiry of `access_token`, when the provider reported one.
    pub access_token_expires_at: Option<DateTime<Utc>>,
}

/// Authenticated session state owned by the ticket store.
///
/// Replaced wholesale on renewal; never mutated in place while stored.
#[derive(Debug, Clone)]
pub struct Ticket {
    /// Subject identifier (`sub`).
    pub subject: String,

    /// Display name, when the provider supplied one.
    pub name: Option<String>,

    /// Identity claims.
    pub claims: Vec<Claim>,

    /// Held tokens.
    pub tokens: TicketTokens,

    /// When the session was established.
    pub issued_at: DateTime<Utc>,

    /// Session expiry. `None` means the store's default lifetime applies.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Create a ticket issued now, with no claims and no session expiry.
    #[must_use]
    pub fn new(subject: impl Into<String>, tokens: TicketTokens) -> Self {
        Self {
            subject: subject.into(),
            name: None,
            claims: Vec::new(),
            tokens,
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_claims(mut self, claims: Vec<Claim>) -> Self {
        self.claims = claims;
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Copy of this ticket carrying the tokens from a refresh.
    ///
    /// Identity, claims and session expiry are kept. The id token is kept
    /// unless the refresh returned a new one.
    #[must_use]
    pub fn with_tokens(&self, tokens: &TokenSet) -> Self {
        Self {
            tokens: TicketTokens {
                access_token: tokens.access_token.clone(),
                refresh_token: Some(tokens.refresh_token.clone()),
                id_token: tokens
                    .id_token
                    .clone()
                    .or_else(|| self.tokens.id_token.clone()),
                access_token_expires_at: Some(tokens.expires_at),
            },
            ..self.clone()
        }
    }

    /// True once the session expiry has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// First value of a claim type.
    #[must_use]
    pub fn claim(&self, kind: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.value.as_str())
    }
}

// =============================================================================
// Store Contract
// =============================================================================

/// Errors raised by a ticket store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    /// Every generated key collided with a live session.
    #[error("Session key space exhausted after {attempts} attempts")]
    KeySpaceExhausted { attempts: u32 },

    /// The random source failed.
    #[error("Session key generation failed")]
    KeyGeneration,
}

/// Server-side ticket storage.
///
/// All operations are individually atomic. `retrieve` reports a missing or
/// expired session as `None`; only `store` can fail.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert `ticket` under a fresh key that no live session is using.
    async fn store(&self, ticket: Ticket) -> Result<SessionKey, SessionStoreError>;

    /// Current ticket for `key`, or `None`.
    async fn retrieve(&self, key: &SessionKey) -> Option<Ticket>;

    /// Replace the ticket for `key`, creating the entry if it is missing.
    async fn renew(&self, key: &SessionKey, ticket: Ticket);

    /// Delete `key`. Removing an absent key is a no-op.
    async fn remove(&self, key: &SessionKey);
}

/// Source of candidate session keys.
pub trait SessionKeyGenerator: Send + Sync {
    /// Produce a candidate key. Uniqueness is checked by the store.
    ///
    /// # Errors
    ///
    /// Returns `SessionStoreError::KeyGeneration` if the random source fails.
    fn generate(&self) -> Result<SessionKey, SessionStoreError>;
}

/// CSPRNG-backed key generator (32 random bytes, base64url).
#[derive(Debug)]
pub struct RandomKeyGenerator {
    rng: SystemRandom,
}

impl Default for RandomKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomKeyGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl SessionKeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> Result<SessionKey, SessionStoreError> {
        let mut bytes = [0u8; SESSION_KEY_BYTES];
        self.rng.fill(&mut bytes).map_err(|_| {
            tracing::error!(target: "portal.session", "Failed to generate random bytes");
            SessionStoreError::KeyGeneration
        })?;

        Ok(SessionKey(URL_SAFE_NO_PAD.encode(bytes)))
    }
}

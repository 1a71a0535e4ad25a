//! Cookie-to-ticket session flow.
//!
//! The OIDC handshake that authenticates the user happens elsewhere; once it
//! has produced a [`Ticket`], [`SessionManager::sign_in`] stores it and hands
//! back the cookie. Each later request calls [`SessionManager::resolve`].
//!
//! `sign_in` is the integration point for that handshake and the only caller
//! of [`TicketStore::store`](super::TicketStore::store).

use super::{SessionCookie, SessionKey, Ticket, TicketStore};
use crate::errors::PortalError;
use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Ties the ticket store to the session cookie.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn TicketStore>,
    cookie: SessionCookie,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, cookie: SessionCookie) -> Self {
        Self { store, cookie }
    }

    /// Underlying ticket store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TicketStore> {
        &self.store
    }

    /// Cookie settings.
    #[must_use]
    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    /// Store a freshly authenticated ticket and build its `Set-Cookie` value.
    ///
    /// # Errors
    ///
    /// - `PortalError::ServiceUnavailable` - No session key could be allocated
    /// - `PortalError::Internal` - The cookie header could not be built
    #[instrument(skip_all, name = "portal.session.sign_in", fields(subject = %ticket.subject))]
    pub async fn sign_in(&self, ticket: Ticket) -> Result<(SessionKey, HeaderValue), PortalError> {
        let expires_at = ticket.expires_at;
        let key = self.store.store(ticket).await?;

        let set_cookie = self
            .cookie
            .issue(&key, expires_at, Utc::now())
            .map_err(|e| PortalError::Internal(format!("Invalid session cookie: {e}")))?;

        Ok((key, set_cookie))
    }

    /// Resolve the request's session cookie to its ticket.
    ///
    /// `None` means "not signed in": no cookie, an unknown key, or an expired
    /// session.
    pub async fn resolve(&self, headers: &HeaderMap) -> Option<(SessionKey, Ticket)> {
        let key = self.cookie.extract(headers)?;

        match self.store.retrieve(&key).await {
            Some(ticket) => Some((key, ticket)),
            None => {
                debug!(
                    target: "portal.session",
                    key_prefix = %key.log_prefix(),
                    "Session cookie does not match a live session"
                );
                None
            }
        }
    }

    /// Remove the request's session, if any, and build the clearing cookie.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::Internal` if the cookie header could not be built.
    #[instrument(skip_all, name = "portal.session.sign_out")]
    pub async fn sign_out(&self, headers: &HeaderMap) -> Result<HeaderValue, PortalError> {
        if let Some(key) = self.cookie.extract(headers) {
            self.store.remove(&key).await;
        }

        self.cookie
            .clear()
            .map_err(|e| PortalError::Internal(format!("Invalid session cookie: {e}")))
    }
}

//! Secret types for session credentials.
//!
//! Re-exports the [`secrecy`] wrappers used for every credential the portal
//! holds on behalf of a signed-in user: access tokens, refresh tokens, id
//! tokens, and the OIDC client secret.
//!
//! `SecretString` implements `Debug` with redaction, so a `#[derive(Debug)]`
//! on a ticket or token set never prints the token material. Values are
//! zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct HeldTokens {
//!     subject: String,
//!     refresh_token: SecretString,
//! }
//!
//! let tokens = HeldTokens {
//!     subject: "alice".to_string(),
//!     refresh_token: SecretString::from("rt-123"),
//! };
//!
//! assert!(!format!("{tokens:?}").contains("rt-123"));
//! assert_eq!(tokens.refresh_token.expose_secret(), "rt-123");
//! ```
//!
//! Reading the value always goes through `expose_secret()`, which keeps every
//! place a token leaves the process (an `Authorization` header, a form body)
//! easy to grep for.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Returns true when the secret is absent or holds only whitespace.
///
/// Token endpoints hand back empty strings in some error paths, so a present
/// but blank token is treated the same as a missing one.
#[must_use]
pub fn is_blank(secret: Option<&SecretString>) -> bool {
    secret.map_or(true, |s| s.expose_secret().trim().is_empty())
}

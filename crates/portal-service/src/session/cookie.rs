//! Session cookie handling.
//!
//! The cookie carries only the session key. Attributes: `HttpOnly`,
//! `SameSite=Lax`, `Path=/`, `Secure` unless disabled for plain-HTTP local
//! development.

use super::SessionKey;
use axum::http::header::{self, HeaderMap, HeaderValue, InvalidHeaderValue};
use chrono::{DateTime, Utc};

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "portal.session";

/// Builds and reads the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    name: String,
    secure: bool,
}

impl Default for SessionCookie {
    fn default() -> Self {
        Self::new(DEFAULT_COOKIE_NAME, true)
    }
}

impl SessionCookie {
    #[must_use]
    pub fn new(name: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
        }
    }

    /// Cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the session key from the request's `Cookie` headers.
    ///
    /// Duplicates with malformed values are skipped in favour of the first
    /// well-formed one. Returns `None` when no such value is present.
    #[must_use]
    pub fn extract(&self, headers: &HeaderMap) -> Option<SessionKey> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| name.trim() == self.name)
            .map(|(_, value)| value.trim())
            .find(|value| is_key_value(value))
            .map(SessionKey::new)
    }

    /// `Set-Cookie` value that hands `key` to the browser.
    ///
    /// When the session has an expiry the cookie gets a matching `Max-Age`;
    /// otherwise it is a browser-session cookie.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeaderValue` if the configured name is not a valid
    /// header token.
    pub fn issue(
        &self,
        key: &SessionKey,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.name,
            key.as_str()
        );

        if let Some(expires_at) = expires_at {
            let max_age = (expires_at - now).num_seconds().max(0);
            cookie.push_str(&format!("; Max-Age={max_age}"));
        }

        if self.secure {
            cookie.push_str("; Secure");
        }

        HeaderValue::from_str(&cookie)
    }

    /// `Set-Cookie` value that deletes the session cookie.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeaderValue` if the configured name is not a valid
    /// header token.
    pub fn clear(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", self.name);
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

/// Generated keys are base64url, so anything else cannot match a session.
fn is_key_value(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_finds_named_cookie() {
        let cookie = SessionCookie::default();
        let headers = headers_with_cookie("theme=dark; portal.session=abc_DEF-123; lang=en");

        let key = cookie.extract(&headers).unwrap();
        assert_eq!(key.as_str(), "abc_DEF-123");
    }

    #[test]
    fn test_extract_across_multiple_cookie_headers() {
        let cookie = SessionCookie::default();
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(header::COOKIE, HeaderValue::from_static("portal.session=key1"));

        assert_eq!(cookie.extract(&headers).unwrap().as_str(), "key1");
    }

    #[test]
    fn test_extract_missing_cookie() {
        let cookie = SessionCookie::default();
        assert!(cookie.extract(&HeaderMap::new()).is_none());
        assert!(cookie.extract(&headers_with_cookie("other=value")).is_none());
    }

    #[test]
    fn test_extract_rejects_empty_and_foreign_values() {
        let cookie = SessionCookie::default();
        assert!(cookie.extract(&headers_with_cookie("portal.session=")).is_none());
        assert!(cookie
            .extract(&headers_with_cookie("portal.session=<script>"))
            .is_none());
    }

    #[test]
    fn test_extract_skips_malformed_duplicate() {
        let cookie = SessionCookie::default();
        let headers = headers_with_cookie("portal.session=; portal.session=<old>; portal.session=key2");
        assert_eq!(cookie.extract(&headers).unwrap().as_str(), "key2");

        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("portal.session=bad value"));
        headers.append(header::COOKIE, HeaderValue::from_static("portal.session=key3"));
        assert_eq!(cookie.extract(&headers).unwrap().as_str(), "key3");
    }

    #[test]
    fn test_extract_does_not_match_name_prefix() {
        let cookie = SessionCookie::default();
        let headers = headers_with_cookie("portal.session.old=stale");
        assert!(cookie.extract(&headers).is_none());
    }

    #[test]
    fn test_issue_sets_attributes() {
        let cookie = SessionCookie::default();
        let now = Utc::now();
        let value = cookie
            .issue(
                &SessionKey::new("k3y"),
                Some(now + chrono::Duration::seconds(3600)),
                now,
            )
            .unwrap();
        let value = value.to_str().unwrap();

        assert!(value.starts_with("portal.session=k3y;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("Max-Age=3600"));
        assert!(value.contains("Secure"));
    }

    #[test]
    fn test_issue_without_expiry_is_session_cookie() {
        let cookie = SessionCookie::new("sid", false);
        let value = cookie
            .issue(&SessionKey::new("k3y"), None, Utc::now())
            .unwrap();
        let value = value.to_str().unwrap();

        assert!(!value.contains("Max-Age"));
        assert!(!value.contains("Secure"));
    }

    #[test]
    fn test_clear_expires_cookie() {
        let value = SessionCookie::default().clear().unwrap();
        let value = value.to_str().unwrap();

        assert!(value.starts_with("portal.session=;"));
        assert!(value.contains("Max-Age=0"));
    }
}

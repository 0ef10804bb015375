//! Session management.
//!
//! Sessions are held by the client in an AES-GCM encrypted cookie. The gateway
//! keeps no session state; validity is recomputed from the cookie on every request.

use crate::config::{GatewayError, Result};
use crate::security::crypto::CookieCrypto;
use hyper::HeaderMap;
use hyper::header::COOKIE;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SESSION_COOKIE_NAME: &str = "homegate_session";

/// Authenticated-state record carried in the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub email: String,
    pub device_id: Option<String>,
    pub logged_in: bool,
    /// Unix seconds at which the backend confirmed the login.
    pub issued_at: u64,
}

impl Session {
    /// A session is valid iff it is logged in and younger than `ttl`.
    #[must_use]
    pub fn is_valid_at(&self, now: u64, ttl: Duration) -> bool {
        self.logged_in && now.saturating_sub(self.issued_at) < ttl.as_secs()
    }

    /// Seconds left before the session expires.
    #[must_use]
    pub fn expires_in(&self, now: u64, ttl: Duration) -> u64 {
        ttl.as_secs()
            .saturating_sub(now.saturating_sub(self.issued_at))
    }
}

/// Outcome of a session check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session cookie was presented.
    Anonymous,
    Authenticated(Session),
    /// A cookie was presented but is expired, logged out or unreadable.
    /// The caller must clear it on the response.
    Expired,
}

impl SessionStatus {
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            Self::Anonymous | Self::Expired => None,
        }
    }

    /// Whether the response must carry a clearing `Set-Cookie`.
    #[must_use]
    pub const fn needs_clearing(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// Issues, validates and clears session cookies.
#[derive(Clone)]
pub struct SessionManager {
    crypto: CookieCrypto,
    ttl: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            crypto: CookieCrypto::new(secret),
            ttl,
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Creates a logged-in session stamped at `now` and its `Set-Cookie` value.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be serialized or encrypted.
    pub fn issue(
        &self,
        email: &str,
        device_id: Option<String>,
        now: u64,
    ) -> Result<(Session, String)> {
        let session = Session {
            email: email.to_string(),
            device_id,
            logged_in: true,
            issued_at: now,
        };
        let plaintext =
            serde_json::to_vec(&session).map_err(|e| GatewayError::Crypto(e.to_string()))?;
        let value = self
            .crypto
            .encrypt(&plaintext, SESSION_COOKIE_NAME.as_bytes())?;
        let cookie = format_set_cookie(SESSION_COOKIE_NAME, &value, self.ttl.as_secs());
        Ok((session, cookie))
    }

    /// Evaluates the session cookie found in `headers` at time `now`.
    #[must_use]
    pub fn check(&self, headers: &HeaderMap, now: u64) -> SessionStatus {
        let Some(value) = find_cookie(headers, SESSION_COOKIE_NAME) else {
            return SessionStatus::Anonymous;
        };

        let session = self
            .crypto
            .decrypt(&value, SESSION_COOKIE_NAME.as_bytes())
            .and_then(|plaintext| serde_json::from_slice::<Session>(&plaintext).ok());

        match session {
            Some(session) if session.is_valid_at(now, self.ttl) => {
                SessionStatus::Authenticated(session)
            }
            _ => SessionStatus::Expired,
        }
    }

    /// `Set-Cookie` value that removes the session from the browser.
    ///
    /// Sessions are held only by the client, so a copy of the cookie taken
    /// before logout keeps validating until `issued_at + ttl`.
    #[must_use]
    pub fn clear_cookie(&self) -> String {
        format_set_cookie(SESSION_COOKIE_NAME, "", 0)
    }
}

#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[must_use]
pub fn format_set_cookie(name: &str, value: &str, max_age: u64) -> String {
    format!("{name}={value}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={max_age}")
}

fn cookie_pairs(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
}

/// Returns the value of cookie `name`, if present.
#[must_use]
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    cookie_pairs(headers).find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim().to_string())
    })
}

/// Rebuilds the `Cookie` header without cookie `name`; `None` if nothing is left.
#[must_use]
pub fn strip_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let kept: Vec<&str> = cookie_pairs(headers)
        .filter(|pair| pair.split_once('=').map_or(*pair, |(key, _)| key).trim() != name)
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("; "))
    }
}

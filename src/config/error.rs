//! Error types and result aliases.
//!
//! Defines the core `GatewayError` enumeration and common `Result` type.

use std::time::Duration;
use thiserror::Error;

/// Gateway errors.
///
/// Upstream replies with a non-2xx status are not errors: they are relayed verbatim.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every configured backend failed or timed out.
    #[error("no backend reachable after {attempts} attempt(s)")]
    BackendUnreachable { attempts: usize },

    /// A backend answered but its body could not be read or parsed.
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedUpstreamResponse { endpoint: String, reason: String },

    /// Too many failed logins for this identity and origin.
    #[error("too many failed login attempts, retry in {}s", retry_after_secs(*.retry_after))]
    RateLimited { retry_after: Duration },

    /// Session missing, tampered with or expired.
    #[error("not logged in")]
    SessionInvalid,

    /// Structurally malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request body over the configured limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("no such route: {0}")]
    NotFound(String),

    #[error("method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    /// Counter store unreachable or returned garbage.
    #[error("counter store error: {0}")]
    Store(String),

    /// Cookie encryption failure.
    #[error("cookie crypto error: {0}")]
    Crypto(String),
}

impl GatewayError {
    /// Stable machine-readable code used in the error envelope.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::BackendUnreachable { .. } | Self::MalformedUpstreamResponse { .. } => {
                "backend_unreachable"
            }
            Self::RateLimited { .. } => "too_many_attempts",
            Self::SessionInvalid => "session_invalid",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::NotFound(_) => "not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::Store(_) => "store_unavailable",
            Self::Crypto(_) => "internal_error",
        }
    }
}

/// Whole seconds for a `Retry-After` header: rounded up, never zero.
#[must_use]
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl From<redis::RedisError> for GatewayError {
    fn from(e: redis::RedisError) -> Self {
        Self::Store(e.to_string())
    }
}

/// Result type alias for `GatewayError`.
pub type Result<T> = std::result::Result<T, GatewayError>;

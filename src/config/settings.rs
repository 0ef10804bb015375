//! Configuration settings.
//!
//! Defines the main `Config` struct and environment variable loading logic.

use crate::config::error::{GatewayError, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Position of an endpoint in the failover order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    Primary,
    Fallback,
}

/// One upstream application backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    /// Base URL without trailing slash, e.g. `https://api.example.com`.
    pub base_url: String,
    pub role: BackendRole,
    /// Bound on a single attempt against this endpoint.
    pub timeout: Duration,
}

impl BackendEndpoint {
    /// Joins a façade path (with optional query) onto the base URL.
    #[must_use]
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{path_and_query}", self.base_url)
    }
}

fn get_env(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| GatewayError::Config(format!("{key} must be set in environment")))
}

fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_bool(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn get_env_parsed_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| GatewayError::Config(format!("{key} has an invalid value: {raw}"))),
        _ => Ok(default),
    }
}

/// Splits a comma-separated URL list into endpoints of the given role.
///
/// # Errors
///
/// Returns an error if a URL is not `http://` or `https://`.
pub fn parse_endpoints(
    list: &str,
    role: BackendRole,
    timeout: Duration,
) -> Result<Vec<BackendEndpoint>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|raw| {
            if !(raw.starts_with("http://") || raw.starts_with("https://")) {
                return Err(GatewayError::Config(format!(
                    "backend URL must be http:// or https://: {raw}"
                )));
            }
            Ok(BackendEndpoint {
                base_url: raw.trim_end_matches('/').to_string(),
                role,
                timeout,
            })
        })
        .collect()
}

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the façade listens on.
    pub listen_addr: SocketAddr,
    /// Ordered backends: primaries first, then fallbacks.
    pub backends: Vec<BackendEndpoint>,
    /// Restrict failover to the fallback subset.
    pub fallback_only: bool,
    /// Failed logins tolerated per identity and origin within the window.
    pub login_max_attempts: u64,
    /// Window opened by the first failed login.
    pub login_window: Duration,
    /// Session lifetime, also the cookie Max-Age.
    pub session_ttl: Duration,
    /// Secret key for session cookie encryption.
    pub session_secret: String,
    /// Pause between event stream reconnect attempts.
    pub sse_reconnect_delay: Duration,
    /// `redis://` URL of the shared counter store; in-process store when unset.
    pub counter_store_url: Option<String>,
    /// Expect a PROXY protocol header on every accepted connection.
    pub proxy_protocol: bool,
    /// Maximum concurrently served connections.
    pub concurrency_limit: usize,
    /// Maximum inbound request body in bytes.
    pub client_max_body_size: usize,
    /// Time a connection may take to send its PROXY header and request head.
    pub client_header_timeout: Duration,
    /// Logging format: "json" or "pretty".
    pub log_format: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if `BACKEND_URLS` or `SESSION_SECRET` is missing,
    /// if any numeric variable fails to parse, or if validation fails.
    pub fn from_env() -> Result<Arc<Self>> {
        let listen_addr = get_env_or("LISTEN_ADDR", "0.0.0.0:10000")
            .parse()
            .map_err(|_| GatewayError::Config("LISTEN_ADDR must be a socket address".into()))?;
        let timeout = Duration::from_millis(get_env_parsed_or("BACKEND_TIMEOUT_MS", 2000)?);

        let mut backends =
            parse_endpoints(&get_env("BACKEND_URLS")?, BackendRole::Primary, timeout)?;
        backends.extend(parse_endpoints(
            &get_env_or("FALLBACK_URLS", ""),
            BackendRole::Fallback,
            timeout,
        )?);

        let config = Self {
            listen_addr,
            backends,
            fallback_only: get_env_bool("FALLBACK_ONLY"),
            login_max_attempts: get_env_parsed_or("LOGIN_MAX_ATTEMPTS", 5)?,
            login_window: Duration::from_secs(get_env_parsed_or("LOGIN_WINDOW_SECS", 900)?),
            session_ttl: Duration::from_secs(get_env_parsed_or("SESSION_TTL_SECS", 3600)?),
            session_secret: get_env("SESSION_SECRET")?,
            sse_reconnect_delay: Duration::from_millis(get_env_parsed_or(
                "SSE_RECONNECT_DELAY_MS",
                3000,
            )?),
            counter_store_url: env::var("COUNTER_STORE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            proxy_protocol: get_env_bool("PROXY_PROTOCOL"),
            concurrency_limit: get_env_parsed_or("CONCURRENCY_LIMIT", 1024)?,
            client_max_body_size: get_env_parsed_or("CLIENT_MAX_BODY_SIZE", 65_536)?,
            client_header_timeout: Duration::from_millis(get_env_parsed_or(
                "CLIENT_HEADER_TIMEOUT_MS",
                10_000,
            )?),
            log_format: get_env_or("LOG_FORMAT", "json"),
        };

        config.validate()?;
        Ok(Arc::new(config))
    }

    /// Checks cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.active_backends().next().is_none() {
            let what = if self.fallback_only {
                "FALLBACK_ONLY is set but no FALLBACK_URLS are configured"
            } else {
                "at least one backend URL is required"
            };
            return Err(GatewayError::Config(what.to_string()));
        }
        if self.login_max_attempts == 0 {
            return Err(GatewayError::Config("LOGIN_MAX_ATTEMPTS must be > 0".into()));
        }
        if self.login_window.is_zero() || self.session_ttl.is_zero() {
            return Err(GatewayError::Config(
                "LOGIN_WINDOW_SECS and SESSION_TTL_SECS must be > 0".into(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(GatewayError::Config("CONCURRENCY_LIMIT must be > 0".into()));
        }
        if self.client_header_timeout.is_zero() {
            return Err(GatewayError::Config("CLIENT_HEADER_TIMEOUT_MS must be > 0".into()));
        }
        Ok(())
    }

    /// Endpoints the selector may use, in failover order.
    pub fn active_backends(&self) -> impl Iterator<Item = &BackendEndpoint> {
        self.backends
            .iter()
            .filter(|b| !self.fallback_only || b.role == BackendRole::Fallback)
    }
}

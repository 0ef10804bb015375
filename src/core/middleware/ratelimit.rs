//! Login attempt limiting.
//!
//! Counts failed logins per (identity, origin) in a fixed window held by the
//! shared counter store. Reads never mutate; only backend-confirmed outcomes do.

use crate::config::Result;
use crate::store::CounterStore;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Result of a pre-login check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginCheck {
    pub allowed: bool,
    /// Remaining window when blocked; zero otherwise.
    pub retry_after: Duration,
}

impl LoginCheck {
    const ALLOWED: Self = Self {
        allowed: true,
        retry_after: Duration::ZERO,
    };
}

#[derive(Clone)]
pub struct LoginRateLimiter {
    store: Arc<dyn CounterStore>,
    max_attempts: u64,
    window: Duration,
}

impl LoginRateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, max_attempts: u64, window: Duration) -> Self {
        Self {
            store,
            max_attempts,
            window,
        }
    }

    /// Reports whether `identity` may attempt a login from `origin`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Store` if the counter store cannot be read.
    pub async fn check(&self, identity: &str, origin: IpAddr) -> Result<LoginCheck> {
        let Some(state) = self.store.get(&Self::key(identity, origin)).await? else {
            return Ok(LoginCheck::ALLOWED);
        };

        if state.count >= self.max_attempts {
            Ok(LoginCheck {
                allowed: false,
                retry_after: state.ttl,
            })
        } else {
            Ok(LoginCheck::ALLOWED)
        }
    }

    /// Counts one backend-confirmed failure; returns the count in the current window.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Store` if the counter store cannot be updated.
    pub async fn record_failure(&self, identity: &str, origin: IpAddr) -> Result<u64> {
        self.store
            .increment_or_create(&Self::key(identity, origin), self.window)
            .await
    }

    /// Clears the counter after a backend-confirmed success.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Store` if the counter store cannot be updated.
    pub async fn record_success(&self, identity: &str, origin: IpAddr) -> Result<()> {
        self.store.delete(&Self::key(identity, origin)).await
    }

    fn key(identity: &str, origin: IpAddr) -> String {
        format!("login:{}:{origin}", normalize_identity(identity))
    }
}

/// Case- and whitespace-insensitive identity used in counter keys.
#[must_use]
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

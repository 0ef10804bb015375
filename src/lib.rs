//! Library definitions.
//!
//! Exports configuration, the counter store, middleware and the gateway service.

pub mod config;
pub mod core;
pub mod security;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;
pub use config::{Config, GatewayError, Result};
pub use core::middleware::{LoginRateLimiter, SESSION_COOKIE_NAME, SessionManager};
pub use core::proxy::{BackendSelector, EventRelay, Gateway, serve};
pub use security::crypto::CookieCrypto;
pub use store::CounterStore;

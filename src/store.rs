//! Shared attempt counters.
//!
//! Narrow counter interface with per-key expiry, backed either by an in-process
//! lock-free map or by Redis when several gateway replicas must agree.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::config::{Config, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Snapshot of a live counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub count: u64,
    /// Time left until the counter disappears on its own.
    pub ttl: Duration,
}

/// Atomic counter store with TTL.
///
/// Implementations must make `increment_or_create` race-free: concurrent callers
/// observe distinct counts and the expiry set on creation is never extended.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments `key`, creating it at 1 with `window` as TTL if absent or expired.
    async fn increment_or_create(&self, key: &str, window: Duration) -> Result<u64>;

    /// Reads `key`; expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<CounterState>>;

    /// Removes `key` unconditionally.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Opens the store selected by `COUNTER_STORE_URL`.
///
/// # Errors
///
/// Returns `GatewayError::Store` if the Redis store cannot be reached.
pub async fn connect(config: &Config) -> Result<Arc<dyn CounterStore>> {
    if let Some(url) = &config.counter_store_url {
        let store = RedisStore::connect(url).await?;
        info!("Using Redis counter store");
        return Ok(Arc::new(store));
    }

    let store = Arc::new(MemoryStore::new());
    store.start_janitor(config.login_window.min(Duration::from_secs(60)));
    info!("Using in-process counter store");
    Ok(store)
}

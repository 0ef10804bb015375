//! Redis-backed counter store.
//!
//! Shares counters across gateway replicas. Increment and TTL setup run as one
//! Lua script so the window is only ever set by the first increment.

use super::{CounterState, CounterStore};
use crate::config::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

const KEY_PREFIX: &str = "homegate:";

const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    increment: redis::Script,
}

impl RedisStore {
    /// Connects to Redis; supports both redis:// and rediss:// URLs.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Store` if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            increment: redis::Script::new(INCREMENT_SCRIPT),
        })
    }

    fn key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_or_create(&self, key: &str, window: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let count: u64 = self
            .increment
            .key(Self::key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<CounterState>> {
        let mut conn = self.conn.clone();
        let key = Self::key(key);
        let (count, pttl): (Option<u64>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        // PTTL is -2 for a missing key and -1 for a key without expiry.
        Ok(match (count, u64::try_from(pttl)) {
            (Some(count), Ok(ms)) if ms > 0 => Some(CounterState {
                count,
                ttl: Duration::from_millis(ms),
            }),
            _ => None,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(Self::key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

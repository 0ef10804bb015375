//! In-process counter store.
//!
//! Counters live in a `papaya` map and expire against `tokio::time::Instant`,
//! so tests can drive the clock with `tokio::time::pause`.

use super::{CounterState, CounterStore};
use crate::config::Result;
use async_trait::async_trait;
use papaya::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct Entry {
    count: u64,
    expires_at: Instant,
}

pub struct MemoryStore {
    entries: HashMap<String, Entry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn bump(&self, key: &str, window: Duration) -> u64 {
        let now = Instant::now();
        let entries = self.entries.pin();
        let entry = entries.update_or_insert_with(
            key.to_string(),
            |current| {
                if current.expires_at > now {
                    Entry {
                        count: current.count + 1,
                        expires_at: current.expires_at,
                    }
                } else {
                    Entry {
                        count: 1,
                        expires_at: now + window,
                    }
                }
            },
            || Entry {
                count: 1,
                expires_at: now + window,
            },
        );
        entry.count
    }

    fn read(&self, key: &str) -> Option<CounterState> {
        let now = Instant::now();
        let entries = self.entries.pin();
        let entry = entries.get(key)?;
        if entry.expires_at <= now {
            self.remove_expired(key, now);
            return None;
        }
        Some(CounterState {
            count: entry.count,
            ttl: entry.expires_at - now,
        })
    }

    /// Drops expired counters and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.pin();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .iter()
            .filter(|key| self.remove_expired(key, now))
            .count()
    }

    /// Removes `key` only if the stored entry is still expired at `now`. A
    /// counter recreated concurrently by `bump` is left in place.
    fn remove_expired(&self, key: &str, now: Instant) -> bool {
        matches!(
            self.entries
                .pin()
                .remove_if(key, |_, entry| entry.expires_at <= now),
            Ok(Some(_))
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.pin().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns a background purge loop that ends once the store is dropped.
    pub fn start_janitor(self: &Arc<Self>, every: Duration) {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged = purged, "Purged expired counters");
                }
            }
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_or_create(&self, key: &str, window: Duration) -> Result<u64> {
        Ok(self.bump(key, window))
    }

    async fn get(&self, key: &str) -> Result<Option<CounterState>> {
        Ok(self.read(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.pin().remove(key);
        Ok(())
    }
}

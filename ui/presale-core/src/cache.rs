//! Last-known-good snapshots, persisted with a timestamp and a bounded lifetime.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Result, WalletError};
use crate::storage::KeyValueStore;

pub const KEY_PREFIX: &str = "snapshot:";

#[derive(Serialize, Deserialize)]
struct Entry<T> {
    saved_at_ms: u64,
    data: T,
}

/// A snapshot read back from the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cached<T> {
    pub data: T,
    pub saved_at_ms: u64,
}

#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Snapshots are scoped to one account on one network.
    pub fn key(page: &str, chain_id: u64, account: &impl std::fmt::Display) -> String {
        format!("{KEY_PREFIX}{page}:{chain_id}:{account}")
    }

    pub fn save<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let entry = Entry {
            saved_at_ms: self.clock.now_ms(),
            data,
        };
        let text = serde_json::to_string(&entry).map_err(|e| WalletError::Storage(e.to_string()))?;
        self.store.set(key, &text)
    }

    /// The cached value if it is younger than the TTL. Expired or unreadable entries are
    /// removed.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<Cached<T>> {
        let text = self.store.get(key)?;
        let entry: Entry<T> = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(key, error = %e, "dropping unreadable cache entry");
                let _ = self.store.remove(key);
                return None;
            }
        };
        let age = self.clock.now_ms().saturating_sub(entry.saved_at_ms);
        if age > self.ttl.as_millis() as u64 {
            debug!(key, age_ms = age, "cache entry expired");
            let _ = self.store.remove(key);
            return None;
        }
        Some(Cached {
            data: entry.data,
            saved_at_ms: entry.saved_at_ms,
        })
    }

    /// Drop every expired snapshot in the store.
    pub fn prune(&self) {
        for key in self.store.keys() {
            if key.starts_with(KEY_PREFIX) {
                let _ = self.load::<serde_json::Value>(&key);
            }
        }
    }
}

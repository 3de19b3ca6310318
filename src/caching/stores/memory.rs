//! # In-Memory Cache Store
//!
//! Process-local store with per-entry TTL. Expiry is measured on the tokio
//! clock, so tests can drive it with `tokio::time::advance`.
//!
//! There is no size-based eviction: entries live until their TTL runs out,
//! mirroring how the Redis store is used. Expired entries are dropped on read
//! and by a background task that sweeps the whole map every cleanup interval.

use super::{CacheStore, StoreLifecycle};
use crate::core::error::CacheResult;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often expired entries are swept by default
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: DashMap<String, StoredValue>,
    expired_cleanups: AtomicU64,
}

impl Entries {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, stored| !stored.is_expired(now));

        let removed = before.saturating_sub(self.map.len());
        if removed > 0 {
            self.expired_cleanups
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Purged {} expired cache entries", removed);
        }
        removed
    }
}

/// In-memory cache implementation
#[derive(Debug)]
pub struct InMemoryStore {
    entries: Arc<Entries>,
    lifecycle: StoreLifecycle,
    shutdown: CancellationToken,
}

impl InMemoryStore {
    /// Create a store that is available immediately
    ///
    /// Expired entries are swept every [`DEFAULT_CLEANUP_INTERVAL`].
    pub fn new() -> Self {
        Self::with_cleanup_interval(DEFAULT_CLEANUP_INTERVAL)
    }

    /// Create a store that sweeps expired entries every `cleanup_interval`
    ///
    /// The sweep runs on the current tokio runtime. Outside a runtime there is
    /// no sweep and expired entries are only dropped when read or purged.
    pub fn with_cleanup_interval(cleanup_interval: Duration) -> Self {
        let lifecycle = StoreLifecycle::new();
        lifecycle.connected();

        let store = Self {
            entries: Arc::new(Entries::default()),
            lifecycle,
            shutdown: CancellationToken::new(),
        };
        spawn_cleanup(
            Arc::downgrade(&store.entries),
            store.shutdown.clone(),
            cleanup_interval,
        );
        store
    }

    /// Number of entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.map.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.map.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.entries.purge_expired()
    }

    /// Total entries removed because they expired
    pub fn expired_cleanups(&self) -> u64 {
        self.entries.expired_cleanups.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_cleanup(entries: Weak<Entries>, shutdown: CancellationToken, every: Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        debug!("No tokio runtime, expired entries are purged on read only");
        return;
    };

    handle.spawn(async move {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(entries) = entries.upgrade() else { break };
                    entries.purge_expired();
                }
            }
        }
        debug!("In-memory cache cleanup stopped");
    });
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let now = Instant::now();

        let expired = match self.entries.map.get(key) {
            Some(stored) if !stored.is_expired(now) => return Ok(Some(stored.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired
            && self
                .entries
                .map
                .remove_if(key, |_, stored| stored.is_expired(now))
                .is_some()
        {
            self.entries.expired_cleanups.fetch_add(1, Ordering::Relaxed);
        }

        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.entries.map.insert(
            key.to_string(),
            StoredValue {
                value: Bytes::copy_from_slice(value),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.map.remove(key).is_some())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn lifecycle(&self) -> &StoreLifecycle {
        &self.lifecycle
    }
}

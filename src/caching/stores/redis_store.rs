//! # Redis Cache Store
//!
//! Redis-backed store built on `ConnectionManager`.
//!
//! The connection is owned by a background monitor that connects, pings on an
//! interval and reports transitions through the store's [`StoreLifecycle`].
//! Construction never waits for Redis to come up: when the server is
//! unreachable the store starts out unavailable and the cache layer runs in
//! passthrough mode until the monitor gets a connection.

use super::{CacheStore, StoreLifecycle};
use crate::core::config::{RedisClientOptions, RedisConfig};
use crate::core::error::{CacheError, CacheResult};
use async_trait::async_trait;
use bytes::Bytes;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Redis cache implementation
///
/// Cheap to clone; clones share one connection and one lifecycle.
#[derive(Clone)]
pub struct RedisStore {
    inner: Arc<RedisInner>,
}

struct RedisInner {
    client: Client,
    url: String,
    check_interval: Duration,
    options: RedisClientOptions,
    connection: RwLock<Option<ConnectionManager>>,
    lifecycle: StoreLifecycle,
    connection_errors: AtomicU64,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl RedisStore {
    /// Create the store without touching the network
    ///
    /// Fails only when the URL cannot be parsed.
    pub fn new(config: &RedisConfig) -> CacheResult<Self> {
        let url = config.connection_url();
        let client = Client::open(url.as_str())?;

        Ok(Self {
            inner: Arc::new(RedisInner {
                client,
                url,
                check_interval: config.health_check_interval,
                options: config.client.clone(),
                connection: RwLock::new(None),
                lifecycle: StoreLifecycle::new(),
                connection_errors: AtomicU64::new(0),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Create the store, make one connection attempt and start the monitor
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let store = Self::new(config)?;
        store.start().await;
        Ok(store)
    }

    /// Make the first connection attempt and start the monitor; later calls do nothing
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.try_connect().await;
        spawn_monitor(Arc::downgrade(&self.inner), self.inner.check_interval);
    }

    /// A handle to the live connection
    pub async fn connection(&self) -> CacheResult<ConnectionManager> {
        self.inner
            .connection
            .read()
            .await
            .clone()
            .ok_or(CacheError::Unavailable)
    }

    /// Run a command under the response timeout
    ///
    /// Failures that look like a lost connection, timeouts included, mark the
    /// store unavailable until the monitor gets a ping through again.
    pub(crate) async fn execute<T, F>(&self, command: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.inner.options.response_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.inner.observe(e.into())),
            Err(_) => {
                let timed_out = redis::RedisError::from(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Redis response timed out",
                ));
                Err(self.inner.observe(timed_out.into()))
            }
        }
    }

    /// Number of connection-level failures seen so far
    pub fn connection_errors(&self) -> u64 {
        self.inner.connection_errors.load(Ordering::Relaxed)
    }
}

impl RedisInner {
    async fn try_connect(&self) {
        let options = &self.options;
        let attempt = tokio::time::timeout(
            options.connection_timeout,
            ConnectionManager::new_with_backoff(
                self.client.clone(),
                options.backoff_base,
                options.backoff_factor,
                options.retries,
            ),
        )
        .await;

        match attempt {
            Ok(Ok(manager)) => {
                *self.connection.write().await = Some(manager);
                info!("Redis cache connected to {}", self.url);
                self.lifecycle.connected();
            }
            Ok(Err(e)) => self.connection_failed(e.into()),
            Err(_) => self.connection_failed(CacheError::store(format!(
                "connection to {} timed out",
                self.url
            ))),
        }
    }

    async fn check(&self) {
        let connection = self.connection.read().await.clone();
        let Some(mut connection) = connection else {
            self.try_connect().await;
            return;
        };

        let cmd = redis::cmd("PING");
        let ping = cmd.query_async::<_, String>(&mut connection);
        match tokio::time::timeout(self.options.response_timeout, ping).await {
            Ok(Ok(_)) => {
                if !self.lifecycle.is_available() {
                    self.lifecycle.connected();
                }
            }
            Ok(Err(e)) => self.connection_failed(e.into()),
            Err(_) => self.connection_failed(CacheError::store("health check timed out")),
        }
    }

    fn connection_failed(&self, error: CacheError) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
        if !self.lifecycle.errored(error) {
            debug!(url = %self.url, "Redis still unreachable");
        }
    }

    fn observe(&self, error: CacheError) -> CacheError {
        if error.is_connection_error() {
            warn!(error = %error, "Redis connection failure");
            self.connection_failed(error.clone());
        }
        error
    }
}

impl Drop for RedisInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_monitor(inner: Weak<RedisInner>, interval: Duration) {
    let Some(shutdown) = inner.upgrade().map(|inner| inner.shutdown.clone()) else {
        return;
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.check().await;
                }
            }
        }
        debug!("Redis connection monitor stopped");
    });
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = self.execute(conn.get(key)).await?;

        debug!(key, hit = value.is_some(), "Redis get");
        Ok(value.map(Bytes::from))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        // SETEX needs whole seconds, and at least one
        let ttl_seconds = ttl.as_secs().max(1);

        self.execute(conn.set_ex::<_, _, ()>(key, value, ttl_seconds))
            .await?;

        debug!("Set Redis cache key: {} with TTL: {}s", key, ttl_seconds);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self.execute(conn.del(key)).await?;
        Ok(deleted > 0)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let cmd = redis::cmd("PING");
        let response: String = self.execute(cmd.query_async(&mut conn)).await?;
        Ok(response == "PONG")
    }

    fn lifecycle(&self) -> &StoreLifecycle {
        &self.inner.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::stores::Availability;

    fn redis_config() -> RedisConfig {
        RedisConfig {
            url: Some(
                std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string()),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let config = RedisConfig {
            url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(RedisStore::connect(&config).await.is_err());
    }

    #[test]
    fn test_new_does_not_connect() {
        let store = RedisStore::new(&RedisConfig::default()).unwrap();
        assert_eq!(store.lifecycle().availability(), Availability::Unknown);
        assert_eq!(store.connection_errors(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_once() {
        let config = RedisConfig {
            url: Some("redis://127.0.0.1:1/".to_string()),
            health_check_interval: Duration::from_millis(50),
            client: RedisClientOptions {
                retries: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();

        let store = RedisStore::new(&config).unwrap();
        store.lifecycle().on_error(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        store.start().await;

        // several failed monitor checks within one outage
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.connection_errors() >= 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_starts_unavailable() {
        let config = RedisConfig {
            url: Some("redis://127.0.0.1:1/".to_string()),
            health_check_interval: Duration::from_millis(200),
            client: RedisClientOptions {
                retries: 0,
                ..Default::default()
            },
            ..Default::default()
        };

        let store = RedisStore::connect(&config).await.unwrap();
        assert_eq!(store.lifecycle().availability(), Availability::Unavailable);
        assert!(matches!(store.get("k").await, Err(CacheError::Unavailable)));
        assert!(store.connection_errors() >= 1);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (REDIS_URL)
    async fn test_basic_operations() {
        let store = RedisStore::connect(&redis_config()).await.unwrap();
        assert!(store.lifecycle().is_available());

        store
            .set_ex("bloom-cache:test:key", b"value", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("bloom-cache:test:key").await.unwrap(),
            Some(Bytes::from_static(b"value"))
        );
        assert!(store.delete("bloom-cache:test:key").await.unwrap());
        assert_eq!(store.get("bloom-cache:test:key").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (REDIS_URL)
    async fn test_ttl_expiration() {
        let store = RedisStore::connect(&redis_config()).await.unwrap();
        store
            .set_ex("bloom-cache:test:expire", b"value", Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get("bloom-cache:test:expire").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (REDIS_URL)
    async fn test_health_check() {
        let store = RedisStore::connect(&redis_config()).await.unwrap();
        assert!(store.health_check().await.unwrap());
    }
}

//! Redis bloom filter backend.
//!
//! Each filter is a plain Redis bitmap. Bits are set and tested with small Lua
//! scripts so one item costs one round trip, and no RedisBloom module is
//! required on the server.

use super::{BloomParams, FilterBackend};
use crate::caching::stores::RedisStore;
use crate::core::error::CacheResult;
use async_trait::async_trait;
use redis::{AsyncCommands, Script};

const SET_BITS: &str = r"
for i = 1, #ARGV do
    redis.call('SETBIT', KEYS[1], ARGV[i], 1)
end
return 1
";

const TEST_BITS: &str = r"
for i = 1, #ARGV do
    if redis.call('GETBIT', KEYS[1], ARGV[i]) == 0 then
        return 0
    end
end
return 1
";

/// Bloom filter stored in Redis bitmaps
///
/// Shares the store's connection, so a filter failure that looks like a lost
/// connection also marks the store unavailable.
pub struct RedisBloomFilter {
    store: RedisStore,
    params: BloomParams,
    set_bits: Script,
    test_bits: Script,
}

impl RedisBloomFilter {
    pub fn new(store: RedisStore, params: BloomParams) -> Self {
        Self {
            store,
            params,
            set_bits: Script::new(SET_BITS),
            test_bits: Script::new(TEST_BITS),
        }
    }
}

#[async_trait]
impl FilterBackend for RedisBloomFilter {
    async fn add(&self, key: &str, item: &str) -> CacheResult<()> {
        let mut conn = self.store.connection().await?;

        let mut invocation = self.set_bits.key(key);
        invocation.arg(self.params.positions(item));
        let _: i64 = self.store.execute(invocation.invoke_async(&mut conn)).await?;

        Ok(())
    }

    async fn contains(&self, key: &str, item: &str) -> CacheResult<bool> {
        let mut conn = self.store.connection().await?;

        let mut invocation = self.test_bits.key(key);
        invocation.arg(self.params.positions(item));
        let present: i64 = self.store.execute(invocation.invoke_async(&mut conn)).await?;

        Ok(present == 1)
    }

    async fn init(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.store.connection().await?;
        self.store.execute(conn.del::<_, ()>(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{RedisClientOptions, RedisConfig};
    use crate::core::error::CacheError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unavailable_store_reports_error() {
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
        let filter = RedisBloomFilter::new(store, BloomParams::new(256, 16));

        assert!(matches!(
            filter.contains("bloom-filter:default", "k").await,
            Err(CacheError::Unavailable)
        ));
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis (REDIS_URL)
    async fn test_add_contains_init() {
        let config = RedisConfig {
            url: Some(
                std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string()),
            ),
            ..Default::default()
        };
        let store = RedisStore::connect(&config).await.unwrap();
        let filter = RedisBloomFilter::new(store, BloomParams::new(256, 16));
        let key = "bloom-filter:test";

        filter.init(key).await.unwrap();
        assert!(!filter.contains(key, "bloom-cache:/a").await.unwrap());

        filter.add(key, "bloom-cache:/a").await.unwrap();
        assert!(filter.contains(key, "bloom-cache:/a").await.unwrap());

        filter.init(key).await.unwrap();
        assert!(!filter.contains(key, "bloom-cache:/a").await.unwrap());
    }
}

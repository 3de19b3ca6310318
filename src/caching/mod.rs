//! # Caching Module
//!
//! Response caching with a bloom filter in front of a key-value store.
//!
//! ## Architecture
//! 1. **Stores**: Redis and in-memory key-value adapters with an availability lifecycle
//! 2. **Filter**: namespaced membership filter, Redis bitmaps or in-memory
//! 3. **Key Generator**: cache keys, type keys and filter namespaces
//! 4. **Engine**: eligibility, lookup and write-back decisions
//! 5. **Middleware**: the tower layer that runs the engine around a handler
//!
//! ## Usage Example
//! ```ignore
//! use bloom_cache::{BloomCacheBuilder, CacheConfig};
//!
//! let config = CacheConfig::load_from_file("cache.yaml").await?;
//! let layer = BloomCacheBuilder::new(config)
//!     .on_error(|e| eprintln!("cache store error: {e}"))
//!     .connect()
//!     .await?;
//!
//! let app = Router::new().route("/", get(index)).layer(layer);
//! ```

pub mod builder;
pub mod engine;
pub mod filter;
pub mod key_generator;
pub mod middleware;
pub mod payload;
pub mod stores;

pub use builder::BloomCacheBuilder;
pub use engine::{
    CacheEngine, CacheState, CacheStats, CacheStatsSnapshot, IneligibleReason, Lookup, SkipReason,
    WriteOutcome,
};
pub use filter::{BloomParams, FilterBackend, InMemoryBloomFilter, MembershipFilter, RedisBloomFilter};
pub use key_generator::{CacheKey, FilterNamespace, KeyPrefix, NamespaceResolver};
pub use middleware::{BloomCacheLayer, BloomCacheService, CACHE_STATUS_HEADER, FILTER_STATUS_HEADER};
pub use payload::ResponsePayload;
pub use stores::{Availability, CacheStore, ErrorHook, InMemoryStore, RedisStore, StoreLifecycle};

//! # Bloom Cache
//!
//! HTTP response caching middleware for axum/tower services.
//!
//! Each eligible request is first checked against a bloom filter. A negative
//! answer skips the store entirely; a positive one is confirmed with a store
//! read and, on a hit, answered without running the handler. Cacheable
//! responses are written back with their content type and a per-route TTL.
//!
//! The filter is partitioned by namespace so it can be reset per tenant, and
//! every cache failure degrades to running the handler as if no cache existed.

/// Error types and configuration
pub mod core;

/// Route pattern compilation and rule evaluation
pub mod routing;

/// Stores, membership filter, decision engine and the tower layer
pub mod caching;

/// Logging setup
pub mod observability;

pub use caching::{
    BloomCacheBuilder, BloomCacheLayer, CacheEngine, CacheState, CacheStore, FilterBackend,
    FilterNamespace, InMemoryBloomFilter, InMemoryStore, RedisBloomFilter, RedisStore,
};
pub use core::config::CacheConfig;
pub use core::error::{CacheError, CacheResult};
pub use routing::{RoutePattern, RouteRule};

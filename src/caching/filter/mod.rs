//! # Membership Filter
//!
//! A bloom filter answers "could this key be cached?" before the store is
//! asked. A negative answer is authoritative and saves the store round trip; a
//! positive one still has to be confirmed by a store read.
//!
//! The filter is partitioned by namespace (for example one per tenant). Each
//! namespace lives under its own key, `base:namespace`, so namespaces never
//! see each other's entries and can be reset independently.

pub mod memory;
pub mod redis_filter;

pub use memory::InMemoryBloomFilter;
pub use redis_filter::RedisBloomFilter;

use crate::core::config::BloomConfig;
use crate::core::error::CacheResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Largest filter a Redis bitmap can hold (SETBIT offsets stop at 2^32 - 1)
pub const MAX_FILTER_BITS: u64 = 1 << 32;

/// Bit-array sizing shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomParams {
    /// Number of bits per filter
    pub size_bits: u64,

    /// Number of bit positions per item
    pub hashes: u32,
}

impl BloomParams {
    /// Create parameters; sizes are clamped to `1..=MAX_FILTER_BITS`, hashes to at least one
    pub fn new(size_bits: u64, hashes: u32) -> Self {
        Self {
            size_bits: size_bits.clamp(1, MAX_FILTER_BITS),
            hashes: hashes.max(1),
        }
    }

    /// Bit positions for an item
    ///
    /// Double hashing over a blake3 digest: `h1 + i * h2 (mod size)`.
    pub fn positions(&self, item: &str) -> Vec<u64> {
        let digest = blake3::hash(item.as_bytes());
        let bytes = digest.as_bytes();

        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&bytes[0..8]);
        second.copy_from_slice(&bytes[8..16]);

        let h1 = u64::from_le_bytes(first);
        // odd step so consecutive positions never collapse onto one bit
        let h2 = u64::from_le_bytes(second) | 1;

        (0..u64::from(self.hashes))
            .map(|i| h1.wrapping_add(i.wrapping_mul(h2)) % self.size_bits)
            .collect()
    }
}

impl From<&BloomConfig> for BloomParams {
    fn from(config: &BloomConfig) -> Self {
        Self::new(config.size, config.hashes)
    }
}

/// Bit-array capability, addressed by a full filter key
#[async_trait]
pub trait FilterBackend: Send + Sync {
    /// Set the item's bits
    async fn add(&self, key: &str, item: &str) -> CacheResult<()>;

    /// Whether all of the item's bits are set
    async fn contains(&self, key: &str, item: &str) -> CacheResult<bool>;

    /// Reset the filter to empty
    async fn init(&self, key: &str) -> CacheResult<()>;
}

/// Namespaced membership filter used by the decision engine
#[derive(Clone)]
pub struct MembershipFilter {
    backend: Arc<dyn FilterBackend>,
    base_key: String,
}

impl MembershipFilter {
    /// Wrap a backend under a base key
    pub fn new<S: Into<String>>(backend: Arc<dyn FilterBackend>, base_key: S) -> Self {
        Self {
            backend,
            base_key: base_key.into(),
        }
    }

    /// Storage key of a namespace's filter
    pub fn filter_key(&self, namespace: &str) -> String {
        format!("{}:{}", self.base_key, namespace)
    }

    /// Whether the item may be present; `Ok(false)` means definitely absent
    ///
    /// Backend failures are returned so the caller can tell a broken filter
    /// apart from a negative answer.
    pub async fn check(&self, item: &str, namespace: &str) -> CacheResult<bool> {
        self.backend.contains(&self.filter_key(namespace), item).await
    }

    /// Mark an item as possibly present; idempotent
    pub async fn record(&self, item: &str, namespace: &str) -> CacheResult<()> {
        self.backend.add(&self.filter_key(namespace), item).await
    }

    /// Empty the namespace's filter
    pub async fn reset(&self, namespace: &str) -> CacheResult<()> {
        self.backend.init(&self.filter_key(namespace)).await
    }
}

//! In-process bloom filter backend, one bit array per filter key.

use super::{BloomParams, FilterBackend};
use crate::core::error::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;

/// Bloom filter held in process memory
#[derive(Debug)]
pub struct InMemoryBloomFilter {
    params: BloomParams,
    filters: DashMap<String, Vec<u64>>,
}

impl InMemoryBloomFilter {
    pub fn new(params: BloomParams) -> Self {
        Self {
            params,
            filters: DashMap::new(),
        }
    }

    fn words(&self) -> CacheResult<usize> {
        usize::try_from(self.params.size_bits.div_ceil(64)).map_err(|_| {
            CacheError::filter(format!(
                "{} bits do not fit in memory on this platform",
                self.params.size_bits
            ))
        })
    }
}

#[async_trait]
impl FilterBackend for InMemoryBloomFilter {
    async fn add(&self, key: &str, item: &str) -> CacheResult<()> {
        let words = self.words()?;
        let mut bits = self
            .filters
            .entry(key.to_string())
            .or_insert_with(|| vec![0; words]);

        for position in self.params.positions(item) {
            bits[(position / 64) as usize] |= 1 << (position % 64);
        }
        Ok(())
    }

    async fn contains(&self, key: &str, item: &str) -> CacheResult<bool> {
        let Some(bits) = self.filters.get(key) else {
            return Ok(false);
        };

        Ok(self
            .params
            .positions(item)
            .into_iter()
            .all(|position| bits[(position / 64) as usize] & (1 << (position % 64)) != 0))
    }

    async fn init(&self, key: &str) -> CacheResult<()> {
        self.filters.insert(key.to_string(), vec![0; self.words()?]);
        Ok(())
    }
}

//! Resolves a [`CacheConfig`] into a ready [`BloomCacheLayer`].
//!
//! Everything that can fail is checked here, once: the configuration is
//! validated and every route pattern compiled before the first request.

use super::engine::{CacheEngine, EngineOptions};
use super::filter::{BloomParams, FilterBackend, InMemoryBloomFilter, MembershipFilter, RedisBloomFilter};
use super::key_generator::{KeyPrefix, NamespaceResolver};
use super::middleware::BloomCacheLayer;
use super::stores::{CacheStore, ErrorHook, InMemoryStore, RedisStore};
use crate::core::config::CacheConfig;
use crate::core::error::{CacheError, CacheResult};
use crate::routing::RouteTable;
use axum::http::request::Parts;
use std::sync::Arc;
use tracing::info;

/// Builder for the cache layer
pub struct BloomCacheBuilder {
    config: CacheConfig,
    store: Option<Arc<dyn CacheStore>>,
    filter_backend: Option<Arc<dyn FilterBackend>>,
    prefix: Option<KeyPrefix>,
    namespaces: NamespaceResolver,
    error_hooks: Vec<ErrorHook>,
}

impl BloomCacheBuilder {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            store: None,
            filter_backend: None,
            prefix: None,
            namespaces: NamespaceResolver::default(),
            error_hooks: Vec::new(),
        }
    }

    /// Use this store instead of the default
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this filter backend instead of the default
    pub fn filter_backend(mut self, backend: Arc<dyn FilterBackend>) -> Self {
        self.filter_backend = Some(backend);
        self
    }

    /// Compute the key prefix per request instead of using `config.prefix`
    pub fn key_prefix_fn<F>(mut self, prefix: F) -> Self
    where
        F: Fn(&Parts) -> String + Send + Sync + 'static,
    {
        self.prefix = Some(KeyPrefix::PerRequest(Arc::new(prefix)));
        self
    }

    /// Resolve the filter namespace of requests without a `FilterNamespace` extension
    pub fn namespace_fn<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Parts) -> String + Send + Sync + 'static,
    {
        self.namespaces = NamespaceResolver::with_fn(Arc::new(resolver));
        self
    }

    /// Called whenever the store reports an error
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CacheError) + Send + Sync + 'static,
    {
        self.error_hooks.push(Arc::new(hook));
        self
    }

    /// Build the engine
    ///
    /// Without an explicit store or filter backend, in-process ones are used.
    pub fn build(self) -> CacheResult<CacheEngine> {
        self.config.validate()?;

        let routes = RouteTable::compile(&self.config.routes, &self.config.exclude)?;
        let params = BloomParams::from(&self.config.bloom);

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let backend = self
            .filter_backend
            .unwrap_or_else(|| Arc::new(InMemoryBloomFilter::new(params)));

        for hook in self.error_hooks {
            store.lifecycle().on_error(hook);
        }

        let filter = MembershipFilter::new(backend, self.config.bloom.prefix.clone());
        let prefix = self
            .prefix
            .unwrap_or_else(|| KeyPrefix::Static(self.config.prefix.clone()));

        info!(
            routes = self.config.routes.len(),
            exclusions = self.config.exclude.len(),
            default_ttl_secs = self.config.expire.as_secs(),
            "Bloom cache configured"
        );

        Ok(CacheEngine::new(
            store,
            filter,
            EngineOptions {
                routes,
                prefix,
                namespaces: self.namespaces,
                default_ttl: self.config.expire,
                pass_param: self.config.pass_param,
                max_length: self.config.max_length,
            },
        ))
    }

    /// Build the layer
    pub fn layer(self) -> CacheResult<BloomCacheLayer> {
        Ok(BloomCacheLayer::new(Arc::new(self.build()?)))
    }

    /// Build the layer on Redis
    ///
    /// The store and the filter share one connection. Error hooks are in place
    /// before the first connection attempt, so a server that is down at startup
    /// is reported too.
    pub async fn connect(mut self) -> CacheResult<BloomCacheLayer> {
        if self.store.is_some() {
            return self.layer();
        }

        self.config.validate()?;
        let redis = RedisStore::new(&self.config.redis)?;
        for hook in self.error_hooks.drain(..) {
            redis.lifecycle().on_error(hook);
        }

        if self.filter_backend.is_none() {
            let params = BloomParams::from(&self.config.bloom);
            self.filter_backend = Some(Arc::new(RedisBloomFilter::new(redis.clone(), params)));
        }

        redis.start().await;
        self.store(Arc::new(redis)).layer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{RedisClientOptions, RedisConfig};
    use crate::routing::RouteRule;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_invalid_route_is_rejected() {
        let config = CacheConfig {
            routes: vec![RouteRule::from("/broken(")],
            ..Default::default()
        };
        assert!(matches!(
            BloomCacheBuilder::new(config).build(),
            Err(CacheError::Configuration { .. })
        ));
    }

    #[test]
    fn test_error_hook_is_registered_on_store() {
        let store = Arc::new(InMemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let engine = BloomCacheBuilder::new(CacheConfig::default())
            .store(store.clone())
            .on_error(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        store.lifecycle().errored(CacheError::store("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!engine.store().lifecycle().is_available());
    }

    #[tokio::test]
    async fn test_connect_reports_unreachable_redis() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let config = CacheConfig {
            redis: RedisConfig {
                url: Some("redis://127.0.0.1:1/".to_string()),
                health_check_interval: Duration::from_millis(200),
                client: RedisClientOptions {
                    retries: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };

        let layer = BloomCacheBuilder::new(config)
            .on_error(move |e| {
                let _ = tx.send(e.to_string());
            })
            .connect()
            .await
            .unwrap();

        assert!(rx.recv().await.is_some());
        assert!(!layer.engine().store().lifecycle().is_available());
    }
}

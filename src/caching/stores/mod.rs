//! # Cache Stores Module
//!
//! Key-value store adapters and the availability state they report.
//!
//! Every store owns a [`StoreLifecycle`]. The lifecycle is the only place the
//! process-wide "is the store usable" flag lives; it moves through
//! `Unknown -> Available` on connect and to `Unavailable` on error or
//! disconnect. The decision engine reads it before every request and skips all
//! cache work while the store is not available.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

use crate::core::error::{CacheError, CacheResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback invoked whenever the store reports an error
pub type ErrorHook = Arc<dyn Fn(&CacheError) + Send + Sync>;

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    /// Write a value that expires after `ttl`
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Remove a value, returning whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;

    /// Connection state of this store
    fn lifecycle(&self) -> &StoreLifecycle;
}

/// Store availability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// No connection event seen yet
    Unknown,
    /// Connected and usable
    Available,
    /// Errored or disconnected
    Unavailable,
}

impl Availability {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Available,
            2 => Self::Unavailable,
            _ => Self::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Available => 1,
            Self::Unavailable => 2,
        }
    }
}

/// Connection lifecycle of a store
///
/// Updated only through [`connected`](Self::connected),
/// [`disconnected`](Self::disconnected) and [`errored`](Self::errored).
/// Reads are lock-free and may be slightly stale.
pub struct StoreLifecycle {
    state: AtomicU8,
    error_hooks: RwLock<Vec<ErrorHook>>,
}

impl StoreLifecycle {
    /// Create a lifecycle in the `Unknown` state
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(Availability::Unknown.as_u8()),
            error_hooks: RwLock::new(Vec::new()),
        }
    }

    /// Current availability
    pub fn availability(&self) -> Availability {
        Availability::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether cache operations should be attempted
    pub fn is_available(&self) -> bool {
        self.availability() == Availability::Available
    }

    /// Register a callback for store errors
    pub fn on_error(&self, hook: ErrorHook) {
        self.error_hooks.write().push(hook);
    }

    /// The store connected (or reconnected)
    pub fn connected(&self) {
        let previous = self.swap(Availability::Available);
        if previous != Availability::Available {
            info!("Cache store connected");
        }
    }

    /// The store connection ended
    pub fn disconnected(&self) {
        let previous = self.swap(Availability::Unavailable);
        if previous == Availability::Available {
            warn!("Cache store disconnected, caching disabled until reconnect");
        }
    }

    /// The store reported an error
    ///
    /// Marks the store unavailable. Only the call that makes the transition
    /// hands the error to the registered hooks; errors reported while the
    /// store is already unavailable are logged and dropped. Returns whether
    /// this call made the transition.
    ///
    /// Hooks run on a spawned task when a tokio runtime is present.
    pub fn errored(&self, error: CacheError) -> bool {
        let unavailable = Availability::Unavailable.as_u8();
        let transitioned = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state != unavailable).then_some(unavailable)
            })
            .is_ok();

        if !transitioned {
            debug!(error = %error, "Cache store still unavailable");
            return false;
        }
        warn!(error = %error, "Cache store error, caching disabled until reconnect");

        let hooks: Vec<ErrorHook> = self.error_hooks.read().clone();
        if hooks.is_empty() {
            return true;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for hook in hooks {
                        hook(&error);
                    }
                });
            }
            Err(_) => {
                for hook in hooks {
                    hook(&error);
                }
            }
        }
        true
    }

    fn swap(&self, availability: Availability) -> Availability {
        Availability::from_u8(self.state.swap(availability.as_u8(), Ordering::AcqRel))
    }
}

impl Default for StoreLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLifecycle")
            .field("availability", &self.availability())
            .field("error_hooks", &self.error_hooks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_transitions() {
        let lifecycle = StoreLifecycle::new();
        assert_eq!(lifecycle.availability(), Availability::Unknown);
        assert!(!lifecycle.is_available());

        lifecycle.connected();
        assert!(lifecycle.is_available());

        lifecycle.disconnected();
        assert_eq!(lifecycle.availability(), Availability::Unavailable);

        lifecycle.connected();
        lifecycle.errored(CacheError::Unavailable);
        assert_eq!(lifecycle.availability(), Availability::Unavailable);
    }

    #[test]
    fn test_error_hooks_run_inline_without_runtime() {
        let lifecycle = StoreLifecycle::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        lifecycle.on_error(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(lifecycle.errored(CacheError::store("boom")));
        lifecycle.disconnected();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_one_outage_fires_hooks_once() {
        let lifecycle = StoreLifecycle::new();
        lifecycle.connected();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        lifecycle.on_error(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let transitions = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    if lifecycle.errored(CacheError::store("connection reset")) {
                        transitions.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(transitions.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a reconnect starts a new outage
        lifecycle.connected();
        assert!(lifecycle.errored(CacheError::store("connection reset")));
        assert!(!lifecycle.errored(CacheError::store("connection reset")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_hooks_are_spawned() {
        let lifecycle = StoreLifecycle::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        lifecycle.on_error(Arc::new(move |error: &CacheError| {
            let _ = tx.send(error.to_string());
        }));
        lifecycle.errored(CacheError::store("connection reset"));

        let message = rx.recv().await.unwrap();
        assert_eq!(message, "Cache store error: connection reset");
    }
}

//! # Observability Module
//!
//! Logging setup. Request-path events and the `bloom_cache_*` metrics
//! counters are emitted by the caching module itself.

pub mod logging;

pub use logging::{init_logging, LogFormat};

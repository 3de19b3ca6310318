//! # Error Handling Module
//!
//! Error types for the cache layer, built on `thiserror`.
//!
//! Adapter failures (store, filter) are returned as `CacheError` values and are
//! swallowed by the decision engine, which degrades to "no cache" for that
//! request. Only configuration and pattern errors ever reach a caller, and only
//! while the layer is being constructed.

use std::sync::Arc;
use thiserror::Error;

/// Result type used throughout the cache layer
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors produced by the cache layer and its adapters
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    /// Generic key-value store failure
    #[error("Cache store error: {message}")]
    Store { message: String },

    /// Failure reported by the Redis client
    #[error("Redis error: {0}")]
    Redis(Arc<redis::RedisError>),

    /// Membership filter failure
    #[error("Membership filter error: {message}")]
    Filter { message: String },

    /// Route pattern could not be compiled
    #[error("Invalid route pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// JSON/YAML (de)serialization failure
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// The store has no live connection
    #[error("Cache store not available")]
    Unavailable,
}

impl CacheError {
    /// Create a store error with a custom message
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a filter error with a custom message
    pub fn filter<S: Into<String>>(message: S) -> Self {
        Self::Filter {
            message: message.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a pattern error for the given pattern
    pub fn pattern<P: Into<String>, R: Into<String>>(pattern: P, reason: R) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the store connection itself is gone,
    /// as opposed to a single failed command.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Unavailable => true,
            Self::Redis(err) => {
                err.is_io_error()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
                    || err.is_timeout()
            }
            _ => false,
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(Arc::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CacheError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CacheError::pattern("/a/(", "unbalanced parenthesis").to_string(),
            "Invalid route pattern '/a/(': unbalanced parenthesis"
        );
        assert_eq!(CacheError::Unavailable.to_string(), "Cache store not available");
    }

    #[test]
    fn test_connection_errors() {
        assert!(CacheError::Unavailable.is_connection_error());
        assert!(!CacheError::store("WRONGTYPE").is_connection_error());

        let io = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(CacheError::from(io).is_connection_error());

        let typed = redis::RedisError::from((redis::ErrorKind::TypeError, "bad type"));
        assert!(!CacheError::from(typed).is_connection_error());
    }
}

//! # Cache Key Generator
//!
//! Cache keys are the configured prefix followed by the request's path and
//! query string, so `/list?page=2` and `/list?page=3` are cached separately.
//! The prefix is either fixed or computed from the request head.
//!
//! Every body key has a companion type key (`key + ":type"`) holding the
//! response's content type.

use axum::http::request::Parts;
use std::fmt;
use std::sync::Arc;

/// Namespace used when a request carries none
pub const DEFAULT_NAMESPACE: &str = "default";

const TYPE_KEY_SUFFIX: &str = ":type";

/// Function computing a value from the request head
pub type PartsFn = Arc<dyn Fn(&Parts) -> String + Send + Sync>;

/// How the key prefix is resolved
#[derive(Clone)]
pub enum KeyPrefix {
    /// Same prefix for every request
    Static(String),

    /// Prefix computed per request (for example from a host header)
    PerRequest(PartsFn),
}

impl KeyPrefix {
    /// Prefix for this request
    pub fn resolve(&self, parts: &Parts) -> String {
        match self {
            Self::Static(prefix) => prefix.clone(),
            Self::PerRequest(f) => f(parts),
        }
    }
}

impl From<&str> for KeyPrefix {
    fn from(prefix: &str) -> Self {
        Self::Static(prefix.to_string())
    }
}

impl From<String> for KeyPrefix {
    fn from(prefix: String) -> Self {
        Self::Static(prefix)
    }
}

impl fmt::Debug for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(prefix) => f.debug_tuple("Static").field(prefix).finish(),
            Self::PerRequest(_) => f.write_str("PerRequest(..)"),
        }
    }
}

/// Body key and type key for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    key: String,
    type_key: String,
}

impl CacheKey {
    /// Key for a request head under the given prefix
    pub fn for_request(prefix: &KeyPrefix, parts: &Parts) -> Self {
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| parts.uri.path());

        Self::new(format!("{}{}", prefix.resolve(parts), target))
    }

    pub fn new(key: String) -> Self {
        let type_key = format!("{}{}", key, TYPE_KEY_SUFFIX);
        Self { key, type_key }
    }

    /// Key of the cached body
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key of the cached content type
    pub fn type_key(&self) -> &str {
        &self.type_key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Membership filter partition of a request
///
/// Upstream layers (tenant or session resolution) insert this into the request
/// extensions; the cache layer reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterNamespace(pub String);

impl FilterNamespace {
    pub fn new<S: Into<String>>(namespace: S) -> Self {
        Self(namespace.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Picks the filter namespace of a request
#[derive(Clone, Default)]
pub struct NamespaceResolver {
    resolver: Option<PartsFn>,
}

impl NamespaceResolver {
    /// Resolve with a custom function when no extension is present
    pub fn with_fn(resolver: PartsFn) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    /// The `FilterNamespace` extension, then the resolver, then `default`.
    /// Empty values fall through to the next source.
    pub fn resolve(&self, parts: &Parts) -> String {
        if let Some(namespace) = parts.extensions.get::<FilterNamespace>() {
            if !namespace.0.is_empty() {
                return namespace.0.clone();
            }
        }

        self.resolver
            .as_ref()
            .map(|f| f(parts))
            .filter(|namespace| !namespace.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }
}

impl fmt::Debug for NamespaceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceResolver")
            .field("custom", &self.resolver.is_some())
            .finish()
    }
}

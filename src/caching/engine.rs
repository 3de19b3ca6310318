//! # Cache Decision Engine
//!
//! Per-request caching protocol:
//!
//! 1. **Eligibility**: the store must be available, the path must match an
//!    inclusion rule and no exclusion, and the bypass parameter must be absent.
//! 2. **Lookup**: the membership filter is asked first. A negative answer is
//!    final; a positive one is confirmed with a store read.
//! 3. **Write-back**: after the handler ran, a `GET` with status 200 and a
//!    non-empty body within the size cap is stored under the cache key with the
//!    effective TTL, recorded in the filter, and its content type saved under
//!    the type key.
//!
//! Every adapter failure is logged and treated as if the operation had not
//! happened. The engine never fails a request.

use super::filter::MembershipFilter;
use super::key_generator::{CacheKey, KeyPrefix, NamespaceResolver};
use super::payload::ResponsePayload;
use super::stores::CacheStore;
use crate::core::error::CacheResult;
use crate::routing::{has_query_param, RouteDecision, RouteTable};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Content type replayed when a hit has no stored type
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Per-request engine state
///
/// The final state is attached to every response that passed through the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Not considered for caching
    Ineligible,
    /// Lookup in progress
    Checking,
    /// Served from the cache; the handler did not run
    Hit,
    /// The handler ran and nothing was stored
    MissPassthrough,
    /// The handler ran and its response was stored
    WriteBack,
}

/// Why a request skipped the cache entirely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    StoreUnavailable,
    Bypassed,
    NoMatchingRoute,
    Excluded,
}

/// Result of the read path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The filter says the key is definitely absent
    FilterNegative,
    /// The filter and the store agree
    Hit { body: Bytes, content_type: String },
    /// The filter said maybe, the store had nothing
    FalsePositive,
    /// A filter or store call failed
    Failed,
}

impl Lookup {
    /// `x-cache` and `x-bloom` values for this outcome
    pub fn diagnostic_headers(&self) -> (&'static str, Option<&'static str>) {
        match self {
            Self::FilterNegative => ("MISS", Some("MISS")),
            Self::Hit { .. } => ("HIT", Some("HIT")),
            Self::FalsePositive => ("MISS", Some("HIT")),
            Self::Failed => ("MISS", None),
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::FilterNegative => "filter_negative",
            Self::Hit { .. } => "hit",
            Self::FalsePositive => "false_positive",
            Self::Failed => "error",
        }
    }
}

/// Why a produced response was not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotGet,
    NotOk,
    UnsupportedBody,
    EmptyBody,
    TooLarge,
}

/// Result of the write path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    Skipped(SkipReason),
    Failed,
}

impl WriteOutcome {
    /// Final request state for this outcome
    pub fn state(&self) -> CacheState {
        match self {
            Self::Stored => CacheState::WriteBack,
            Self::Skipped(_) | Self::Failed => CacheState::MissPassthrough,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Skipped(_) => "skipped",
            Self::Failed => "error",
        }
    }
}

/// Counters kept by the engine
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    filter_negatives: AtomicU64,
    false_positives: AtomicU64,
    lookup_errors: AtomicU64,
    writes: AtomicU64,
    skipped_writes: AtomicU64,
    write_errors: AtomicU64,
    ineligible: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub filter_negatives: u64,
    pub false_positives: u64,
    pub writes: u64,
    pub skipped_writes: u64,
    pub errors: u64,
    pub ineligible: u64,
    pub hit_ratio: f64,
}

impl CacheStats {
    fn record_lookup(&self, lookup: &Lookup) {
        let counter = match lookup {
            Lookup::FilterNegative => &self.filter_negatives,
            Lookup::Hit { .. } => &self.hits,
            Lookup::FalsePositive => &self.false_positives,
            Lookup::Failed => &self.lookup_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bloom_cache_lookups_total", "outcome" => lookup.outcome()).increment(1);
    }

    fn record_write(&self, outcome: &WriteOutcome) {
        let counter = match outcome {
            WriteOutcome::Stored => &self.writes,
            WriteOutcome::Skipped(_) => &self.skipped_writes,
            WriteOutcome::Failed => &self.write_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bloom_cache_writes_total", "outcome" => outcome.outcome()).increment(1);
    }

    fn record_ineligible(&self) {
        self.ineligible.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let filter_negatives = self.filter_negatives.load(Ordering::Relaxed);
        let false_positives = self.false_positives.load(Ordering::Relaxed);
        let lookup_errors = self.lookup_errors.load(Ordering::Relaxed);
        let misses = filter_negatives + false_positives + lookup_errors;

        let lookups = hits + misses;
        let hit_ratio = if lookups > 0 {
            hits as f64 / lookups as f64
        } else {
            0.0
        };

        CacheStatsSnapshot {
            hits,
            misses,
            filter_negatives,
            false_positives,
            writes: self.writes.load(Ordering::Relaxed),
            skipped_writes: self.skipped_writes.load(Ordering::Relaxed),
            errors: lookup_errors + self.write_errors.load(Ordering::Relaxed),
            ineligible: self.ineligible.load(Ordering::Relaxed),
            hit_ratio,
        }
    }
}

/// The cache decision engine shared by every request
pub struct CacheEngine {
    store: Arc<dyn CacheStore>,
    filter: MembershipFilter,
    routes: RouteTable,
    prefix: KeyPrefix,
    namespaces: NamespaceResolver,
    default_ttl: Duration,
    pass_param: Option<String>,
    max_length: Option<usize>,
    stats: CacheStats,
}

/// Resolved engine options
pub struct EngineOptions {
    pub routes: RouteTable,
    pub prefix: KeyPrefix,
    pub namespaces: NamespaceResolver,
    pub default_ttl: Duration,
    pub pass_param: Option<String>,
    pub max_length: Option<usize>,
}

impl CacheEngine {
    pub fn new(store: Arc<dyn CacheStore>, filter: MembershipFilter, options: EngineOptions) -> Self {
        Self {
            store,
            filter,
            routes: options.routes,
            prefix: options.prefix,
            namespaces: options.namespaces,
            default_ttl: options.default_ttl,
            pass_param: options.pass_param,
            max_length: options.max_length,
            stats: CacheStats::default(),
        }
    }

    /// Decide whether a request takes part in caching
    ///
    /// Returns the TTL to use for this request: the matched rule's TTL when it
    /// has one, the default otherwise.
    pub fn eligibility(&self, parts: &Parts) -> Result<Duration, IneligibleReason> {
        let decision = if !self.store.lifecycle().is_available() {
            Err(IneligibleReason::StoreUnavailable)
        } else if self
            .pass_param
            .as_deref()
            .is_some_and(|param| has_query_param(parts.uri.query(), param))
        {
            Err(IneligibleReason::Bypassed)
        } else {
            match self.routes.evaluate(parts.uri.path()) {
                RouteDecision::Included { pattern, ttl } => {
                    debug!(pattern, "Route matched");
                    Ok(ttl.unwrap_or(self.default_ttl))
                }
                RouteDecision::Excluded { pattern } => {
                    debug!(pattern, "Route excluded");
                    Err(IneligibleReason::Excluded)
                }
                RouteDecision::Unmatched => Err(IneligibleReason::NoMatchingRoute),
            }
        };

        if let Err(reason) = decision {
            self.stats.record_ineligible();
            debug!(?reason, "Request not eligible for caching");
        }
        decision
    }

    /// Cache key of a request
    pub fn cache_key(&self, parts: &Parts) -> CacheKey {
        CacheKey::for_request(&self.prefix, parts)
    }

    /// Filter namespace of a request
    pub fn namespace(&self, parts: &Parts) -> String {
        self.namespaces.resolve(parts)
    }

    /// Read path: filter check, then store read
    pub async fn lookup(&self, key: &CacheKey, namespace: &str) -> Lookup {
        let lookup = self.read(key, namespace).await;
        self.stats.record_lookup(&lookup);
        debug!(key = %key, namespace, outcome = lookup.outcome(), "Cache lookup");
        lookup
    }

    async fn read(&self, key: &CacheKey, namespace: &str) -> Lookup {
        match self.filter.check(key.key(), namespace).await {
            Ok(true) => {}
            Ok(false) => return Lookup::FilterNegative,
            Err(e) => {
                warn!(error = %e, key = %key, "Membership filter check failed");
                return Lookup::Failed;
            }
        }

        let body = match self.store.get(key.key()).await {
            Ok(Some(body)) => body,
            Ok(None) => return Lookup::FalsePositive,
            Err(e) => {
                warn!(error = %e, key = %key, "Cache read failed");
                return Lookup::Failed;
            }
        };

        let content_type = match self.store.get(key.type_key()).await {
            Ok(Some(stored)) => String::from_utf8_lossy(&stored).into_owned(),
            Ok(None) => DEFAULT_CONTENT_TYPE.to_string(),
            Err(e) => {
                warn!(error = %e, key = %key, "Cache type read failed, using default");
                DEFAULT_CONTENT_TYPE.to_string()
            }
        };

        Lookup::Hit { body, content_type }
    }

    /// Whether a produced response may be stored at all
    pub fn response_skip_reason(method: &Method, status: StatusCode) -> Option<SkipReason> {
        if method != Method::GET {
            Some(SkipReason::NotGet)
        } else if status != StatusCode::OK {
            Some(SkipReason::NotOk)
        } else {
            None
        }
    }

    /// Record a response that was rejected before its body was looked at
    pub fn skip_write(&self, key: &CacheKey, reason: SkipReason) -> WriteOutcome {
        let outcome = WriteOutcome::Skipped(reason);
        self.stats.record_write(&outcome);
        debug!(key = %key, ?reason, "Response not cached");
        outcome
    }

    /// Write path for an eligible `GET 200` response
    pub async fn write_back(
        &self,
        key: &CacheKey,
        namespace: &str,
        ttl: Duration,
        content_type: Option<&str>,
        payload: &ResponsePayload,
    ) -> WriteOutcome {
        let bytes = match payload {
            ResponsePayload::TooLarge => return self.skip_write(key, SkipReason::TooLarge),
            _ => match payload.cacheable_bytes() {
                Some(bytes) => bytes,
                None => return self.skip_write(key, SkipReason::UnsupportedBody),
            },
        };
        if bytes.is_empty() {
            return self.skip_write(key, SkipReason::EmptyBody);
        }
        if self.max_length.is_some_and(|max| bytes.len() > max) {
            return self.skip_write(key, SkipReason::TooLarge);
        }

        if let Err(e) = self.store.set_ex(key.key(), bytes, ttl).await {
            warn!(error = %e, key = %key, "Cache write failed");
            let outcome = WriteOutcome::Failed;
            self.stats.record_write(&outcome);
            return outcome;
        }

        // a missing filter entry only costs future hits, the body is already stored
        if let Err(e) = self.filter.record(key.key(), namespace).await {
            warn!(error = %e, key = %key, namespace, "Membership filter update failed");
        }

        if let Some(content_type) = content_type {
            if let Err(e) = self
                .store
                .set_ex(key.type_key(), content_type.as_bytes(), ttl)
                .await
            {
                warn!(error = %e, key = %key, "Cache type write failed");
            }
        }

        debug!(
            key = %key,
            namespace,
            kind = payload.kind(),
            bytes = bytes.len(),
            ttl_secs = ttl.as_secs(),
            "Response cached"
        );
        let outcome = WriteOutcome::Stored;
        self.stats.record_write(&outcome);
        outcome
    }

    /// Empty one namespace's membership filter
    ///
    /// Store entries are left to expire on their own TTL.
    pub async fn reset_namespace(&self, namespace: &str) -> CacheResult<()> {
        self.filter.reset(namespace).await?;
        info!(namespace, "Membership filter reset");
        Ok(())
    }

    /// Engine counters
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Largest body that will be stored, if capped
    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    /// Default TTL used when the matched rule has none
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

//! # Cache Middleware
//!
//! Tower layer running the [`CacheEngine`] around an inner service.
//!
//! ```ignore
//! let layer = BloomCacheBuilder::new(config).connect().await?;
//! let app = Router::new().route("/", get(index)).layer(layer);
//! ```
//!
//! Errors from the inner service pass through untouched; the layer itself
//! never produces one.

use super::engine::{CacheEngine, CacheState, Lookup};
use super::payload::buffer_body;
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::instrument;

/// Cache-status header
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Filter-status header
pub const FILTER_STATUS_HEADER: &str = "x-bloom";

/// Bloom cache layer
#[derive(Clone)]
pub struct BloomCacheLayer {
    engine: Arc<CacheEngine>,
}

impl BloomCacheLayer {
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self { engine }
    }

    /// The shared engine (stats, namespace reset)
    pub fn engine(&self) -> Arc<CacheEngine> {
        Arc::clone(&self.engine)
    }
}

impl<S> Layer<S> for BloomCacheLayer {
    type Service = BloomCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BloomCacheService {
            inner,
            engine: Arc::clone(&self.engine),
        }
    }
}

/// Bloom cache middleware service
#[derive(Clone)]
pub struct BloomCacheService<S> {
    inner: S,
    engine: Arc<CacheEngine>,
}

impl<S> Service<Request> for BloomCacheService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // the clone may not be ready; keep the one that was polled
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let engine = Arc::clone(&self.engine);

        Box::pin(handle(engine, inner, request))
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
async fn handle<S>(engine: Arc<CacheEngine>, mut inner: S, request: Request) -> Result<Response, S::Error>
where
    S: Service<Request, Response = Response>,
{
    let (parts, body) = request.into_parts();

    let ttl = match engine.eligibility(&parts) {
        Ok(ttl) => ttl,
        Err(_) => {
            let mut response = inner.call(Request::from_parts(parts, body)).await?;
            response.extensions_mut().insert(CacheState::Ineligible);
            return Ok(response);
        }
    };

    let key = engine.cache_key(&parts);
    let namespace = engine.namespace(&parts);
    let method = parts.method.clone();

    let lookup = engine.lookup(&key, &namespace).await;
    let (cache_status, filter_status) = lookup.diagnostic_headers();

    if let Lookup::Hit { body: cached, content_type } = lookup {
        return Ok(hit_response(cached, &content_type));
    }

    let mut response = inner.call(Request::from_parts(parts, body)).await?;
    set_diagnostic_headers(&mut response, cache_status, filter_status);

    if let Some(reason) = CacheEngine::response_skip_reason(&method, response.status()) {
        let outcome = engine.skip_write(&key, reason);
        response.extensions_mut().insert(outcome.state());
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let buffered = buffer_body(content_type.as_deref(), body, engine.max_length()).await;
    let outcome = engine
        .write_back(&key, &namespace, ttl, content_type.as_deref(), &buffered.payload)
        .await;

    parts.extensions.insert(outcome.state());
    Ok(Response::from_parts(parts, buffered.body))
}

fn hit_response(body: bytes::Bytes, content_type: &str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;

    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(super::engine::DEFAULT_CONTENT_TYPE));
    response.headers_mut().insert(CONTENT_TYPE, content_type);

    set_diagnostic_headers(&mut response, "HIT", Some("HIT"));
    response.extensions_mut().insert(CacheState::Hit);
    response
}

fn set_diagnostic_headers(response: &mut Response, cache_status: &'static str, filter_status: Option<&'static str>) {
    let headers = response.headers_mut();
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(cache_status));
    if let Some(filter_status) = filter_status {
        headers.insert(FILTER_STATUS_HEADER, HeaderValue::from_static(filter_status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::BloomCacheBuilder;
    use crate::core::config::CacheConfig;
    use axum::http::Method;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::{service_fn, ServiceExt};

    #[tokio::test]
    async fn test_layer_wraps_plain_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = service_fn(move |_req: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                let mut response = Response::new(Body::from("hello"));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                Ok::<_, Infallible>(response)
            }
        });

        let layer = BloomCacheBuilder::new(CacheConfig::default()).layer().unwrap();
        let service = layer.layer(handler);

        let first = service
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.extensions().get::<CacheState>(), Some(&CacheState::WriteBack));

        let second = service
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.headers()[CACHE_STATUS_HEADER], "HIT");
        assert_eq!(second.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let handler = service_fn(|_req: Request| async { Err::<Response, _>("handler failed") });
        let layer = BloomCacheBuilder::new(CacheConfig::default()).layer().unwrap();

        let result = layer
            .layer(handler)
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/boom")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(result.err(), Some("handler failed"));
    }

    #[test]
    fn test_hit_response_falls_back_on_bad_type() {
        let response = hit_response(bytes::Bytes::from_static(b"x"), "bad\nvalue");
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html");
        assert_eq!(response.headers()[FILTER_STATUS_HEADER], "HIT");
        assert_eq!(response.status(), StatusCode::OK);
    }
}

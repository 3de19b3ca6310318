//! # Response Payloads
//!
//! Classifies a produced response body once, before write-back, into a closed
//! set of shapes. Each shape knows whether and how it can be cached.
//!
//! Bodies that announce an exact size are already in memory and are collected
//! as they are. Bodies without a size hint are streams: they are drained into
//! a buffer so the bytes can be both cached and sent, and the response gets the
//! buffered copy. Server-sent event streams are never drained.
//!
//! Draining stops once the size cap is passed. The chunks read so far are
//! replayed ahead of the unread remainder, so the client still gets the whole
//! body; it is just not cached.

use axum::body::{Body, Bytes, HttpBody};
use bytes::BytesMut;
use futures::stream::{self, StreamExt};
use serde::de::IgnoredAny;
use std::fmt;
use tracing::{debug, warn};

/// Shape of a response body
#[derive(Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// UTF-8 text with a textual content type
    Text(Bytes),

    /// Raw bytes of known size
    Binary(Bytes),

    /// A JSON document
    Json(Bytes),

    /// A drained stream, cached as binary
    Stream(Bytes),

    /// Larger than the size cap; not fully read
    TooLarge,

    /// Anything that must not be cached
    Unsupported,
}

impl ResponsePayload {
    /// Bytes to store, if this shape is cacheable
    pub fn cacheable_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Text(bytes) | Self::Binary(bytes) | Self::Json(bytes) | Self::Stream(bytes) => {
                Some(bytes)
            }
            Self::TooLarge | Self::Unsupported => None,
        }
    }

    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Json(_) => "json",
            Self::Stream(_) => "stream",
            Self::TooLarge => "too_large",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Debug for ResponsePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cacheable_bytes() {
            Some(bytes) => write!(f, "{}({} bytes)", self.kind(), bytes.len()),
            None => f.write_str(self.kind()),
        }
    }
}

/// A classified payload and the body to send on
pub struct BufferedBody {
    pub body: Body,
    pub payload: ResponsePayload,
}

impl BufferedBody {
    fn passthrough(body: Body) -> Self {
        Self {
            body,
            payload: ResponsePayload::Unsupported,
        }
    }
}

/// Classify and, when needed, buffer a response body
///
/// At most `limit + 1` bytes are read; `None` means no limit.
pub async fn buffer_body(content_type: Option<&str>, body: Body, limit: Option<usize>) -> BufferedBody {
    let essence = content_type.map(mime_essence);

    if essence.as_deref() == Some("text/event-stream") {
        return BufferedBody::passthrough(body);
    }

    let limit = limit.unwrap_or(usize::MAX);
    let size_hint = body.size_hint();
    if size_hint.lower() > limit as u64 {
        return BufferedBody {
            body,
            payload: ResponsePayload::TooLarge,
        };
    }
    let exact_size = size_hint.exact().is_some();

    let mut frames = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut read = 0usize;

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(chunk) => {
                read = read.saturating_add(chunk.len());
                chunks.push(chunk);
                if read > limit {
                    debug!(limit, "Response body over the size cap, passing the rest through");
                    let body = Body::from_stream(replay(chunks).chain(frames));
                    return BufferedBody {
                        body,
                        payload: ResponsePayload::TooLarge,
                    };
                }
            }
            Err(e) => {
                warn!(error = %e, bytes = read, "Response body failed while buffering, not caching");
                let failure = stream::once(async move { Err::<Bytes, axum::Error>(e) });
                return BufferedBody::passthrough(Body::from_stream(replay(chunks).chain(failure)));
            }
        }
    }

    let bytes = concat(chunks);
    let payload = if !exact_size {
        ResponsePayload::Stream(bytes.clone())
    } else {
        classify(essence.as_deref(), content_type, bytes.clone())
    };

    BufferedBody {
        body: Body::from(bytes),
        payload,
    }
}

fn replay(chunks: Vec<Bytes>) -> impl futures::Stream<Item = Result<Bytes, axum::Error>> {
    stream::iter(chunks.into_iter().map(Ok))
}

fn concat(mut chunks: Vec<Bytes>) -> Bytes {
    if chunks.len() == 1 {
        return chunks.pop().unwrap_or_default();
    }

    let mut bytes = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in chunks {
        bytes.extend_from_slice(&chunk);
    }
    bytes.freeze()
}

fn classify(essence: Option<&str>, content_type: Option<&str>, bytes: Bytes) -> ResponsePayload {
    let Some(essence) = essence else {
        return ResponsePayload::Binary(bytes);
    };

    if is_json(essence) {
        if serde_json::from_slice::<IgnoredAny>(&bytes).is_ok() {
            return ResponsePayload::Json(bytes);
        }
        return ResponsePayload::Binary(bytes);
    }

    let has_charset = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("charset="));
    if (is_textual(essence) || has_charset) && std::str::from_utf8(&bytes).is_ok() {
        return ResponsePayload::Text(bytes);
    }

    ResponsePayload::Binary(bytes)
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_json(essence: &str) -> bool {
    essence == "application/json" || essence.ends_with("+json")
}

fn is_textual(essence: &str) -> bool {
    essence.starts_with("text/") || essence.contains("xml") || essence.contains("javascript")
}

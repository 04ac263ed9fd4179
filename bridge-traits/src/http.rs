//! HTTP Download Abstraction
//!
//! Provides a streaming fetch capability for large media files. The core never
//! buffers a whole response body: it pulls chunks from [`ByteStream`] and
//! writes them to disk as they arrive.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
}

/// Byte stream of a response body. Each item is one network read.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Request the open-ended byte range starting at `offset`.
    pub fn range_from(self, offset: u64) -> Self {
        self.header("Range", format!("bytes={}-", offset))
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Returns the header value, matching the name case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Parsed `Content-Range: bytes start-end/total` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` when the server answered with `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = rest.split_once('/')?;
        let (start, end) = range.split_once('-')?;
        let start = start.trim().parse().ok()?;
        let end = end.trim().parse().ok()?;
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };
        if end < start {
            return None;
        }
        Some(Self { start, end, total })
    }
}

/// Streaming HTTP response
pub struct StreamingResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
}

impl StreamingResponse {
    /// Returns the header value, matching the name case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Declared `Content-Length`, if present and parseable.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Parsed `Content-Range`, if present and well-formed.
    pub fn content_range(&self) -> Option<ContentRange> {
        self.header("Content-Range").and_then(ContentRange::parse)
    }
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Streaming download capability
///
/// Implementations own transport concerns: TLS, connection pooling,
/// authentication and per-request timeouts. They must not retry on their own;
/// retry policy belongs to the caller.
///
/// Connection and body-read failures must surface as a transient
/// [`BridgeError`](crate::error::BridgeError) kind (`Network` or `Io`) so the
/// caller can tell them apart from permanent failures.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{Downloader, HttpRequest};
/// use futures::StreamExt;
///
/// async fn first_chunk(downloader: &dyn Downloader) -> Result<usize> {
///     let request = HttpRequest::get("https://media.example.com/42.mp3").range_from(1024);
///     let mut response = downloader.fetch(request).await?;
///     let chunk = response.body.next().await.transpose()?;
///     Ok(chunk.map(|c| c.len()).unwrap_or(0))
/// }
/// ```
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Issue the request and return as soon as the status line and headers
    /// have arrived.
    async fn fetch(&self, request: HttpRequest) -> Result<StreamingResponse>;
}

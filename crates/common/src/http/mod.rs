//! HTTP access to video-info pages and stream URLs
//!
//! Everything the resolver, the tree and the stream table need from the
//! network goes through [`Transport`], which keeps them testable without a
//! live upstream. [`ReqwestTransport`] is the production implementation.

mod reqwest_transport;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

pub use reqwest_transport::ReqwestTransport;

/// Body of a video-info request plus the cookie the upstream handed out.
#[derive(Debug, Clone, Default)]
pub struct InfoResponse {
    pub body: String,
    /// `name=value` pairs from `set-cookie`, joined for reuse in a `Cookie`
    /// header
    pub cookie: Option<String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Upstream answered 403; for stream URLs this means the URL went stale
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timed out")]
    Timeout,
}

impl TransportError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, TransportError::Forbidden(_))
    }
}

/// A forward-only byte stream over an HTTP response body.
#[async_trait]
pub trait ByteStream: Send {
    /// Read up to `len` bytes. Fewer bytes are returned only at the end of
    /// the stream.
    async fn read(&mut self, len: usize) -> Result<Bytes, TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// GET a video-info page.
    async fn fetch_video_info(&self, url: &str) -> Result<InfoResponse, TransportError>;

    /// Issue a request against a stream URL and report its content length
    /// without consuming the body. A missing header reads as zero.
    async fn content_length(&self, url: &str, cookie: Option<&str>) -> Result<u64, TransportError>;

    /// Open a stream URL starting at `offset` (a `Range: bytes=<offset>-`
    /// request).
    async fn open_range(
        &self,
        url: &str,
        offset: u64,
        cookie: Option<&str>,
    ) -> Result<Box<dyn ByteStream>, TransportError>;
}

/// Reduce `set-cookie` header values to a `Cookie` header value.
pub fn cookie_header<'a>(set_cookies: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let pairs: Vec<&str> = set_cookies
        .into_iter()
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

//! Stub collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use ::common::config::VfsConfig;
use ::common::drive::{DriveRecord, ListingClient, ListingError, ListingPage, FOLDER_MIME_TYPE};
use ::common::http::{ByteStream, InfoResponse, Transport, TransportError};
use ::common::session::{Context, ContextId, Session, SessionError, SessionPool, SessionProvider};

pub const MP4_CONTAINER: &str = "mp4;+codecs=\"avc1.42001E,+mp4a.40.2\"";

pub fn folder(id: &str, title: &str, modified: &str) -> DriveRecord {
    DriveRecord {
        id: id.into(),
        title: title.into(),
        mime_type: Some(FOLDER_MIME_TYPE.into()),
        modified_date: Some(modified.into()),
        ..Default::default()
    }
}

pub fn file(id: &str, title: &str, size: u64, modified: &str) -> DriveRecord {
    DriveRecord {
        id: id.into(),
        title: title.into(),
        mime_type: Some("application/octet-stream".into()),
        modified_date: Some(modified.into()),
        file_size: Some(size),
        download_url: Some(format!("https://dl.example/{}", id)),
        ..Default::default()
    }
}

pub fn video(id: &str, title: &str, modified: &str) -> DriveRecord {
    DriveRecord {
        id: id.into(),
        title: title.into(),
        mime_type: Some("video/x-matroska".into()),
        modified_date: Some(modified.into()),
        file_size: Some(1_000_000),
        video_media_metadata: Some(serde_json::json!({ "width": 1280, "height": 720 })),
        download_url: Some(format!("https://dl.example/{}", id)),
        ..Default::default()
    }
}

/// Listing stub serving fixed records per folder and counting calls.
#[derive(Debug, Default)]
pub struct CountingListing {
    folders: Mutex<HashMap<String, Vec<DriveRecord>>>,
    /// Transient failures still to be served per folder
    failures: Mutex<HashMap<String, usize>>,
    always_fail: Mutex<HashSet<String>>,
    page_size: Mutex<Option<usize>>,
    calls: AtomicUsize,
}

impl CountingListing {
    pub fn set(&self, parent_id: &str, records: Vec<DriveRecord>) {
        self.folders.lock().insert(parent_id.to_string(), records);
    }

    pub fn remove(&self, parent_id: &str, title: &str) {
        if let Some(records) = self.folders.lock().get_mut(parent_id) {
            records.retain(|r| r.title != title);
        }
    }

    pub fn push(&self, parent_id: &str, record: DriveRecord) {
        self.folders
            .lock()
            .entry(parent_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn fail_next(&self, parent_id: &str, times: usize) {
        self.failures.lock().insert(parent_id.to_string(), times);
    }

    pub fn fail_always(&self, parent_id: &str) {
        self.always_fail.lock().insert(parent_id.to_string());
    }

    pub fn paginate(&self, page_size: usize) {
        *self.page_size.lock() = Some(page_size);
    }

    /// Page requests served so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingClient for CountingListing {
    async fn list_page(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListingPage, ListingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.always_fail.lock().contains(parent_id) {
            return Err(ListingError::Transient("connection reset".into()));
        }
        if let Some(left) = self.failures.lock().get_mut(parent_id) {
            if *left > 0 {
                *left -= 1;
                return Err(ListingError::Transient("backend error".into()));
            }
        }

        let records = self
            .folders
            .lock()
            .get(parent_id)
            .cloned()
            .unwrap_or_default();

        let Some(page_size) = *self.page_size.lock() else {
            return Ok(ListingPage {
                items: records,
                next_page_token: None,
            });
        };

        let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + page_size).min(records.len());
        Ok(ListingPage {
            items: records[start..end].to_vec(),
            next_page_token: (end < records.len()).then(|| end.to_string()),
        })
    }
}

/// One stream offered by a stubbed video-info page.
#[derive(Debug, Clone)]
pub struct StubStream {
    pub itag: u32,
    pub width: u32,
    pub height: u32,
    pub codec: &'static str,
    pub container: &'static str,
    pub quality: &'static str,
    /// URL without the query string, e.g. `https://r.example/v1`
    pub base: String,
}

impl StubStream {
    pub fn mp4_720(base: &str) -> Self {
        Self {
            itag: 22,
            width: 1280,
            height: 720,
            codec: "9/0/115",
            container: MP4_CONTAINER,
            quality: "hd720",
            base: base.into(),
        }
    }

    pub fn webm_480(base: &str) -> Self {
        Self {
            itag: 43,
            width: 854,
            height: 480,
            codec: "99/0/0",
            container: "webm",
            quality: "medium",
            base: base.into(),
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{}?itag={}&type=video/{}&quality={}",
            self.base, self.itag, self.container, self.quality
        )
    }
}

/// Build a video-info body advertising `streams` in order.
pub fn info_body(streams: &[StubStream]) -> String {
    let table: Vec<String> = streams
        .iter()
        .map(|s| format!("{}/{}x{}/{}", s.itag, s.width, s.height, s.codec))
        .collect();
    let mut body = format!("status=ok&fmt_list={}", table.join(","));
    for stream in streams {
        body.push_str("&url=");
        body.push_str(&stream.url());
    }
    body
}

/// The part of a URL that identifies content in [`ScriptedTransport`].
pub fn content_key(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Transport stub with scripted video-info pages and in-memory content.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    /// Successive info bodies per doc id; the last one repeats
    info: Mutex<HashMap<String, VecDeque<String>>>,
    /// Failed info requests still to be served per doc id
    info_failures: Mutex<HashMap<String, usize>>,
    cookie: Mutex<Option<String>>,
    content: Mutex<HashMap<String, Bytes>>,
    forbidden: Mutex<HashSet<String>>,
    failing_sizes: Mutex<HashSet<String>>,
    failing_reads: Mutex<HashSet<String>>,
    pub info_calls: AtomicUsize,
    pub size_calls: AtomicUsize,
    pub opens: AtomicUsize,
    pub seen_cookies: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    pub fn video(&self, doc_id: &str, bodies: Vec<String>) {
        self.info.lock().insert(doc_id.to_string(), bodies.into());
    }

    pub fn fail_info(&self, doc_id: &str, times: usize) {
        self.info_failures.lock().insert(doc_id.to_string(), times);
    }

    pub fn set_cookie(&self, cookie: &str) {
        *self.cookie.lock() = Some(cookie.to_string());
    }

    pub fn content(&self, base: &str, data: &[u8]) {
        self.content
            .lock()
            .insert(base.to_string(), Bytes::copy_from_slice(data));
    }

    pub fn forbid(&self, base: &str) {
        self.forbidden.lock().insert(base.to_string());
    }

    pub fn fail_size(&self, base: &str) {
        self.failing_sizes.lock().insert(base.to_string());
    }

    pub fn fail_reads(&self, base: &str) {
        self.failing_reads.lock().insert(base.to_string());
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn size_calls(&self) -> usize {
        self.size_calls.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch_video_info(&self, url: &str) -> Result<InfoResponse, TransportError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let doc_id = url.rsplit("docid=").next().unwrap_or_default();

        if let Some(left) = self.info_failures.lock().get_mut(doc_id) {
            if *left > 0 {
                *left -= 1;
                return Err(TransportError::Timeout);
            }
        }

        let mut info = self.info.lock();
        let bodies = info.get_mut(doc_id).ok_or(TransportError::Status(404))?;
        let body = if bodies.len() > 1 {
            bodies.pop_front().unwrap_or_default()
        } else {
            bodies.front().cloned().unwrap_or_default()
        };
        Ok(InfoResponse {
            body,
            cookie: self.cookie.lock().clone(),
        })
    }

    async fn content_length(&self, url: &str, cookie: Option<&str>) -> Result<u64, TransportError> {
        self.size_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_cookies.lock().push(cookie.map(str::to_string));
        let key = content_key(url);
        if self.failing_sizes.lock().contains(key) {
            return Err(TransportError::Timeout);
        }
        Ok(self
            .content
            .lock()
            .get(key)
            .map(|data| data.len() as u64)
            .unwrap_or(0))
    }

    async fn open_range(
        &self,
        url: &str,
        offset: u64,
        cookie: Option<&str>,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.seen_cookies.lock().push(cookie.map(str::to_string));
        let key = content_key(url);
        if self.forbidden.lock().contains(key) {
            return Err(TransportError::Forbidden(url.to_string()));
        }
        let data = self
            .content
            .lock()
            .get(key)
            .cloned()
            .ok_or(TransportError::Status(404))?;
        let start = (offset as usize).min(data.len());
        Ok(Box::new(MemoryStream {
            data: data.slice(start..),
            fail: self.failing_reads.lock().contains(key),
        }))
    }
}

struct MemoryStream {
    data: Bytes,
    fail: bool,
}

#[async_trait]
impl ByteStream for MemoryStream {
    async fn read(&mut self, len: usize) -> Result<Bytes, TransportError> {
        if self.fail {
            return Err(TransportError::Request("connection reset".into()));
        }
        let n = len.min(self.data.len());
        Ok(self.data.split_to(n))
    }
}

/// Builds sessions over the shared stubs, counting how many it built.
pub struct StubProvider {
    pub listing: Arc<CountingListing>,
    pub transport: Arc<ScriptedTransport>,
    pub built: AtomicUsize,
}

impl SessionProvider for StubProvider {
    fn build_session(&self) -> Result<Session, SessionError> {
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(Session::new(self.listing.clone(), self.transport.clone()))
    }
}

pub struct TestEnv {
    pub listing: Arc<CountingListing>,
    pub transport: Arc<ScriptedTransport>,
    pub provider: Arc<StubProvider>,
    pub pool: SessionPool,
    pub config: VfsConfig,
}

impl TestEnv {
    pub fn context(&self, id: u64) -> Context {
        self.pool.context(ContextId(id)).unwrap()
    }
}

/// Config with a long TTL, no original files and sequential size lookups.
pub fn test_config() -> VfsConfig {
    VfsConfig {
        cache_duration: 3600,
        include_original: String::new(),
        lookup_threads: false,
        ..Default::default()
    }
}

pub fn setup_test_env(config: VfsConfig) -> TestEnv {
    let listing = Arc::new(CountingListing::default());
    let transport = Arc::new(ScriptedTransport::default());
    let provider = Arc::new(StubProvider {
        listing: listing.clone(),
        transport: transport.clone(),
        built: AtomicUsize::new(0),
    });
    let pool = SessionPool::new(provider.clone());
    TestEnv {
        listing,
        transport,
        provider,
        pool,
        config,
    }
}

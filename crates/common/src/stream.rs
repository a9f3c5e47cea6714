//! Open upstream streams, one per path
//!
//! A read at the offset where the previous read on the same path stopped
//! continues the open stream. Any other offset drops it and opens a new
//! ranged request. Reads on one path are serialized by a per-path lock;
//! reads on different paths never wait for each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::http::{ByteStream, TransportError};
use crate::session::Context;
use crate::tree::{NodeId, TreeError, VirtualTree};

/// Attempts at opening a stream; all but the last may re-resolve a
/// rejected URL.
const OPEN_ATTEMPTS: usize = 2;

#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("nothing to stream at {0}")]
    NotStreamable(String),
    #[error("stream url for {0} was rejected and could not be renewed")]
    Stale(String),
    #[error("stream failed: {0}")]
    Transport(#[from] TransportError),
}

struct OpenHandle {
    serial: u64,
    node: NodeId,
    position: u64,
    stream: Box<dyn ByteStream>,
}

type Slot = Arc<tokio::sync::Mutex<Option<OpenHandle>>>;

/// Per-path table of open upstream streams.
pub struct StreamHandleTable {
    tree: Arc<VirtualTree>,
    slots: Mutex<HashMap<String, Slot>>,
    opened: AtomicU64,
}

impl StreamHandleTable {
    pub fn new(tree: Arc<VirtualTree>) -> Self {
        Self {
            tree,
            slots: Mutex::new(HashMap::new()),
            opened: AtomicU64::new(0),
        }
    }

    fn slot(&self, path: &str) -> Slot {
        self.slots
            .lock()
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    /// Read up to `len` bytes of `path` starting at `offset`.
    ///
    /// Fewer bytes than asked for are returned only at the end of the
    /// content. A failed read closes the stream; reading again reopens it.
    pub async fn read(
        &self,
        path: &str,
        len: usize,
        offset: u64,
        ctx: &Context,
    ) -> Result<Bytes, StreamError> {
        let slot = self.slot(path);
        let mut slot = slot.lock().await;

        let mut handle = match slot.take() {
            Some(handle) if handle.position == offset => handle,
            previous => {
                if let Some(previous) = previous {
                    tracing::debug!(
                        "seek on {} from {} to {}, reopening",
                        path,
                        previous.position,
                        offset
                    );
                }
                self.open(path, offset, ctx).await?
            }
        };

        match handle.stream.read(len).await {
            Ok(bytes) => {
                handle.position += bytes.len() as u64;
                *slot = Some(handle);
                Ok(bytes)
            }
            Err(e) => {
                tracing::warn!("read of {} at {} failed: {}", path, offset, e);
                Err(e.into())
            }
        }
    }

    /// Close the stream of `path`, if any.
    pub async fn release(&self, path: &str) {
        let slot = self.slots.lock().remove(path);
        if let Some(slot) = slot {
            if slot.lock().await.take().is_some() {
                tracing::debug!("closed stream of {}", path);
            }
        }
    }

    /// Serial number of the stream currently open for `path`. Every
    /// upstream open gets a new one.
    pub async fn open_serial(&self, path: &str) -> Option<u64> {
        let slot = self.slots.lock().get(path).cloned()?;
        let handle = slot.lock().await;
        handle.as_ref().map(|h| h.serial)
    }

    /// Node the stream currently open for `path` belongs to.
    pub async fn open_node(&self, path: &str) -> Option<NodeId> {
        let slot = self.slots.lock().get(path).cloned()?;
        let handle = slot.lock().await;
        handle.as_ref().map(|h| h.node)
    }

    /// Upstream streams opened so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    async fn open(&self, path: &str, offset: u64, ctx: &Context) -> Result<OpenHandle, StreamError> {
        let node = self.tree.resolve(path, ctx).await?;
        let mut url = self
            .tree
            .stream_url(node)
            .await?
            .ok_or_else(|| StreamError::NotStreamable(path.to_string()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let cookie = ctx.session().cookies().get();
            match ctx
                .session()
                .transport()
                .open_range(&url, offset, cookie.as_deref())
                .await
            {
                Ok(stream) => {
                    let serial = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!("opened {} at {} (stream {})", path, offset, serial);
                    return Ok(OpenHandle {
                        serial,
                        node,
                        position: offset,
                        stream,
                    });
                }
                Err(e) if e.is_forbidden() && attempt < OPEN_ATTEMPTS => {
                    tracing::warn!("stream url for {} rejected, resolving again", path);
                    match self.tree.refresh_stream_url(node, ctx).await? {
                        Some(fresh) => url = fresh,
                        None => return Err(StreamError::Stale(path.to_string())),
                    }
                }
                Err(e) if e.is_forbidden() => return Err(StreamError::Stale(path.to_string())),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl std::fmt::Debug for StreamHandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandleTable")
            .field("paths", &self.slots.lock().len())
            .field("opened", &self.opened())
            .finish()
    }
}

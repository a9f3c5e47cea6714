//! Filesystem operations over the tree and the stream table
//!
//! The mount glue forwards each kernel request to one of these methods with
//! the calling worker's [`Context`] and replies with the errno of whatever
//! [`FsError`] comes back.

use std::sync::Arc;

use bytes::Bytes;

use crate::session::Context;
use crate::stream::{StreamError, StreamHandleTable};
use crate::tree::{DirEntry, NodeAttr, NodeKind, TreeError, VirtualTree};

/// Extended attribute holding the URL a file streams from.
pub const XATTR_URL: &str = "user.url";
/// Extended attribute holding the current stream cookie.
pub const XATTR_COOKIE: &str = "user.cookie";

const XATTR_ATTEMPTS: usize = 3;

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("stale stream: {0}")]
    StaleStream(String),
    #[error("no such attribute: {0}")]
    NoAttribute(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("operation not supported")]
    NotSupported,
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::StaleStream(_) | FsError::Io(_) => libc::EIO,
            FsError::NoAttribute(_) => libc::ENODATA,
            FsError::NotSupported => libc::ENOSYS,
        }
    }
}

impl From<TreeError> for FsError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::NotFound(path) => FsError::NotFound(path),
            TreeError::Gone(id) => FsError::NotFound(format!("{:?}", id)),
            TreeError::NotADirectory(path) => FsError::NotADirectory(path),
            TreeError::Listing(e) => FsError::Io(e.to_string()),
        }
    }
}

impl From<StreamError> for FsError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Tree(e) => e.into(),
            StreamError::Stale(path) => FsError::StaleStream(path),
            e @ (StreamError::NotStreamable(_) | StreamError::Transport(_)) => {
                FsError::Io(e.to_string())
            }
        }
    }
}

/// The read-only filesystem as seen through the operation boundary.
#[derive(Debug)]
pub struct FsAdapter {
    tree: Arc<VirtualTree>,
    streams: StreamHandleTable,
}

impl FsAdapter {
    pub fn new(tree: Arc<VirtualTree>) -> Self {
        Self {
            streams: StreamHandleTable::new(tree.clone()),
            tree,
        }
    }

    pub fn tree(&self) -> &Arc<VirtualTree> {
        &self.tree
    }

    pub fn streams(&self) -> &StreamHandleTable {
        &self.streams
    }

    #[tracing::instrument(skip(self, ctx), fields(context = %ctx.id()))]
    pub async fn getattr(&self, path: &str, ctx: &Context) -> Result<NodeAttr, FsError> {
        Ok(self.tree.stat_path(path, ctx).await?)
    }

    /// Children of `path`, preceded by `.` and `..`.
    #[tracing::instrument(skip(self, ctx), fields(context = %ctx.id()))]
    pub async fn readdir(&self, path: &str, ctx: &Context) -> Result<Vec<DirEntry>, FsError> {
        let children = self.tree.list_path(path, ctx).await?;

        let mut entries = Vec::with_capacity(children.len() + 2);
        for name in [".", ".."] {
            entries.push(DirEntry {
                name: name.to_string(),
                kind: NodeKind::Directory,
            });
        }
        entries.extend(children);
        Ok(entries)
    }

    #[tracing::instrument(skip(self, ctx), fields(context = %ctx.id()))]
    pub async fn read(
        &self,
        path: &str,
        len: usize,
        offset: u64,
        ctx: &Context,
    ) -> Result<Bytes, FsError> {
        Ok(self.streams.read(path, len, offset, ctx).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(&self, path: &str) {
        self.streams.release(path).await
    }

    /// Value of extended attribute `name` on `path`.
    ///
    /// Values are best effort: an attribute that cannot be determined is
    /// empty rather than an error.
    #[tracing::instrument(skip(self, ctx), fields(context = %ctx.id()))]
    pub async fn getxattr(&self, path: &str, name: &str, ctx: &Context) -> Result<Vec<u8>, FsError> {
        match name {
            XATTR_URL => {
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    match self.stream_url(path, ctx).await {
                        Ok(url) => return Ok(url.unwrap_or_default().into_bytes()),
                        Err(e @ FsError::NotFound(_)) => return Err(e),
                        Err(e) if attempt < XATTR_ATTEMPTS => {
                            tracing::warn!("{} lookup on {} failed: {} ... trying again", name, path, e);
                        }
                        Err(e) => {
                            tracing::warn!("{} lookup on {} failed: {}", name, path, e);
                            return Ok(Vec::new());
                        }
                    }
                }
            }
            XATTR_COOKIE => {
                self.tree.resolve(path, ctx).await?;
                Ok(ctx.session().cookies().get().unwrap_or_default().into_bytes())
            }
            _ => Err(FsError::NoAttribute(name.to_string())),
        }
    }

    #[tracing::instrument(skip(self, ctx), fields(context = %ctx.id()))]
    pub async fn listxattr(&self, path: &str, ctx: &Context) -> Result<Vec<String>, FsError> {
        self.tree.resolve(path, ctx).await?;
        Ok(vec![XATTR_URL.to_string(), XATTR_COOKIE.to_string()])
    }

    async fn stream_url(&self, path: &str, ctx: &Context) -> Result<Option<String>, FsError> {
        let id = self.tree.resolve(path, ctx).await?;
        Ok(self.tree.stream_url(id).await?)
    }
}

//! Kernel-facing filesystem
//!
//! `fuser` calls into [`Gdvfs`] on its own thread. Every request that needs
//! the tree is packaged as an [`FsJob`] together with its reply object and
//! queued for the worker pool, so the kernel thread never waits on the
//! network. Workers answer through [`FsWorker`].

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyXattr, Request,
};
use parking_lot::Mutex;

use common::adapter::{FsAdapter, FsError};
use common::session::{Context, SessionError};
use common::tree::{NodeAttr, NodeKind};

use super::inode_table::InodeTable;
use crate::dispatch::{JobDispatcher, JobHandler};

const BLOCK_SIZE: u32 = 512;

/// A kernel request waiting for a worker.
pub enum FsJob {
    Lookup {
        path: String,
        reply: ReplyEntry,
    },
    Getattr {
        ino: u64,
        path: String,
        reply: ReplyAttr,
    },
    Readdir {
        ino: u64,
        path: String,
        offset: i64,
        reply: ReplyDirectory,
    },
    Open {
        path: String,
        reply: ReplyOpen,
    },
    Read {
        path: String,
        offset: u64,
        size: u32,
        reply: ReplyData,
    },
    Release {
        path: String,
        reply: ReplyEmpty,
    },
    Getxattr {
        path: String,
        name: String,
        size: u32,
        reply: ReplyXattr,
    },
    Listxattr {
        path: String,
        size: u32,
        reply: ReplyXattr,
    },
}

impl FsJob {
    /// Answer the request with `errno` without serving it.
    pub fn fail(self, errno: i32) {
        match self {
            FsJob::Lookup { reply, .. } => reply.fail(errno),
            FsJob::Getattr { reply, .. } => reply.fail(errno),
            FsJob::Readdir { reply, .. } => reply.fail(errno),
            FsJob::Open { reply, .. } => reply.fail(errno),
            FsJob::Read { reply, .. } => reply.fail(errno),
            FsJob::Release { reply, .. } => reply.fail(errno),
            FsJob::Getxattr { reply, .. } => reply.fail(errno),
            FsJob::Listxattr { reply, .. } => reply.fail(errno),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FsJob::Lookup { .. } => "lookup",
            FsJob::Getattr { .. } => "getattr",
            FsJob::Readdir { .. } => "readdir",
            FsJob::Open { .. } => "open",
            FsJob::Read { .. } => "read",
            FsJob::Release { .. } => "release",
            FsJob::Getxattr { .. } => "getxattr",
            FsJob::Listxattr { .. } => "listxattr",
        }
    }
}

/// Owner and attribute lifetime stamped on every reply.
#[derive(Debug, Clone, Copy)]
pub struct AttrDefaults {
    pub uid: u32,
    pub gid: u32,
    pub ttl: Duration,
}

impl AttrDefaults {
    pub fn for_current_user(ttl: Duration) -> Self {
        Self {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            ttl,
        }
    }

    pub fn file_attr(&self, ino: u64, attr: &NodeAttr) -> FileAttr {
        let kind = file_type(attr.kind);
        let mtime = system_time(attr.mtime);
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: UNIX_EPOCH,
            kind,
            perm: attr.permissions(),
            nlink: if attr.is_dir() { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

fn system_time(secs: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
}

/// Serves [`FsJob`]s against the adapter.
pub struct FsWorker {
    adapter: Arc<FsAdapter>,
    inodes: Arc<Mutex<InodeTable>>,
    attrs: AttrDefaults,
    next_fh: AtomicU64,
}

impl FsWorker {
    pub fn new(adapter: Arc<FsAdapter>, inodes: Arc<Mutex<InodeTable>>, attrs: AttrDefaults) -> Self {
        Self {
            adapter,
            inodes,
            attrs,
            next_fh: AtomicU64::new(1),
        }
    }

    async fn serve(&self, job: FsJob, ctx: &Context) {
        match job {
            FsJob::Lookup { path, reply } => match self.adapter.getattr(&path, ctx).await {
                Ok(attr) => {
                    let ino = self.inodes.lock().get_or_create(&path);
                    reply.entry(&self.attrs.ttl, &self.attrs.file_attr(ino, &attr), 0);
                }
                Err(e) => reply_error(reply, &path, e),
            },
            FsJob::Getattr { ino, path, reply } => match self.adapter.getattr(&path, ctx).await {
                Ok(attr) => reply.attr(&self.attrs.ttl, &self.attrs.file_attr(ino, &attr)),
                Err(e) => reply_error(reply, &path, e),
            },
            FsJob::Readdir {
                ino,
                path,
                offset,
                mut reply,
            } => match self.adapter.readdir(&path, ctx).await {
                Ok(entries) => {
                    let listed: Vec<(u64, FileType, String)> = {
                        let mut inodes = self.inodes.lock();
                        let parent = inodes.parent_inode(ino).unwrap_or(InodeTable::ROOT_INODE);
                        entries
                            .into_iter()
                            .map(|entry| {
                                let entry_ino = match entry.name.as_str() {
                                    "." => ino,
                                    ".." => parent,
                                    name => inodes.get_or_create(&InodeTable::join(&path, name)),
                                };
                                (entry_ino, file_type(entry.kind), entry.name)
                            })
                            .collect()
                    };
                    let skip = usize::try_from(offset).unwrap_or(0);
                    for (i, (entry_ino, kind, name)) in listed.iter().enumerate().skip(skip) {
                        if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                            break;
                        }
                    }
                    reply.ok();
                }
                Err(e) => reply_error(reply, &path, e),
            },
            FsJob::Open { path, reply } => match self.adapter.getattr(&path, ctx).await {
                Ok(attr) if attr.is_dir() => reply.error(libc::EISDIR),
                Ok(_) => {
                    let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
                    reply.opened(fh, 0);
                }
                Err(e) => reply_error(reply, &path, e),
            },
            FsJob::Read {
                path,
                offset,
                size,
                reply,
            } => match self.adapter.read(&path, size as usize, offset, ctx).await {
                Ok(data) => reply.data(&data),
                Err(e) => reply_error(reply, &path, e),
            },
            FsJob::Release { path, reply } => {
                self.adapter.release(&path).await;
                reply.ok();
            }
            FsJob::Getxattr {
                path,
                name,
                size,
                reply,
            } => match self.adapter.getxattr(&path, &name, ctx).await {
                Ok(value) => reply_xattr(reply, size, &value),
                Err(e) => reply_error(reply, &path, e),
            },
            FsJob::Listxattr { path, size, reply } => {
                match self.adapter.listxattr(&path, ctx).await {
                    Ok(names) => reply_xattr(reply, size, &encode_xattr_names(&names)),
                    Err(e) => reply_error(reply, &path, e),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl JobHandler<FsJob> for FsWorker {
    async fn handle(&self, job: FsJob, ctx: Result<Context, SessionError>) {
        match ctx {
            Ok(ctx) => self.serve(job, &ctx).await,
            Err(_) => job.fail(libc::EIO),
        }
    }
}

/// Reply types that can carry an errno.
trait Fail {
    fn fail(self, errno: i32);
}

macro_rules! impl_fail {
    ($($reply:ty),* $(,)?) => {
        $(impl Fail for $reply {
            fn fail(self, errno: i32) {
                self.error(errno)
            }
        })*
    };
}

impl_fail!(ReplyEntry, ReplyAttr, ReplyDirectory, ReplyOpen, ReplyData, ReplyEmpty, ReplyXattr);

fn reply_error<R: Fail>(reply: R, path: &str, e: FsError) {
    match &e {
        FsError::NotFound(_) | FsError::NoAttribute(_) => tracing::debug!("{}: {}", path, e),
        _ => tracing::warn!("{}: {}", path, e),
    }
    reply.fail(e.errno());
}

/// Answer an xattr request, honouring the size-probe convention: a zero
/// `size` asks for the length only.
fn reply_xattr(reply: ReplyXattr, size: u32, value: &[u8]) {
    let len = value.len() as u32;
    if size == 0 {
        reply.size(len);
    } else if len > size {
        reply.error(libc::ERANGE);
    } else {
        reply.data(value);
    }
}

/// NUL-terminated concatenation of attribute names, as listxattr returns.
pub fn encode_xattr_names(names: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out
}

/// The mounted filesystem. Holds no tree state of its own beyond inode
/// numbers.
pub struct Gdvfs {
    inodes: Arc<Mutex<InodeTable>>,
    dispatcher: JobDispatcher<FsJob>,
}

impl Gdvfs {
    pub fn new(inodes: Arc<Mutex<InodeTable>>, dispatcher: JobDispatcher<FsJob>) -> Self {
        Self { inodes, dispatcher }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.inodes.lock().get_path(ino).map(str::to_string)
    }

    fn submit(&self, job: FsJob) {
        if let Err(closed) = self.dispatcher.dispatch(job) {
            tracing::error!("dropping {} request: {}", closed.0.name(), closed);
            closed.0.fail(libc::EIO);
        }
    }
}

/// Resolve `$ino` to its path or answer ENOENT and return.
macro_rules! path_or_enoent {
    ($fs:expr, $ino:expr, $reply:expr) => {
        match $fs.path_of($ino) {
            Some(path) => path,
            None => {
                $reply.error(libc::ENOENT);
                return;
            }
        }
    };
}

impl Filesystem for Gdvfs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(path) = self.inodes.lock().child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        self.submit(FsJob::Lookup { path, reply });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let path = path_or_enoent!(self, ino, reply);
        self.submit(FsJob::Getattr { ino, path, reply });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        let path = path_or_enoent!(self, ino, reply);
        self.submit(FsJob::Readdir {
            ino,
            path,
            offset,
            reply,
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let write_flags = libc::O_WRONLY | libc::O_RDWR | libc::O_APPEND | libc::O_TRUNC;
        if flags & write_flags != 0 {
            reply.error(libc::EROFS);
            return;
        }
        let path = path_or_enoent!(self, ino, reply);
        self.submit(FsJob::Open { path, reply });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let path = path_or_enoent!(self, ino, reply);
        self.submit(FsJob::Read {
            path,
            offset,
            size,
            reply,
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.path_of(ino) {
            Some(path) => self.submit(FsJob::Release { path, reply }),
            None => reply.ok(),
        }
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let Some(name) = name.to_str().map(str::to_string) else {
            reply.error(libc::ENODATA);
            return;
        };
        let path = path_or_enoent!(self, ino, reply);
        self.submit(FsJob::Getxattr {
            path,
            name,
            size,
            reply,
        });
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let path = path_or_enoent!(self, ino, reply);
        self.submit(FsJob::Listxattr { path, size, reply });
    }
}

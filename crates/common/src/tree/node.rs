use std::time::Instant;

use indexmap::IndexMap;

use crate::drive::{DriveRecord, FOLDER_MIME_TYPE};
use crate::media::VideoVariant;

/// Size reported for directories, including videos shown as directories.
pub const FOLDER_BYTES: u64 = 4096;

const DIR_MODE: u32 = 0o40777;
const FILE_MODE: u32 = 0o100777;

/// Arena key of a node. Never reused, so a node that is removed and later
/// re-created under the same name gets a new identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Remote metadata of a node, replaced wholesale on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribs {
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
    /// Modified time, unix seconds
    pub modified: Option<i64>,
    pub file_extension: Option<String>,
    pub has_video_metadata: bool,
    pub download_url: Option<String>,
    /// Set once the node has been turned into a video directory
    pub original_mime_type: Option<String>,
    pub original_file_size: Option<u64>,
    pub is_video: bool,
}

impl From<&DriveRecord> for Attribs {
    fn from(record: &DriveRecord) -> Self {
        Self {
            mime_type: record.mime_type.clone(),
            file_size: record.file_size,
            modified: record.modified_timestamp(),
            file_extension: record.file_extension.clone(),
            has_video_metadata: record.has_video_metadata(),
            download_url: record.download_url.clone(),
            original_mime_type: None,
            original_file_size: None,
            is_video: false,
        }
    }
}

impl Attribs {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    /// Rewrite the attributes of a video file so it shows as a directory,
    /// keeping the file's own mime type and size aside.
    pub(crate) fn masquerade_as_directory(&mut self) {
        self.original_mime_type = self.mime_type.take();
        self.original_file_size = self.file_size.take();
        self.mime_type = Some(FOLDER_MIME_TYPE.to_string());
        self.file_size = Some(FOLDER_BYTES);
        self.is_video = true;
    }

    /// Attributes of a file entry living inside a video directory.
    pub(crate) fn as_video_file(&self, size: Option<u64>) -> Self {
        Self {
            mime_type: self.original_mime_type.clone(),
            file_size: size,
            original_mime_type: None,
            original_file_size: None,
            is_video: false,
            ..self.clone()
        }
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub remote_id: String,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: IndexMap<String, NodeId>,
    /// `None` until the node has been populated from a listing
    pub attribs: Option<Attribs>,
    pub variant: Option<VideoVariant>,
    pub mtime: i64,
    pub last_refreshed: Option<Instant>,
}

impl Node {
    pub fn new(remote_id: String, name: String, parent: Option<NodeId>) -> Self {
        Self {
            remote_id,
            name,
            parent,
            children: IndexMap::new(),
            attribs: None,
            variant: None,
            mtime: 0,
            last_refreshed: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_video(&self) -> bool {
        self.attribs.as_ref().is_some_and(|a| a.is_video)
    }

    pub fn is_dir(&self) -> bool {
        self.is_root() || self.attribs.as_ref().is_some_and(Attribs::is_folder)
    }

    /// URL to stream this node from, if it is streamable at all.
    pub fn stream_url(&self) -> Option<String> {
        if self.is_dir() {
            return None;
        }
        match &self.variant {
            Some(variant) => Some(variant.url.clone()),
            None => self
                .attribs
                .as_ref()
                .and_then(|a| a.download_url.clone())
                .filter(|url| !url.is_empty()),
        }
    }

    /// Size as reported to stat, given a resolved variant size if any.
    pub fn reported_size(&self) -> u64 {
        if let Some(variant) = &self.variant {
            return variant.size.unwrap_or(0);
        }
        if self.is_dir() {
            return FOLDER_BYTES;
        }
        self.attribs
            .as_ref()
            .and_then(|a| a.file_size)
            .unwrap_or(FOLDER_BYTES)
    }

    pub fn attr(&self) -> NodeAttr {
        let kind = if self.is_dir() {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        NodeAttr {
            kind,
            size: self.reported_size(),
            mtime: self.mtime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// What stat reports for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub kind: NodeKind,
    pub size: u64,
    /// Effective modification time, unix seconds
    pub mtime: i64,
}

impl NodeAttr {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Full `st_mode`: type bits plus static permission bits.
    pub fn mode(&self) -> u32 {
        match self.kind {
            NodeKind::Directory => DIR_MODE,
            NodeKind::File => FILE_MODE,
        }
    }

    pub fn permissions(&self) -> u16 {
        (self.mode() & 0o7777) as u16
    }
}

/// A child as listed by readdir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

/// Read-only view of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub remote_id: String,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<String>,
    pub attribs: Option<Attribs>,
    pub variant: Option<VideoVariant>,
    pub mtime: i64,
}

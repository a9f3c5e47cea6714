//! Stable inode numbers for virtual tree paths
//!
//! The kernel addresses entries by 64-bit inode, the tree by path. An inode
//! is handed out the first time a path is looked up and stays bound to that
//! path for the lifetime of the mount, even if the remote entry behind it is
//! replaced.

use std::collections::HashMap;

#[derive(Debug)]
pub struct InodeTable {
    by_path: HashMap<String, u64>,
    by_inode: HashMap<u64, String>,
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Root inode number (always 1 in FUSE)
    pub const ROOT_INODE: u64 = 1;

    pub fn new() -> Self {
        let mut table = Self {
            by_path: HashMap::new(),
            by_inode: HashMap::new(),
            next_inode: Self::ROOT_INODE + 1,
        };
        table.bind(Self::ROOT_INODE, "/".to_string());
        table
    }

    fn bind(&mut self, inode: u64, path: String) {
        self.by_path.insert(path.clone(), inode);
        self.by_inode.insert(inode, path);
    }

    /// Inode of `path`, allocating one on first sight.
    pub fn get_or_create(&mut self, path: &str) -> u64 {
        let normalized = Self::normalize_path(path);
        if let Some(&inode) = self.by_path.get(&normalized) {
            return inode;
        }

        let inode = self.next_inode;
        self.next_inode += 1;
        self.bind(inode, normalized);
        inode
    }

    pub fn get_inode(&self, path: &str) -> Option<u64> {
        self.by_path.get(&Self::normalize_path(path)).copied()
    }

    pub fn get_path(&self, inode: u64) -> Option<&str> {
        self.by_inode.get(&inode).map(String::as_str)
    }

    /// Path of `name` inside the directory bound to `parent`.
    pub fn child_path(&self, parent: u64, name: &str) -> Option<String> {
        let dir = self.get_path(parent)?;
        Some(Self::join(dir, name))
    }

    /// Inode of the directory containing `inode`. The root is its own parent.
    pub fn parent_inode(&mut self, inode: u64) -> Option<u64> {
        let parent = Self::parent_path(self.get_path(inode)?).to_string();
        Some(self.get_or_create(&parent))
    }

    pub fn len(&self) -> usize {
        self.by_inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_inode.is_empty()
    }

    /// `/`-rooted form without trailing or repeated separators.
    pub fn normalize_path(path: &str) -> String {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        format!("/{}", segments.join("/"))
    }

    pub fn join(dir: &str, name: &str) -> String {
        let dir = Self::normalize_path(dir);
        if dir == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", dir, name)
        }
    }

    pub fn parent_path(path: &str) -> &str {
        let trimmed = path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) | None => "/",
            Some(pos) => &trimmed[..pos],
        }
    }

    pub fn filename(path: &str) -> &str {
        let trimmed = path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(pos) => &trimmed[pos + 1..],
            None => trimmed,
        }
    }
}

//! The virtual directory tree
//!
//! Mirrors the remote folder hierarchy and presents every video file as a
//! directory of its streamable variants. Nodes live in an arena keyed by
//! [`NodeId`]; children are looked up by name and keep the order the
//! listing returned them in.
//!
//! Directory contents are cached for `cache_duration` seconds. Any path
//! lookup refreshes the stale directories it walks through, so the tree is
//! populated on demand and never ahead of it.
//!
//! Every public operation takes the tree lock once and performs its walk
//! and the refreshes it triggers under it, so concurrent callers never see
//! a half-applied refresh. Only variant size probes and stream URL
//! re-resolution talk to the remote side with the lock released.

mod node;
mod refresh;

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::config::VfsConfig;
use crate::drive::{ListingError, ROOT_ID};
use crate::media::MediaResolver;
use crate::session::Context;

use node::Node;
pub use node::{Attribs, DirEntry, NodeAttr, NodeId, NodeInfo, NodeKind, FOLDER_BYTES};

#[derive(thiserror::Error, Debug)]
pub enum TreeError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("node {0:?} no longer exists")]
    Gone(NodeId),
    #[error("listing failed: {0}")]
    Listing(#[from] ListingError),
}

/// Split a path into its non-empty segments.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

pub(crate) struct TreeState {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    root: NodeId,
}

impl TreeState {
    fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, Node::new(ROOT_ID.to_string(), String::new(), None));
        Self {
            nodes,
            next_id: 1,
            root,
        }
    }

    fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::Gone(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(&id).ok_or(TreeError::Gone(id))
    }

    /// Attach `node` under `parent` and return its fresh id.
    fn insert_child(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        node.parent = Some(parent);
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.insert(node.name.clone(), id);
        }
        self.nodes.insert(id, node);
        id
    }

    /// Detach `id` from its parent and drop it with all its descendants.
    fn remove_subtree(&mut self, id: NodeId) {
        let parent = self.nodes.get(&id).and_then(|node| node.parent);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|_, child| *child != id);
        }
        self.drop_nodes(vec![id]);
    }

    fn clear_children(&mut self, id: NodeId) {
        let children = match self.nodes.get_mut(&id) {
            Some(node) => std::mem::take(&mut node.children),
            None => return,
        };
        self.drop_nodes(children.into_values().collect());
    }

    fn drop_nodes(&mut self, mut pending: Vec<NodeId>) {
        while let Some(id) = pending.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                pending.extend(node.children.into_values());
            }
        }
    }

    /// Raise the mtime of `id` and its ancestors to at least `timestamp`.
    fn propagate_mtime(&mut self, id: NodeId, timestamp: i64) {
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.nodes.get_mut(&id)) {
            // ancestors are never older than their descendants
            if node.mtime >= timestamp {
                break;
            }
            node.mtime = timestamp;
            current = node.parent;
        }
    }

    fn path_of(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = self.nodes.get(&id);
        while let Some(node) = current {
            if node.is_root() {
                break;
            }
            names.push(node.name.as_str());
            current = node.parent.and_then(|p| self.nodes.get(&p));
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    /// Look a path up in what is already cached, without refreshing.
    fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        for segment in path_segments(path) {
            current = *self.nodes.get(&current)?.children.get(segment)?;
        }
        Some(current)
    }

    fn info(&self, id: NodeId) -> Option<NodeInfo> {
        let node = self.nodes.get(&id)?;
        Some(NodeInfo {
            id,
            remote_id: node.remote_id.clone(),
            name: node.name.clone(),
            parent: node.parent,
            children: node.children.keys().cloned().collect(),
            attribs: node.attribs.clone(),
            variant: node.variant.clone(),
            mtime: node.mtime,
        })
    }
}

/// Outcome of the locked half of a stat.
struct PendingStat {
    attr: NodeAttr,
    /// Variant URL whose byte length is still unknown
    size_probe: Option<String>,
}

/// The process-wide view of the remote drive.
pub struct VirtualTree {
    config: VfsConfig,
    resolver: MediaResolver,
    state: Mutex<TreeState>,
}

impl VirtualTree {
    pub fn new(config: VfsConfig) -> Self {
        Self {
            resolver: MediaResolver::new(&config),
            config,
            state: Mutex::new(TreeState::new()),
        }
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    pub fn resolver(&self) -> &MediaResolver {
        &self.resolver
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Find the node at `path`, refreshing stale directories along the way.
    pub async fn resolve(&self, path: &str, ctx: &Context) -> Result<NodeId, TreeError> {
        let mut state = self.state.lock().await;
        self.walk(&mut state, path, ctx).await
    }

    /// Refresh `id` if stale and list its children in listing order.
    pub async fn list_children(
        &self,
        id: NodeId,
        ctx: &Context,
    ) -> Result<Vec<DirEntry>, TreeError> {
        let mut state = self.state.lock().await;
        self.children(&mut state, id, ctx).await
    }

    /// [`resolve`](Self::resolve) and [`list_children`](Self::list_children)
    /// as one operation.
    pub async fn list_path(&self, path: &str, ctx: &Context) -> Result<Vec<DirEntry>, TreeError> {
        let mut state = self.state.lock().await;
        let id = self.walk(&mut state, path, ctx).await?;
        self.children(&mut state, id, ctx).await
    }

    /// Attributes of `id`.
    ///
    /// A variant whose length is not known yet is probed with the tree
    /// unlocked. If the probe fails the size is reported as 0 and probed
    /// again on the next stat.
    pub async fn stat(&self, id: NodeId, ctx: &Context) -> Result<NodeAttr, TreeError> {
        let pending = {
            let mut state = self.state.lock().await;
            self.stat_locked(&mut state, id, ctx).await?
        };
        Ok(self.finish_stat(id, pending, ctx).await)
    }

    /// [`resolve`](Self::resolve) followed by [`stat`](Self::stat).
    pub async fn stat_path(&self, path: &str, ctx: &Context) -> Result<NodeAttr, TreeError> {
        let (id, pending) = {
            let mut state = self.state.lock().await;
            let id = self.walk(&mut state, path, ctx).await?;
            (id, self.stat_locked(&mut state, id, ctx).await?)
        };
        Ok(self.finish_stat(id, pending, ctx).await)
    }

    /// URL the content of `id` streams from, if it has one.
    pub async fn stream_url(&self, id: NodeId) -> Result<Option<String>, TreeError> {
        let state = self.state.lock().await;
        Ok(state.node(id)?.stream_url())
    }

    /// Fetch a fresh URL for a node whose URL stopped working.
    ///
    /// Variants are resolved again and matched by extension, width and
    /// quality. Plain files get their download URL from a forced relisting
    /// of their directory. Returns `None` when nothing matching is found.
    pub async fn refresh_stream_url(
        &self,
        id: NodeId,
        ctx: &Context,
    ) -> Result<Option<String>, TreeError> {
        let (doc_id, stale) = {
            let mut state = self.state.lock().await;
            let node = state.node(id)?;
            let (doc_id, variant, parent) =
                (node.remote_id.clone(), node.variant.clone(), node.parent);
            match (variant, parent) {
                (Some(variant), _) => (doc_id, variant),
                (None, Some(parent)) => {
                    state.node_mut(parent)?.last_refreshed = None;
                    self.refresh(&mut state, parent, ctx).await?;
                    return Ok(state.node(id)?.stream_url());
                }
                (None, None) => return Ok(None),
            }
        };

        let fresh = self.resolver.resolve_variants(&doc_id, ctx).await;
        let Some(found) = fresh.into_iter().find(|v| v.same_stream(&stale)) else {
            tracing::warn!(
                "no fresh {} {}x{} stream for {}",
                stale.quality,
                stale.width,
                stale.height,
                doc_id
            );
            return Ok(None);
        };

        let mut state = self.state.lock().await;
        let node = state.node_mut(id)?;
        if let Some(variant) = node.variant.as_mut() {
            variant.url = found.url.clone();
        }
        Ok(Some(found.url))
    }

    /// Snapshot of a node, without refreshing anything.
    pub async fn info(&self, id: NodeId) -> Option<NodeInfo> {
        self.state.lock().await.info(id)
    }

    /// Node at `path` in the cached tree, without refreshing anything.
    pub async fn find(&self, path: &str) -> Option<NodeId> {
        self.state.lock().await.find(path)
    }

    pub async fn path_of(&self, id: NodeId) -> Option<String> {
        let state = self.state.lock().await;
        state.nodes.contains_key(&id).then(|| state.path_of(id))
    }

    async fn walk(
        &self,
        state: &mut TreeState,
        path: &str,
        ctx: &Context,
    ) -> Result<NodeId, TreeError> {
        let mut current = state.root;
        for segment in path_segments(path) {
            self.refresh(state, current, ctx).await?;
            current = *state
                .node(current)?
                .children
                .get(segment)
                .ok_or_else(|| TreeError::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    async fn children(
        &self,
        state: &mut TreeState,
        id: NodeId,
        ctx: &Context,
    ) -> Result<Vec<DirEntry>, TreeError> {
        self.refresh(state, id, ctx).await?;
        let node = state.node(id)?;
        Ok(node
            .children
            .iter()
            .filter_map(|(name, child)| {
                state.nodes.get(child).map(|child| DirEntry {
                    name: name.clone(),
                    kind: child.attr().kind,
                })
            })
            .collect())
    }

    async fn stat_locked(
        &self,
        state: &mut TreeState,
        id: NodeId,
        ctx: &Context,
    ) -> Result<PendingStat, TreeError> {
        if state.node(id)?.attribs.is_none() {
            self.refresh(state, id, ctx).await?;
        }
        let node = state.node(id)?;
        Ok(PendingStat {
            attr: node.attr(),
            size_probe: node
                .variant
                .as_ref()
                .filter(|variant| variant.size.is_none())
                .map(|variant| variant.url.clone()),
        })
    }

    async fn finish_stat(&self, id: NodeId, pending: PendingStat, ctx: &Context) -> NodeAttr {
        let Some(url) = pending.size_probe else {
            return pending.attr;
        };

        let cookie = ctx.session().cookies().get();
        match ctx
            .session()
            .transport()
            .content_length(&url, cookie.as_deref())
            .await
        {
            Ok(size) => {
                let mut state = self.state.lock().await;
                let variant = state
                    .nodes
                    .get_mut(&id)
                    .and_then(|node| node.variant.as_mut());
                // The URL may have been replaced while unlocked
                if let Some(variant) = variant.filter(|v| v.url == url) {
                    variant.size = Some(size);
                }
                NodeAttr {
                    size,
                    ..pending.attr
                }
            }
            Err(e) => {
                tracing::warn!("size lookup for node {:?} failed: {}", id, e);
                pending.attr
            }
        }
    }
}

impl std::fmt::Debug for VirtualTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualTree")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveRecord;

    fn leaf(name: &str) -> Node {
        let mut node = Node::new(format!("id-{}", name), name.to_string(), None);
        node.attribs = Some(Attribs::from(&DriveRecord::default()));
        node
    }

    #[test]
    fn test_path_segments() {
        let segments: Vec<&str> = path_segments("/a//b/c/").collect();
        assert_eq!(segments, vec!["a", "b", "c"]);
        assert_eq!(path_segments("/").count(), 0);
    }

    #[test]
    fn test_path_of_and_find() {
        let mut state = TreeState::new();
        let root = state.root;
        let a = state.insert_child(root, leaf("a"));
        let b = state.insert_child(a, leaf("b"));

        assert_eq!(state.path_of(root), "/");
        assert_eq!(state.path_of(b), "/a/b");
        assert_eq!(state.find("/a/b"), Some(b));
        assert_eq!(state.find("a/b/"), Some(b));
        assert_eq!(state.find("/a/c"), None);
    }

    #[test]
    fn test_remove_subtree_drops_descendants() {
        let mut state = TreeState::new();
        let root = state.root;
        let a = state.insert_child(root, leaf("a"));
        let b = state.insert_child(a, leaf("b"));
        let c = state.insert_child(root, leaf("c"));

        state.remove_subtree(a);

        assert!(state.node(a).is_err());
        assert!(state.node(b).is_err());
        let root_children: Vec<&String> = state.node(root).unwrap().children.keys().collect();
        assert_eq!(root_children, vec!["c"]);
        assert!(state.node(c).is_ok());
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut state = TreeState::new();
        let root = state.root;
        let first = state.insert_child(root, leaf("a"));
        state.remove_subtree(first);
        let second = state.insert_child(root, leaf("a"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_propagate_mtime_only_raises() {
        let mut state = TreeState::new();
        let root = state.root;
        let a = state.insert_child(root, leaf("a"));
        let b = state.insert_child(a, leaf("b"));

        state.propagate_mtime(b, 100);
        assert_eq!(state.node(root).unwrap().mtime, 100);
        assert_eq!(state.node(a).unwrap().mtime, 100);

        state.propagate_mtime(b, 50);
        assert_eq!(state.node(b).unwrap().mtime, 100);

        let c = state.insert_child(root, leaf("c"));
        state.propagate_mtime(c, 200);
        assert_eq!(state.node(root).unwrap().mtime, 200);
        assert_eq!(state.node(a).unwrap().mtime, 100);
    }
}

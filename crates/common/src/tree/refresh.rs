use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures::{stream, StreamExt};

use super::node::{Attribs, Node};
use super::{NodeId, TreeError, TreeState, VirtualTree};
use crate::drive::DriveRecord;
use crate::session::Context;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

fn retry_delay(failures: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(1 << failures.min(6))
        .min(RETRY_MAX_DELAY)
}

/// Extension of a listed file, from the record or else from its title.
fn record_extension(record: &DriveRecord) -> Option<&str> {
    record
        .file_extension
        .as_deref()
        .filter(|ext| !ext.is_empty())
        .or_else(|| {
            let (base, ext) = record.title.rsplit_once('.')?;
            (!base.is_empty()).then_some(ext)
        })
}

impl VirtualTree {
    /// Bring `id` up to date if its cached contents have expired.
    pub(super) async fn refresh(
        &self,
        state: &mut TreeState,
        id: NodeId,
        ctx: &Context,
    ) -> Result<(), TreeError> {
        let node = state.node(id)?;
        if let Some(refreshed) = node.last_refreshed {
            if refreshed.elapsed() < self.config.cache_ttl() {
                return Ok(());
            }
        }

        if node.is_video() {
            self.expand_video(state, id, ctx).await
        } else if node.is_dir() {
            self.refresh_directory(state, id, ctx).await
        } else {
            Err(TreeError::NotADirectory(state.path_of(id)))
        }
    }

    /// Reconcile the children of a directory with a fresh listing.
    ///
    /// Children are matched by name: missing names are dropped with their
    /// subtrees, known names are updated in place and new names appended.
    async fn refresh_directory(
        &self,
        state: &mut TreeState,
        id: NodeId,
        ctx: &Context,
    ) -> Result<(), TreeError> {
        let remote_id = state.node(id)?.remote_id.clone();
        tracing::debug!(path = %state.path_of(id), "refreshing directory");

        let records = self.fetch_listing(&remote_id, ctx).await?;

        let listed: HashSet<&str> = records.iter().map(|r| r.title.as_str()).collect();
        let removed: Vec<NodeId> = state
            .node(id)?
            .children
            .iter()
            .filter(|(name, _)| !listed.contains(name.as_str()))
            .map(|(_, child)| *child)
            .collect();
        for child in removed {
            state.remove_subtree(child);
        }

        for record in &records {
            self.apply_record(state, id, record)?;
        }

        state.node_mut(id)?.last_refreshed = Some(Instant::now());
        Ok(())
    }

    fn apply_record(
        &self,
        state: &mut TreeState,
        parent: NodeId,
        record: &DriveRecord,
    ) -> Result<(), TreeError> {
        let mut attribs = Attribs::from(record);
        let is_video = !attribs.is_folder()
            && (attribs.has_video_metadata
                || record_extension(record).is_some_and(|ext| self.config.is_video_extension(ext)));
        if is_video {
            attribs.masquerade_as_directory();
        }

        let existing = state.node(parent)?.children.get(&record.title).copied();
        let child = match existing {
            Some(child) => {
                let node = state.node_mut(child)?;
                let was_video = node.is_video();
                let was_dir = node.is_dir();
                let same_id = node.remote_id == record.id;

                node.remote_id = record.id.clone();
                node.attribs = Some(attribs);

                // Cached children describe something else now
                if was_video != is_video || was_dir != node.is_dir() || !same_id {
                    node.last_refreshed = None;
                    state.clear_children(child);
                }
                child
            }
            None => {
                let mut node = Node::new(record.id.clone(), record.title.clone(), None);
                node.attribs = Some(attribs);
                state.insert_child(parent, node)
            }
        };

        match record.modified_timestamp() {
            Some(timestamp) => state.propagate_mtime(child, timestamp),
            None => tracing::debug!("no usable modified date on {}", record.title),
        }
        Ok(())
    }

    /// Fetch every page of the listing of `parent_id`.
    ///
    /// A page failing transiently is retried with backoff, without limit
    /// unless `max_page_retries` is set. Any other failure aborts.
    async fn fetch_listing(
        &self,
        parent_id: &str,
        ctx: &Context,
    ) -> Result<Vec<DriveRecord>, TreeError> {
        let listing = ctx.session().listing();
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut failures = 0u32;
            let page = loop {
                match listing.list_page(parent_id, page_token.as_deref()).await {
                    Ok(page) => break page,
                    Err(e) if e.is_transient() => {
                        failures += 1;
                        if self
                            .config
                            .max_page_retries
                            .is_some_and(|max| failures > max)
                        {
                            tracing::error!("listing {} failed {} times: {}", parent_id, failures, e);
                            return Err(e.into());
                        }
                        tracing::warn!("listing {} failed: {} ... trying again", parent_id, e);
                        tokio::time::sleep(retry_delay(failures)).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            records.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(records)
    }

    /// Replace the children of a video directory with its current variants,
    /// plus the original file when its path asks for it.
    async fn expand_video(
        &self,
        state: &mut TreeState,
        id: NodeId,
        ctx: &Context,
    ) -> Result<(), TreeError> {
        let node = state.node(id)?;
        let doc_id = node.remote_id.clone();
        let name = node.name.clone();
        let attribs = node.attribs.clone().unwrap_or_default();
        let path = state.path_of(id);
        tracing::debug!(%path, "expanding video");

        state.clear_children(id);

        let variants = self.resolver.resolve_variants(&doc_id, ctx).await;

        let mut unsized_variants = Vec::new();
        for variant in variants {
            let file_name = variant.file_name(&name);
            if state.node(id)?.children.contains_key(&file_name) {
                tracing::debug!("duplicate variant {} skipped", file_name);
                continue;
            }

            let url = variant.url.clone();
            let mut child = Node::new(doc_id.clone(), file_name, None);
            child.attribs = Some(attribs.as_video_file(None));
            child.variant = Some(variant);
            let child = state.insert_child(id, child);

            if let Some(modified) = attribs.modified {
                state.propagate_mtime(child, modified);
            }
            unsized_variants.push((child, url));
        }

        if self.config.lookup_threads && !unsized_variants.is_empty() {
            for (child, size) in self.lookup_sizes(unsized_variants, ctx).await {
                if let Some(variant) = state
                    .nodes
                    .get_mut(&child)
                    .and_then(|node| node.variant.as_mut())
                {
                    variant.size = Some(size);
                }
            }
        }

        if self.config.includes_original(&path) {
            let mut original = Node::new(doc_id, name.clone(), None);
            original.attribs = Some(attribs.as_video_file(attribs.original_file_size));
            let child = state.insert_child(id, original);
            if let Some(modified) = attribs.modified {
                state.propagate_mtime(child, modified);
            }
        }

        state.node_mut(id)?.last_refreshed = Some(Instant::now());
        Ok(())
    }

    /// Probe the byte length of each variant, a bounded number at a time.
    /// Failed probes are left out and retried lazily on stat.
    async fn lookup_sizes(
        &self,
        targets: Vec<(NodeId, String)>,
        ctx: &Context,
    ) -> Vec<(NodeId, u64)> {
        let transport = ctx.session().transport();
        let cookie = ctx.session().cookies().get();
        let cookie = cookie.as_deref();

        stream::iter(targets)
            .map(|(id, url)| async move {
                let result = transport.content_length(&url, cookie).await;
                (id, url, result)
            })
            .buffer_unordered(self.config.lookup_concurrency.max(1))
            .filter_map(|(id, url, result)| async move {
                match result {
                    Ok(size) => Some((id, size)),
                    Err(e) => {
                        tracing::warn!("size lookup for {} failed: {}", url, e);
                        None
                    }
                }
            })
            .collect()
            .await
    }
}

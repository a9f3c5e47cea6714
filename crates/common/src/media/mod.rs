//! Video variant resolution
//!
//! Given a drive document id, [`MediaResolver`] fetches the undocumented
//! video-info page and recovers the streamable variants the upstream
//! already offers for it (see [`decode`] for the payload format).

pub mod decode;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::config::VfsConfig;
use crate::session::Context;

pub use decode::decode_variants;

const FETCH_ATTEMPTS: usize = 3;

/// One streamable quality/format of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoVariant {
    /// Upstream quality label, e.g. `hd720` or `medium`
    pub quality: String,
    pub width: u32,
    pub height: u32,
    /// Codec label, e.g. `h.264/aac`
    pub codec: String,
    /// Upstream container id, e.g. `x-flv`
    pub container: String,
    /// Lowercase file extension derived from the container
    pub extension: String,
    pub url: String,
    /// Byte length, resolved on first size query
    pub size: Option<u64>,
}

impl VideoVariant {
    /// Entry name of this variant for a video named `video_name`:
    /// `<base>-<height>p.<extension>`.
    pub fn file_name(&self, video_name: &str) -> String {
        format!(
            "{}-{}p.{}",
            base_name(video_name),
            self.height,
            self.extension.to_lowercase()
        )
    }

    /// Whether `other` describes the same stream as `self`, ignoring its URL.
    pub fn same_stream(&self, other: &VideoVariant) -> bool {
        self.extension == other.extension
            && self.width == other.width
            && self.quality == other.quality
    }
}

/// `name` without its final extension. Leading dots do not start an
/// extension.
pub fn base_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if name[..pos].chars().any(|c| c != '.') => &name[..pos],
        _ => name,
    }
}

/// Resolves documents into their [`VideoVariant`]s.
#[derive(Debug, Clone)]
pub struct MediaResolver {
    info_url: String,
    allowed_formats: Vec<String>,
}

impl MediaResolver {
    pub fn new(config: &VfsConfig) -> Self {
        Self {
            info_url: config.video_info_url.trim_end_matches('/').to_string(),
            allowed_formats: config.allowed_formats(),
        }
    }

    pub fn info_url(&self, doc_id: &str) -> String {
        format!(
            "{}/get_video_info?docid={}",
            self.info_url,
            utf8_percent_encode(doc_id, NON_ALPHANUMERIC)
        )
    }

    /// Fetch and decode the variants of `doc_id` using the caller's session.
    ///
    /// The request is attempted up to three times; if every attempt fails
    /// the video simply has no variants. A cookie returned by the upstream
    /// is stored in the session's jar for later stream requests.
    #[tracing::instrument(skip(self, ctx), fields(context = %ctx.id()))]
    pub async fn resolve_variants(&self, doc_id: &str, ctx: &Context) -> Vec<VideoVariant> {
        let url = self.info_url(doc_id);
        let session = ctx.session();

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match session.transport().fetch_video_info(&url).await {
                Ok(response) => break response,
                Err(e) if attempt < FETCH_ATTEMPTS => {
                    tracing::warn!("video info request failed: {} ... trying again", e);
                }
                Err(e) => {
                    tracing::error!("video info request failed: {} ... giving up", e);
                    return Vec::new();
                }
            }
        };

        session.cookies().set(response.cookie);

        let variants = decode_variants(&response.body, &self.allowed_formats);
        tracing::debug!("found {} variants", variants.len());
        variants
    }
}

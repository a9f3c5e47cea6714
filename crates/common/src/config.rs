//! Tunables for the virtual tree and the video variant resolver.
//!
//! List-valued options are kept as the comma-separated strings they are
//! configured with and split on demand, matching the config file format.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base URL of the video-info endpoint.
pub const DEFAULT_VIDEO_INFO_URL: &str = "https://docs.google.com";

/// Configuration consumed by the tree, the resolver and the stream table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Directory listing cache TTL in seconds
    pub cache_duration: u64,
    /// Comma-separated list of stream formats to expose (e.g. `mp4,flv,webm`)
    pub include_formats: String,
    /// Comma-separated path fragments; video directories whose path contains
    /// one of them also list the untouched original file
    pub include_original: String,
    /// Comma-separated file extensions treated as video
    pub video_extensions: String,
    /// Resolve variant sizes concurrently while expanding a video
    pub lookup_threads: bool,
    /// Upper bound on concurrent size lookups during one expansion
    pub lookup_concurrency: usize,
    /// Optional bound on retries of a single listing page. `None` retries
    /// until the page is fetched.
    pub max_page_retries: Option<u32>,
    /// Base URL of the video-info endpoint
    pub video_info_url: String,
    /// Timeout applied to each remote request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            cache_duration: 30,
            include_formats: "mp4,flv,webm".to_string(),
            include_original: "/".to_string(),
            video_extensions: "mkv,avi,mp4".to_string(),
            lookup_threads: true,
            lookup_concurrency: 8,
            max_page_retries: None,
            video_info_url: DEFAULT_VIDEO_INFO_URL.to_string(),
            request_timeout_secs: 5,
        }
    }
}

impl VfsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_duration)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Allowed stream formats, lowercased.
    pub fn allowed_formats(&self) -> Vec<String> {
        split_list(&self.include_formats, true)
    }

    /// Video file extensions, lowercased.
    pub fn video_extension_list(&self) -> Vec<String> {
        split_list(&self.video_extensions, true)
    }

    /// Whether the original file should be listed next to the variants of
    /// the video living at `path`.
    ///
    /// Empty fragments never match.
    pub fn includes_original(&self, path: &str) -> bool {
        split_list(&self.include_original, false)
            .iter()
            .any(|fragment| path.contains(fragment.as_str()))
    }

    pub fn is_video_extension(&self, extension: &str) -> bool {
        let extension = extension.to_lowercase();
        self.video_extension_list().iter().any(|e| *e == extension)
    }
}

fn split_list(value: &str, lowercase: bool) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if lowercase {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        })
        .collect()
}

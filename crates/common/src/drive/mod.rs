//! Remote folder listing
//!
//! The tree only needs one thing from the remote drive: the children of a
//! folder, one page at a time. [`ListingClient`] is that seam; [`v2`] holds
//! the implementation backed by the Drive v2 REST API.

pub mod v2;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mime type the drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Identifier of the drive root folder.
pub const ROOT_ID: &str = "root";

/// One child record as reported by the remote listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub modified_date: Option<String>,
    /// Size in bytes; the API encodes it as a decimal string
    #[serde(default, with = "size_string")]
    pub file_size: Option<u64>,
    /// Present when the drive has processed the file as a video
    #[serde(default)]
    pub video_media_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub file_extension: Option<String>,
}

impl DriveRecord {
    pub fn has_video_metadata(&self) -> bool {
        self.video_media_metadata.is_some()
    }

    /// Modified time as unix seconds, if present and well-formed.
    pub fn modified_timestamp(&self) -> Option<i64> {
        self.modified_date.as_deref().and_then(parse_timestamp)
    }
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    #[serde(default)]
    pub items: Vec<DriveRecord>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ListingError {
    /// Worth retrying: timeouts, connection resets, 5xx, rate limiting
    #[error("transient listing failure: {0}")]
    Transient(String),
    /// The remote refused the request outright
    #[error("listing rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed listing response: {0}")]
    Malformed(String),
}

impl ListingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ListingError::Transient(_))
    }
}

/// Lists the children of a remote folder.
///
/// Implementations are owned by a single session and need not be safe to
/// share between concurrent callers beyond what `Send + Sync` demands.
#[async_trait]
pub trait ListingClient: Send + Sync + Debug {
    /// Fetch one page of children of `parent_id`.
    ///
    /// # Arguments
    /// * `parent_id` - Remote id of the folder
    /// * `page_token` - Continuation token from the previous page, `None` for
    ///   the first page
    async fn list_page(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListingPage, ListingError>;
}

/// Parse a drive timestamp such as `2015-07-28T16:33:27.240Z` into unix
/// seconds.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).timestamp());
    }
    NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

mod size_string {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(size) => serializer.serialize_str(&size.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Number(n)) => Some(n),
            Some(Raw::Text(s)) => s.parse().ok(),
            None => None,
        })
    }
}

//! Catalog records: download attempts and the collections they belong to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal numeric id assigned by the catalog
pub type RecordId = i64;

/// Lifecycle of a download record.
///
/// Transitions are one-way: `Queued` → `Succeeded` or `Queued` → `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Accepted, attempt not yet resolved
    Queued,

    /// Extractor finished and produced a file
    Succeeded,

    /// Extractor failed, timed out, or could not be started
    Failed,
}

impl DownloadStatus {
    /// Stable string form used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the record can no longer change
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued)
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One download attempt as known to the catalog.
///
/// `extractor`/`online_id` are only known once an attempt succeeds; together
/// they are unique across the catalog. `filepath` is present iff the status
/// is `Succeeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: RecordId,

    /// Extractor name reported by the tool (e.g. "youtube")
    pub extractor: Option<String>,

    /// Platform-native id of the video
    pub online_id: Option<String>,

    pub url: String,

    /// Format requested at submission (None = configured default)
    pub format: Option<String>,

    pub status: DownloadStatus,

    pub title: Option<String>,

    pub filepath: Option<String>,

    pub error: Option<String>,

    /// Owning collection, if the video came from a playlist/channel
    pub collection_id: Option<RecordId>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl DownloadRecord {
    /// The (extractor, online id) natural key, once known
    pub fn extractor_key(&self) -> Option<(&str, &str)> {
        match (&self.extractor, &self.online_id) {
            (Some(extractor), Some(online_id)) => Some((extractor, online_id)),
            _ => None,
        }
    }
}

/// A playlist/channel grouping, created lazily on its first video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: RecordId,
    pub extractor: String,
    pub online_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,

    /// Member videos, newest first
    pub videos: Vec<DownloadRecord>,
}

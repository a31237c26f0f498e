//! Typed response shapes for the query and submission surface.
//!
//! These decouple catalog records from what callers see; every response is
//! built by an explicit conversion here rather than by serializing storage
//! types directly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{
    Collection, DownloadRecord, DownloadStatus, FetchOptions, FormatOption, RecordId, Settings,
};

/// One download record as shown to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecordView {
    pub id: RecordId,
    pub extractor: Option<String>,
    pub online_id: Option<String>,
    pub url: String,
    pub format: Option<String>,
    pub status: DownloadStatus,
    pub title: Option<String>,
    pub filepath: Option<String>,
    pub error: Option<String>,
    pub collection_id: Option<RecordId>,
    /// RFC 3339
    pub created_at: String,
    /// RFC 3339
    pub updated_at: String,
}

impl From<DownloadRecord> for DownloadRecordView {
    fn from(record: DownloadRecord) -> Self {
        Self {
            id: record.id,
            extractor: record.extractor,
            online_id: record.online_id,
            url: record.url,
            format: record.format,
            status: record.status,
            title: record.title,
            filepath: record.filepath,
            error: record.error,
            collection_id: record.collection_id,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

/// A collection with its member videos
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionView {
    pub id: RecordId,
    pub extractor: String,
    pub online_id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub videos: ListView<DownloadRecordView>,
}

impl From<Collection> for CollectionView {
    fn from(collection: Collection) -> Self {
        Self {
            id: collection.id,
            extractor: collection.extractor,
            online_id: collection.online_id,
            title: collection.title,
            created_at: collection.created_at.to_rfc3339(),
            videos: ListView::from_records(collection.videos),
        }
    }
}

/// `{count, items}` listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListView<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> ListView<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

impl ListView<DownloadRecordView> {
    pub fn from_records(records: Vec<DownloadRecord>) -> Self {
        Self::new(records.into_iter().map(DownloadRecordView::from).collect())
    }
}

/// Landing page data: everything needed to render the queue overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexView {
    pub format_options: Vec<FormatOption>,
    pub default_format: String,
    pub failed: ListView<DownloadRecordView>,
    pub queue: ListView<DownloadRecordView>,
    pub history: ListView<DownloadRecordView>,
}

/// One setting with its effective value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
    /// Value comes from a `YDL_<KEY>` environment variable
    pub overridden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsView {
    pub settings: Vec<SettingEntry>,
    /// Options the extractor is invoked with for the default format
    pub fetch_options: FetchOptions,
    pub overrides: BTreeSet<String>,
}

impl SettingsView {
    pub fn new(settings: &Settings, fetch_options: FetchOptions, overrides: BTreeSet<String>) -> Self {
        let entries = settings
            .to_pairs()
            .into_iter()
            .map(|(key, value)| SettingEntry {
                key: key.to_string(),
                overridden: overrides.contains(key),
                value,
            })
            .collect();

        Self {
            settings: entries,
            fetch_options,
            overrides,
        }
    }
}

/// Inbound job submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitForm {
    pub url: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    /// Absent means redirect; "false" or "0" asks for the queue snapshot
    #[serde(default)]
    pub redirect: Option<String>,
}

impl SubmitForm {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn wants_redirect(&self) -> bool {
        match self.redirect.as_deref() {
            None => true,
            Some(value) => !value.eq_ignore_ascii_case("false") && value != "0",
        }
    }
}

/// Reply to an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum SubmitResponse {
    Redirect {
        location: String,
        id: RecordId,
    },
    Queue {
        id: RecordId,
        queue: ListView<DownloadRecordView>,
    },
}

impl SubmitResponse {
    /// Queued record id of the accepted job
    pub fn id(&self) -> RecordId {
        match self {
            Self::Redirect { id, .. } | Self::Queue { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_parsing() {
        let mut form = SubmitForm::new("https://example.com/v1");
        assert!(form.wants_redirect());

        for value in ["false", "FALSE", "False", "0"] {
            form.redirect = Some(value.to_string());
            assert!(!form.wants_redirect(), "{value} should disable redirect");
        }

        for value in ["true", "1", "no", ""] {
            form.redirect = Some(value.to_string());
            assert!(form.wants_redirect(), "{value} should keep redirect");
        }
    }

    #[test]
    fn test_list_view_counts_items() {
        let view = ListView::new(vec!["a", "b", "c"]);
        assert_eq!(view.count, 3);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["count"], 3);
        assert_eq!(json["items"][1], "b");
    }

    #[test]
    fn test_settings_view_flags_overrides() {
        let settings = Settings::default();
        let overrides: BTreeSet<String> = ["default_format".to_string()].into_iter().collect();
        let options = settings.fetch_options(None, std::path::Path::new("/dl"));

        let view = SettingsView::new(&settings, options, overrides);

        let format = view
            .settings
            .iter()
            .find(|entry| entry.key == "default_format")
            .unwrap();
        assert!(format.overridden);
        assert!(view
            .settings
            .iter()
            .filter(|entry| entry.key != "default_format")
            .all(|entry| !entry.overridden));
    }
}

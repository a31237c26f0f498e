//! In-memory catalog backend.
//!
//! Same semantics as the SQLite backend, held behind a `RwLock`: concurrent
//! readers, one writer at a time. Nothing survives the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::{schema, CatalogStore, StoreBackend, StoreError};
use crate::domain::{
    Collection, CollectionRef, DownloadRecord, DownloadRequest, DownloadStatus, FetchOutcome,
    FetchedMedia, FormatOption, RecordId, Settings, NO_ENTRIES,
};

#[derive(Debug, Clone)]
struct CollectionRow {
    id: RecordId,
    extractor: String,
    online_id: String,
    title: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    next_video_id: RecordId,
    next_collection_id: RecordId,
    videos: BTreeMap<RecordId, DownloadRecord>,
    collections: BTreeMap<RecordId, CollectionRow>,

    /// Session owning each queued record
    owners: HashMap<RecordId, String>,

    settings: Settings,
    format_options: Vec<FormatOption>,
}

impl State {
    fn collection_by_key(&self, extractor: &str, online_id: &str) -> Option<&CollectionRow> {
        self.collections
            .values()
            .find(|c| c.extractor == extractor && c.online_id == online_id)
    }

    fn video_id_by_key(&self, extractor: &str, online_id: &str) -> Option<RecordId> {
        self.videos
            .values()
            .find(|v| v.extractor_key() == Some((extractor, online_id)))
            .map(|v| v.id)
    }

    fn with_members(&self, row: &CollectionRow) -> Collection {
        let mut videos: Vec<DownloadRecord> = self
            .videos
            .values()
            .filter(|v| v.collection_id == Some(row.id))
            .cloned()
            .collect();
        sort_newest_first(&mut videos);

        Collection {
            id: row.id,
            extractor: row.extractor.clone(),
            online_id: row.online_id.clone(),
            title: row.title.clone(),
            created_at: row.created_at,
            videos,
        }
    }

    /// Insert the collection on first sight, refresh its title afterwards
    fn upsert_collection(
        &mut self,
        extractor: &str,
        collection: &CollectionRef,
        now: DateTime<Utc>,
    ) -> RecordId {
        let existing = self
            .collection_by_key(extractor, &collection.online_id)
            .map(|c| c.id);

        match existing {
            Some(existing) => {
                if let (Some(row), Some(title)) =
                    (self.collections.get_mut(&existing), &collection.title)
                {
                    row.title = Some(title.clone());
                }
                existing
            }
            None => {
                let id = self.next_collection_id;
                self.next_collection_id += 1;
                self.collections.insert(
                    id,
                    CollectionRow {
                        id,
                        extractor: extractor.to_string(),
                        online_id: collection.online_id.clone(),
                        title: collection.title.clone(),
                        created_at: now,
                    },
                );
                id
            }
        }
    }

    fn fail(&mut self, id: RecordId, message: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let record = self.videos.get_mut(&id).ok_or(StoreError::UnknownRecord(id))?;
        record.status = DownloadStatus::Failed;
        record.error = Some(message.to_string());
        record.filepath = None;
        record.updated_at = now;
        self.owners.remove(&id);
        Ok(())
    }

    /// Write every entry; the first one resolves the placeholder `id`
    fn resolve_entries(
        &mut self,
        id: RecordId,
        request: &DownloadRequest,
        entries: &[FetchedMedia],
        now: DateTime<Utc>,
    ) -> Result<RecordId, StoreError> {
        let mut resolved = id;

        for (index, media) in entries.iter().enumerate() {
            let collection_id = media
                .collection
                .as_ref()
                .map(|collection| self.upsert_collection(&media.extractor, collection, now));

            let existing = self.video_id_by_key(&media.extractor, &media.online_id);
            let url = match index {
                0 => request.url.clone(),
                _ => media.url.clone().unwrap_or_else(|| request.url.clone()),
            };

            let target = match (index, existing) {
                (0, Some(existing)) => {
                    self.videos.remove(&id);
                    existing
                }
                (0, None) => id,
                (_, Some(existing)) => existing,
                (_, None) => {
                    let new_id = self.next_video_id;
                    self.next_video_id += 1;
                    self.videos.insert(
                        new_id,
                        DownloadRecord {
                            id: new_id,
                            extractor: None,
                            online_id: None,
                            url: url.clone(),
                            format: None,
                            status: DownloadStatus::Queued,
                            title: None,
                            filepath: None,
                            error: None,
                            collection_id: None,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    new_id
                }
            };

            let record = self
                .videos
                .get_mut(&target)
                .ok_or(StoreError::UnknownRecord(target))?;
            record.extractor = Some(media.extractor.clone());
            record.online_id = Some(media.online_id.clone());
            record.url = url;
            record.format = request.format.clone();
            record.status = DownloadStatus::Succeeded;
            record.title = Some(media.title.clone());
            record.filepath = Some(media.filepath.clone());
            record.error = None;
            record.collection_id = collection_id;
            record.updated_at = now;

            if index == 0 {
                self.owners.remove(&id);
                resolved = target;
            }
        }

        Ok(resolved)
    }

    fn with_status(&self, status: DownloadStatus) -> Vec<DownloadRecord> {
        self.videos
            .values()
            .filter(|v| v.status == status)
            .cloned()
            .collect()
    }
}

fn sort_newest_first(records: &mut [DownloadRecord]) {
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
}

/// Volatile catalog
pub struct MemoryStore {
    state: RwLock<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty catalog with default settings and format options
    pub fn new() -> Self {
        let format_options = schema::DEFAULT_FORMAT_OPTIONS
            .iter()
            .enumerate()
            .map(|(position, (id, label, selector))| FormatOption {
                id: *id,
                label: label.to_string(),
                selector: selector.to_string(),
                position: position as i64 + 1,
            })
            .collect();

        Self {
            state: RwLock::new(State {
                next_video_id: 1,
                next_collection_id: 1,
                format_options,
                ..Default::default()
            }),
        }
    }

    /// Create a catalog seeded with specific settings
    pub fn with_settings(settings: Settings) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.write() {
            state.settings = settings;
        }
        store
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

impl CatalogStore for MemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    fn enqueue(
        &self,
        request: &DownloadRequest,
        owner: Option<&str>,
    ) -> Result<DownloadRecord, StoreError> {
        let mut state = self.write()?;
        let id = state.next_video_id;
        state.next_video_id += 1;

        let now = Utc::now();
        let record = DownloadRecord {
            id,
            extractor: None,
            online_id: None,
            url: request.url.clone(),
            format: request.format.clone(),
            status: DownloadStatus::Queued,
            title: None,
            filepath: None,
            error: None,
            collection_id: None,
            created_at: now,
            updated_at: now,
        };
        state.videos.insert(id, record.clone());
        if let Some(owner) = owner {
            state.owners.insert(id, owner.to_string());
        }

        Ok(record)
    }

    fn record_attempt(
        &self,
        id: RecordId,
        request: &DownloadRequest,
        outcome: &FetchOutcome,
    ) -> Result<DownloadRecord, StoreError> {
        let mut state = self.write()?;
        let now = Utc::now();

        let status = state
            .videos
            .get(&id)
            .map(|v| v.status)
            .ok_or(StoreError::UnknownRecord(id))?;
        if status.is_terminal() {
            return Err(StoreError::NotQueued { id, status });
        }

        let target = match outcome {
            FetchOutcome::Success { entries } if !entries.is_empty() => {
                state.resolve_entries(id, request, entries, now)?
            }
            FetchOutcome::Success { .. } => {
                state.fail(id, NO_ENTRIES, now)?;
                id
            }
            FetchOutcome::Failure { message } => {
                state.fail(id, message, now)?;
                id
            }
        };

        state
            .videos
            .get(&target)
            .cloned()
            .ok_or(StoreError::UnknownRecord(target))
    }

    fn abandon_queued(&self, owners: &[String], reason: &str) -> Result<usize, StoreError> {
        let mut state = self.write()?;
        let now = Utc::now();

        let abandoned: Vec<RecordId> = state
            .videos
            .values()
            .filter(|record| record.status == DownloadStatus::Queued)
            .filter(|record| match state.owners.get(&record.id) {
                Some(owner) => owners.contains(owner),
                None => true,
            })
            .map(|record| record.id)
            .collect();

        for id in &abandoned {
            state.fail(*id, reason, now)?;
        }

        Ok(abandoned.len())
    }

    fn get_queued(&self) -> Result<Vec<DownloadRecord>, StoreError> {
        // BTreeMap iteration is id order, which is submission order
        Ok(self.read()?.with_status(DownloadStatus::Queued))
    }

    fn get_recent(&self, limit: usize) -> Result<Vec<DownloadRecord>, StoreError> {
        let mut recent = self.read()?.with_status(DownloadStatus::Succeeded);
        sort_newest_first(&mut recent);
        recent.truncate(limit);
        Ok(recent)
    }

    fn get_failed(&self) -> Result<Vec<DownloadRecord>, StoreError> {
        let mut failed = self.read()?.with_status(DownloadStatus::Failed);
        sort_newest_first(&mut failed);
        Ok(failed)
    }

    fn get_video(&self, id: RecordId) -> Result<Option<DownloadRecord>, StoreError> {
        Ok(self.read()?.videos.get(&id).cloned())
    }

    fn get_video_by_extractor_id(
        &self,
        extractor: &str,
        online_id: &str,
    ) -> Result<Option<DownloadRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .video_id_by_key(extractor, online_id)
            .and_then(|id| state.videos.get(&id).cloned()))
    }

    fn get_collection(&self, id: RecordId) -> Result<Option<Collection>, StoreError> {
        let state = self.read()?;
        Ok(state.collections.get(&id).map(|row| state.with_members(row)))
    }

    fn get_collection_by_extractor_id(
        &self,
        extractor: &str,
        online_id: &str,
    ) -> Result<Option<Collection>, StoreError> {
        let state = self.read()?;
        Ok(state
            .collection_by_key(extractor, online_id)
            .map(|row| state.with_members(row)))
    }

    fn get_settings(&self) -> Result<Settings, StoreError> {
        Ok(self.read()?.settings.clone())
    }

    fn get_format_options(&self) -> Result<Vec<FormatOption>, StoreError> {
        let mut options = self.read()?.format_options.clone();
        options.sort_by_key(|o| (o.position, o.id));
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(online_id: &str) -> FetchedMedia {
        FetchedMedia {
            filepath: format!("/downloads/{}.webm", online_id),
            extractor: "ex".to_string(),
            online_id: online_id.to_string(),
            title: online_id.to_uppercase(),
            url: None,
            collection: Some(CollectionRef {
                online_id: "chan".to_string(),
                title: None,
            }),
        }
    }

    fn success(online_id: &str) -> FetchOutcome {
        FetchOutcome::success(entry(online_id))
    }

    #[test]
    fn test_queued_in_submission_order() {
        let store = MemoryStore::new();
        let a = store.enqueue(&DownloadRequest::url("https://example.com/a"), None).unwrap();
        let b = store.enqueue(&DownloadRequest::url("https://example.com/b"), None).unwrap();

        let ids: Vec<_> = store.get_queued().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_upsert_keeps_one_record_per_key() {
        let store = MemoryStore::new();
        let request = DownloadRequest::url("https://example.com/x");
        let first = store.enqueue(&request, None).unwrap();
        let second = store.enqueue(&request, None).unwrap();

        store.record_attempt(first.id, &request, &success("x")).unwrap();
        let merged = store.record_attempt(second.id, &request, &success("x")).unwrap();

        assert_eq!(merged.id, first.id);
        assert_eq!(store.get_recent(10).unwrap().len(), 1);
        assert!(store.get_video(second.id).unwrap().is_none());
    }

    #[test]
    fn test_collection_members_and_lookup() {
        let store = MemoryStore::new();
        for id in ["p", "q"] {
            let request = DownloadRequest::url(format!("https://example.com/{}", id));
            let queued = store.enqueue(&request, None).unwrap();
            store.record_attempt(queued.id, &request, &success(id)).unwrap();
        }

        let collection = store.get_collection_by_extractor_id("ex", "chan").unwrap().unwrap();
        assert_eq!(collection.videos.len(), 2);
        assert!(store.get_collection(collection.id + 100).unwrap().is_none());
    }

    #[test]
    fn test_unknown_record_is_an_error_not_a_lookup_miss() {
        let store = MemoryStore::new();
        let request = DownloadRequest::url("https://example.com/a");

        assert!(store.get_video(99).unwrap().is_none());
        assert!(matches!(
            store.record_attempt(99, &request, &FetchOutcome::failure("x")),
            Err(StoreError::UnknownRecord(99))
        ));
    }

    #[test]
    fn test_playlist_entry_overwrites_earlier_download() {
        let store = MemoryStore::new();
        let single = DownloadRequest::url("https://example.com/q");
        let queued = store.enqueue(&single, None).unwrap();
        let earlier = store.record_attempt(queued.id, &single, &success("q")).unwrap();

        let playlist = DownloadRequest::url("https://example.com/chan");
        let queued = store.enqueue(&playlist, None).unwrap();
        let outcome = FetchOutcome::from_entries(vec![entry("p"), entry("q")]);
        let first = store.record_attempt(queued.id, &playlist, &outcome).unwrap();

        assert_eq!(first.online_id.as_deref(), Some("p"));
        assert_eq!(store.get_recent(10).unwrap().len(), 2);
        let q = store.get_video_by_extractor_id("ex", "q").unwrap().unwrap();
        assert_eq!(q.id, earlier.id);
        assert_eq!(q.url, "https://example.com/chan");
    }

    #[test]
    fn test_abandon_leaves_live_owners_alone() {
        let store = MemoryStore::new();
        let mine = store
            .enqueue(&DownloadRequest::url("https://example.com/a"), Some("live"))
            .unwrap();
        let legacy = store.enqueue(&DownloadRequest::url("https://example.com/b"), None).unwrap();

        assert_eq!(store.abandon_queued(&[], "gone").unwrap(), 1);
        assert_eq!(store.get_video(mine.id).unwrap().unwrap().status, DownloadStatus::Queued);
        assert_eq!(store.get_video(legacy.id).unwrap().unwrap().status, DownloadStatus::Failed);
    }

    #[test]
    fn test_with_settings() {
        let settings = Settings {
            default_format: "worst".to_string(),
            ..Default::default()
        };
        let store = MemoryStore::with_settings(settings.clone());
        assert_eq!(store.get_settings().unwrap(), settings);
    }
}

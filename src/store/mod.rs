//! Catalog storage: collections, download records and settings.
//!
//! The rest of the crate only sees the [`CatalogStore`] trait; the engine is
//! picked at startup through [`StoreBackend`].
//!
//! # Record lifecycle
//!
//! ```text
//! enqueue ──► queued ──record_attempt──► succeeded | failed
//! ```
//!
//! Queued records carry the id of the [`Session`] that enqueued them, so a
//! process only ever reclaims rows whose owner has exited.
//!
//! A queued record has no extractor key yet. When a success resolves to an
//! (extractor, online id) pair that another record already owns, that record
//! is overwritten and the queued placeholder is dropped, so the pair stays
//! unique.

pub mod memory;
pub mod schema;
pub mod session;
pub mod sqlite;

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    Collection, DownloadRecord, DownloadRequest, DownloadStatus, FetchOutcome, FormatOption,
    RecordId, Settings, SettingsOverrides,
};

pub use memory::MemoryStore;
pub use session::Session;
pub use sqlite::SqliteStore;

/// Errors from the storage layer.
///
/// Lookups that match nothing are `Ok(None)`, never an error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No download record with id {0}")]
    UnknownRecord(RecordId),

    #[error("Download record {id} is already {status}")]
    NotQueued { id: RecordId, status: DownloadStatus },

    #[error("Catalog schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("Catalog lock poisoned")]
    Poisoned,

    #[error("Catalog task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Storage engines selectable at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite file (durable)
    #[default]
    Sqlite,

    /// Process memory (lost on exit; useful for tests and dry runs)
    Memory,
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(StoreError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Persistence operations the dispatcher and query surface depend on.
///
/// Implementations serialize writes; readers never observe a half-written
/// record.
pub trait CatalogStore: Send + Sync {
    /// Engine behind this store
    fn backend(&self) -> StoreBackend;

    /// Create a queued record for an accepted request, owned by `owner`
    /// (a session id) when given
    fn enqueue(
        &self,
        request: &DownloadRequest,
        owner: Option<&str>,
    ) -> Result<DownloadRecord, StoreError>;

    /// Resolve a queued record with the outcome of its attempt.
    ///
    /// Returns the record now holding the result, whose id differs from `id`
    /// when the outcome was merged into an existing record with the same
    /// extractor key. Extra playlist entries are upserted by their own key.
    fn record_attempt(
        &self,
        id: RecordId,
        request: &DownloadRequest,
        outcome: &FetchOutcome,
    ) -> Result<DownloadRecord, StoreError>;

    /// Fail queued records owned by one of `owners` or by no one.
    ///
    /// Callers pass only owners known to have exited; rows of live sessions
    /// are never touched.
    fn abandon_queued(&self, owners: &[String], reason: &str) -> Result<usize, StoreError>;

    /// Unresolved records in submission order
    fn get_queued(&self) -> Result<Vec<DownloadRecord>, StoreError>;

    /// Most recent successful downloads, newest first
    fn get_recent(&self, limit: usize) -> Result<Vec<DownloadRecord>, StoreError>;

    /// Failed downloads, newest first
    fn get_failed(&self) -> Result<Vec<DownloadRecord>, StoreError>;

    fn get_video(&self, id: RecordId) -> Result<Option<DownloadRecord>, StoreError>;

    fn get_video_by_extractor_id(
        &self,
        extractor: &str,
        online_id: &str,
    ) -> Result<Option<DownloadRecord>, StoreError>;

    fn get_collection(&self, id: RecordId) -> Result<Option<Collection>, StoreError>;

    fn get_collection_by_extractor_id(
        &self,
        extractor: &str,
        online_id: &str,
    ) -> Result<Option<Collection>, StoreError>;

    /// Persisted settings (environment overrides are applied by the caller)
    fn get_settings(&self) -> Result<Settings, StoreError>;

    fn get_format_options(&self) -> Result<Vec<FormatOption>, StoreError>;
}

/// Open the configured backend
pub fn open_store(
    backend: StoreBackend,
    database: &Path,
) -> Result<Arc<dyn CatalogStore>, StoreError> {
    let store: Arc<dyn CatalogStore> = match backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(database)?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    tracing::info!(backend = %backend, "Catalog store opened");
    Ok(store)
}

/// Persisted settings with environment overrides applied.
///
/// Also returns the keys whose values came from the environment.
pub fn effective_settings(
    store: &dyn CatalogStore,
    overrides: &SettingsOverrides,
) -> Result<(Settings, BTreeSet<String>), StoreError> {
    let mut settings = store.get_settings()?;
    let overridden = overrides.apply(&mut settings);
    Ok((settings, overridden))
}

/// Run a catalog call on the blocking pool
pub async fn blocking<T, F>(store: &Arc<dyn CatalogStore>, call: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn CatalogStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref())).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("sqlite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
        assert_eq!(" Memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!(matches!(
            "postgres".parse::<StoreBackend>(),
            Err(StoreError::UnknownBackend(name)) if name == "postgres"
        ));
    }

    #[test]
    fn test_effective_settings_reports_overrides() {
        let store = MemoryStore::new();
        let overrides = SettingsOverrides::default().with("default_format", "bestaudio");

        let (settings, overridden) = effective_settings(&store, &overrides).unwrap();
        assert_eq!(settings.default_format, "bestaudio");
        assert!(overridden.contains("default_format"));
        assert_eq!(store.get_settings().unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn test_blocking_runs_catalog_calls() {
        let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
        let request = DownloadRequest::url("https://example.com/v1");

        let queued = blocking(&store, move |s| s.enqueue(&request, Some("owner")))
            .await
            .unwrap();
        assert_eq!(queued.status, DownloadStatus::Queued);
        assert_eq!(store.get_queued().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_backend_opens_without_touching_disk() {
        let store = open_store(StoreBackend::Memory, Path::new("/nonexistent/db.sqlite3")).unwrap();
        assert_eq!(store.backend(), StoreBackend::Memory);
    }
}

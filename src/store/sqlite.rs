//! SQLite catalog backend.
//!
//! A single connection behind a mutex: every operation, read or write, runs
//! to completion before the next one starts, and every write is one
//! transaction.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::instrument;

use super::{schema, CatalogStore, StoreBackend, StoreError};
use crate::domain::{
    Collection, CollectionRef, DownloadRecord, DownloadRequest, DownloadStatus, FetchOutcome,
    FetchedMedia, FormatOption, RecordId, Settings, NO_ENTRIES,
};

const VIDEO_COLUMNS: &str = "id, extractor, online_id, url, format, status, title, filepath, \
                             error, collection_id, created_at, updated_at";

/// SQLite-backed catalog
pub struct SqliteStore {
    conn: Mutex<Connection>,

    /// Database file (None for in-memory databases)
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a catalog file and migrate it
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL lets readers in other processes (e.g. a second CLI) proceed during writes
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "Opened catalog database");

        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory catalog
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(mut conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        schema::migrate(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Fixed-width UTC timestamps sort lexically in time order
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn parse_timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, format!("bad timestamp {:?}: {}", raw, e)))
}

fn video_from_row(row: &Row<'_>) -> rusqlite::Result<DownloadRecord> {
    let status: String = row.get(5)?;
    let status = DownloadStatus::parse(&status)
        .ok_or_else(|| conversion_error(5, format!("unknown status {:?}", status)))?;

    Ok(DownloadRecord {
        id: row.get(0)?,
        extractor: row.get(1)?,
        online_id: row.get(2)?,
        url: row.get(3)?,
        format: row.get(4)?,
        status,
        title: row.get(6)?,
        filepath: row.get(7)?,
        error: row.get(8)?,
        collection_id: row.get(9)?,
        created_at: parse_timestamp(row, 10)?,
        updated_at: parse_timestamp(row, 11)?,
    })
}

fn query_videos(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<DownloadRecord>, StoreError> {
    let sql = format!("SELECT {} FROM videos {}", VIDEO_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, video_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn query_video(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<DownloadRecord>, StoreError> {
    let sql = format!("SELECT {} FROM videos {}", VIDEO_COLUMNS, filter);
    Ok(conn.query_row(&sql, params, video_from_row).optional()?)
}

fn load_collection(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Collection>, StoreError> {
    let sql = format!(
        "SELECT id, extractor, online_id, title, created_at FROM collections {}",
        filter
    );
    let collection = conn
        .query_row(&sql, params, |row| {
            Ok(Collection {
                id: row.get(0)?,
                extractor: row.get(1)?,
                online_id: row.get(2)?,
                title: row.get(3)?,
                created_at: parse_timestamp(row, 4)?,
                videos: Vec::new(),
            })
        })
        .optional()?;

    match collection {
        Some(mut collection) => {
            collection.videos = query_videos(
                conn,
                "WHERE collection_id = ?1 ORDER BY updated_at DESC, id DESC",
                params![collection.id],
            )?;
            Ok(Some(collection))
        }
        None => Ok(None),
    }
}

/// Insert the collection on first sight, refresh its title afterwards
fn upsert_collection(
    tx: &Transaction<'_>,
    extractor: &str,
    collection: &CollectionRef,
    at: DateTime<Utc>,
) -> Result<RecordId, StoreError> {
    tx.execute(
        "INSERT INTO collections (extractor, online_id, title, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (extractor, online_id)
         DO UPDATE SET title = COALESCE(excluded.title, collections.title)",
        params![extractor, collection.online_id, collection.title, timestamp(at)],
    )?;

    Ok(tx.query_row(
        "SELECT id FROM collections WHERE extractor = ?1 AND online_id = ?2",
        params![extractor, collection.online_id],
        |row| row.get(0),
    )?)
}

fn fail_record(
    tx: &Transaction<'_>,
    id: RecordId,
    message: &str,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE videos
         SET status = 'failed', error = ?2, filepath = NULL, owner = NULL, updated_at = ?3
         WHERE id = ?1",
        params![id, message, timestamp(at)],
    )?;
    Ok(())
}

/// Write every entry; the first one resolves the placeholder `id`.
///
/// Returns the record holding the first entry.
fn resolve_entries(
    tx: &Transaction<'_>,
    id: RecordId,
    request: &DownloadRequest,
    entries: &[FetchedMedia],
    at: DateTime<Utc>,
) -> Result<RecordId, StoreError> {
    let mut resolved = id;

    for (index, media) in entries.iter().enumerate() {
        let collection_id = media
            .collection
            .as_ref()
            .map(|collection| upsert_collection(tx, &media.extractor, collection, at))
            .transpose()?;

        // The placeholder's key is still NULL, so it never matches here
        let existing: Option<RecordId> = tx
            .query_row(
                "SELECT id FROM videos WHERE extractor = ?1 AND online_id = ?2",
                params![media.extractor, media.online_id],
                |row| row.get(0),
            )
            .optional()?;

        let url = match index {
            0 => request.url.as_str(),
            _ => media.url.as_deref().unwrap_or(&request.url),
        };

        let target = match (index, existing) {
            (0, Some(existing)) => {
                tx.execute("DELETE FROM videos WHERE id = ?1", params![id])?;
                existing
            }
            (0, None) => id,
            (_, Some(existing)) => existing,
            (_, None) => {
                tx.execute(
                    "INSERT INTO videos (extractor, online_id, url, format, status, title,
                                         filepath, collection_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'succeeded', ?5, ?6, ?7, ?8, ?8)",
                    params![
                        media.extractor,
                        media.online_id,
                        url,
                        request.format,
                        media.title,
                        media.filepath,
                        collection_id,
                        timestamp(at),
                    ],
                )?;
                continue;
            }
        };

        tx.execute(
            "UPDATE videos
             SET extractor = ?2, online_id = ?3, url = ?4, format = ?5,
                 status = 'succeeded', title = ?6, filepath = ?7, error = NULL,
                 collection_id = ?8, owner = NULL, updated_at = ?9
             WHERE id = ?1",
            params![
                target,
                media.extractor,
                media.online_id,
                url,
                request.format,
                media.title,
                media.filepath,
                collection_id,
                timestamp(at),
            ],
        )?;

        if index == 0 {
            resolved = target;
        }
    }

    Ok(resolved)
}

impl CatalogStore for SqliteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    #[instrument(level = "debug", skip_all, fields(url = %request.url))]
    fn enqueue(
        &self,
        request: &DownloadRequest,
        owner: Option<&str>,
    ) -> Result<DownloadRecord, StoreError> {
        let conn = self.lock()?;
        let at = timestamp(now());

        conn.execute(
            "INSERT INTO videos (url, format, status, owner, created_at, updated_at)
             VALUES (?1, ?2, 'queued', ?3, ?4, ?4)",
            params![request.url, request.format, owner, at],
        )?;
        let id = conn.last_insert_rowid();

        query_video(&conn, "WHERE id = ?1", params![id])?.ok_or(StoreError::UnknownRecord(id))
    }

    #[instrument(level = "debug", skip(self, request, outcome), fields(status = %outcome.status()))]
    fn record_attempt(
        &self,
        id: RecordId,
        request: &DownloadRequest,
        outcome: &FetchOutcome,
    ) -> Result<DownloadRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let at = now();

        let status: String = tx
            .query_row("SELECT status FROM videos WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(StoreError::UnknownRecord(id))?;
        let status = DownloadStatus::parse(&status)
            .ok_or_else(|| StoreError::Sqlite(conversion_error(0, status.clone())))?;
        if status.is_terminal() {
            return Err(StoreError::NotQueued { id, status });
        }

        let target = match outcome {
            FetchOutcome::Success { entries } if !entries.is_empty() => {
                resolve_entries(&tx, id, request, entries, at)?
            }
            FetchOutcome::Success { .. } => {
                fail_record(&tx, id, NO_ENTRIES, at)?;
                id
            }
            FetchOutcome::Failure { message } => {
                fail_record(&tx, id, message, at)?;
                id
            }
        };

        let record = query_video(&tx, "WHERE id = ?1", params![target])?
            .ok_or(StoreError::UnknownRecord(target))?;
        tx.commit()?;

        Ok(record)
    }

    fn abandon_queued(&self, owners: &[String], reason: &str) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let at = timestamp(now());

        let mut changed = tx.execute(
            "UPDATE videos SET status = 'failed', error = ?1, updated_at = ?2
             WHERE status = 'queued' AND owner IS NULL",
            params![reason, at],
        )?;
        for owner in owners {
            changed += tx.execute(
                "UPDATE videos SET status = 'failed', error = ?1, owner = NULL, updated_at = ?2
                 WHERE status = 'queued' AND owner = ?3",
                params![reason, at, owner],
            )?;
        }

        tx.commit()?;
        Ok(changed)
    }

    fn get_queued(&self) -> Result<Vec<DownloadRecord>, StoreError> {
        let conn = self.lock()?;
        query_videos(&conn, "WHERE status = 'queued' ORDER BY id ASC", [])
    }

    fn get_recent(&self, limit: usize) -> Result<Vec<DownloadRecord>, StoreError> {
        let conn = self.lock()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        query_videos(
            &conn,
            "WHERE status = 'succeeded' ORDER BY updated_at DESC, id DESC LIMIT ?1",
            params![limit],
        )
    }

    fn get_failed(&self) -> Result<Vec<DownloadRecord>, StoreError> {
        let conn = self.lock()?;
        query_videos(
            &conn,
            "WHERE status = 'failed' ORDER BY updated_at DESC, id DESC",
            [],
        )
    }

    fn get_video(&self, id: RecordId) -> Result<Option<DownloadRecord>, StoreError> {
        let conn = self.lock()?;
        query_video(&conn, "WHERE id = ?1", params![id])
    }

    fn get_video_by_extractor_id(
        &self,
        extractor: &str,
        online_id: &str,
    ) -> Result<Option<DownloadRecord>, StoreError> {
        let conn = self.lock()?;
        query_video(
            &conn,
            "WHERE extractor = ?1 AND online_id = ?2",
            params![extractor, online_id],
        )
    }

    fn get_collection(&self, id: RecordId) -> Result<Option<Collection>, StoreError> {
        let conn = self.lock()?;
        load_collection(&conn, "WHERE id = ?1", params![id])
    }

    fn get_collection_by_extractor_id(
        &self,
        extractor: &str,
        online_id: &str,
    ) -> Result<Option<Collection>, StoreError> {
        let conn = self.lock()?;
        load_collection(
            &conn,
            "WHERE extractor = ?1 AND online_id = ?2",
            params![extractor, online_id],
        )
    }

    fn get_settings(&self) -> Result<Settings, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Settings::from_pairs(pairs))
    }

    fn get_format_options(&self) -> Result<Vec<FormatOption>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, label, selector, position FROM format_options ORDER BY position, id",
        )?;
        let options = stmt
            .query_map([], |row| {
                Ok(FormatOption {
                    id: row.get(0)?,
                    label: row.get(1)?,
                    selector: row.get(2)?,
                    position: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(options)
    }
}

//! SQLite schema migrations and default rows.
//!
//! Versions are tracked with `PRAGMA user_version`. Each migration runs once,
//! inside the same immediate transaction that bumps the version.

use std::time::Duration;

use rusqlite::{params, Connection};

use super::StoreError;
use crate::domain::Settings;

/// Ordered migrations; index + 1 is the schema version it produces
const MIGRATIONS: &[&str] = &[
    // v1: catalog tables
    r#"
    CREATE TABLE collections (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        extractor   TEXT NOT NULL,
        online_id   TEXT NOT NULL,
        title       TEXT,
        created_at  TEXT NOT NULL,
        UNIQUE (extractor, online_id)
    );

    CREATE TABLE videos (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        extractor      TEXT,
        online_id      TEXT,
        url            TEXT NOT NULL,
        format         TEXT,
        status         TEXT NOT NULL CHECK (status IN ('queued', 'succeeded', 'failed')),
        title          TEXT,
        filepath       TEXT,
        error          TEXT,
        collection_id  INTEGER REFERENCES collections(id),
        created_at     TEXT NOT NULL,
        updated_at     TEXT NOT NULL,
        UNIQUE (extractor, online_id),
        CHECK ((status = 'succeeded') = (filepath IS NOT NULL))
    );

    CREATE INDEX idx_videos_status_updated ON videos (status, updated_at);
    CREATE INDEX idx_videos_collection ON videos (collection_id);

    CREATE TABLE settings (
        key    TEXT PRIMARY KEY,
        value  TEXT NOT NULL
    );

    CREATE TABLE format_options (
        id        INTEGER PRIMARY KEY,
        label     TEXT NOT NULL,
        selector  TEXT NOT NULL
    );
    "#,
    // v2: session ownership of queued rows, explicit format option order
    r#"
    ALTER TABLE videos ADD COLUMN owner TEXT;
    CREATE INDEX idx_videos_queued_owner ON videos (owner) WHERE status = 'queued';

    ALTER TABLE format_options ADD COLUMN position INTEGER NOT NULL DEFAULT 0;
    UPDATE format_options SET position = id;
    "#,
];

/// Format options offered on a fresh catalog: (id, label, selector), in
/// display order
pub const DEFAULT_FORMAT_OPTIONS: &[(i64, &str, &str)] = &[
    (1, "Best video + audio", "bestvideo+bestaudio/best"),
    (2, "Best single file", "best"),
    (3, "Audio only", "bestaudio/best"),
    (
        4,
        "MP4 up to 1080p",
        "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[height<=1080]",
    ),
    (5, "Smallest file", "worst"),
];

/// Highest schema version this build understands
pub fn latest_version() -> i64 {
    MIGRATIONS.len() as i64
}

/// Read the schema version of an open database
pub fn current_version(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the schema up to date and seed default rows
pub fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    conn.busy_timeout(Duration::from_secs(30))?;

    let found = current_version(conn)?;
    let supported = latest_version();
    if found > supported {
        return Err(StoreError::SchemaTooNew { found, supported });
    }

    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let version = index as i64 + 1;
        tracing::debug!(version, "Applying catalog migration");
        tx.execute_batch(sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", version))?;
    }

    seed_defaults(&tx)?;
    tx.commit()?;

    if found < supported {
        tracing::info!(from = found, to = supported, "Catalog schema migrated");
    }

    Ok(())
}

/// Insert default settings and format options that are not present yet
fn seed_defaults(conn: &Connection) -> Result<(), StoreError> {
    let mut insert_setting =
        conn.prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;
    for (key, value) in Settings::default().to_pairs() {
        insert_setting.execute(params![key, value])?;
    }

    let options: i64 = conn.query_row("SELECT COUNT(*) FROM format_options", [], |row| row.get(0))?;
    if options == 0 {
        let mut insert_option = conn.prepare(
            "INSERT INTO format_options (id, label, selector, position) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (position, (id, label, selector)) in DEFAULT_FORMAT_OPTIONS.iter().enumerate() {
            insert_option.execute(params![id, label, selector, position as i64 + 1])?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_fresh_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        assert_eq!(current_version(&conn).unwrap(), latest_version());

        let settings: i64 = conn
            .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(settings as usize, Settings::default().to_pairs().len());
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let options: i64 = conn
            .query_row("SELECT COUNT(*) FROM format_options", [], |row| row.get(0))
            .unwrap();
        assert_eq!(options as usize, DEFAULT_FORMAT_OPTIONS.len());
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA user_version = 99").unwrap();

        let result = migrate(&mut conn);
        assert!(matches!(result, Err(StoreError::SchemaTooNew { found: 99, .. })));
    }

    #[test]
    fn test_v1_catalog_upgrades_in_place() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute_batch("PRAGMA user_version = 1").unwrap();
        conn.execute(
            "INSERT INTO videos (url, status, created_at, updated_at)
             VALUES ('https://example.com/old', 'queued', 'now', 'now')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO format_options (id, label, selector) VALUES (7, 'Old', 'worst')",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();

        assert_eq!(current_version(&conn).unwrap(), 2);
        let owner: Option<String> = conn
            .query_row("SELECT owner FROM videos", [], |row| row.get(0))
            .unwrap();
        assert_eq!(owner, None);
        let position: i64 = conn
            .query_row("SELECT position FROM format_options WHERE id = 7", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(position, 7);
    }

    #[test]
    fn test_seeding_keeps_edited_settings() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "UPDATE settings SET value = 'worst' WHERE key = 'default_format'",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();

        let value: String = conn
            .query_row(
                "SELECT value FROM settings WHERE key = 'default_format'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value, "worst");
    }
}

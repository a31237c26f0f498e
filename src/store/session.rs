//! Process sessions over a shared catalog file.
//!
//! Each process that submits downloads holds an exclusive `fs2` lock on
//! `<dir>/<uuid>.lock` for as long as it runs and tags its queued rows with
//! that uuid. The OS drops the lock when the process dies, so a lock file
//! that can be locked by someone else belongs to a process that is gone, and
//! only its rows are reclaimed.
//!
//! ```text
//! <uuid>.tmp ──lock──► rename ──► <uuid>.lock   (visible only once locked)
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CatalogStore, StoreError};

const LOCK_EXTENSION: &str = "lock";

/// A live session: the lock is held until drop
#[derive(Debug)]
pub struct Session {
    id: String,
    dir: PathBuf,
    path: PathBuf,
    file: File,
}

/// Lock file of an exited session, locked by us while its rows are reclaimed
struct Stale {
    id: String,
    path: PathBuf,
    file: File,
}

impl Session {
    /// Register a new session under `dir`
    pub fn acquire(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;

        let id = Uuid::new_v4().to_string();
        let staging = dir.join(format!("{}.tmp", id));
        let path = dir.join(format!("{}.{}", id, LOCK_EXTENSION));

        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&staging)?;
        file.try_lock_exclusive()?;
        fs::rename(&staging, &path)?;

        debug!(session = %id, "Session lock acquired");
        Ok(Self {
            id,
            dir: dir.to_path_buf(),
            path,
            file,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lock files whose owner has exited (everything we can lock, minus us)
    fn stale_peers(&self) -> Result<Vec<Stale>, StoreError> {
        let mut stale = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if id == self.id || Uuid::parse_str(&id).is_err() {
                continue;
            }

            let file = match OpenOptions::new().write(true).open(&path) {
                Ok(file) => file,
                // Removed by a concurrent reclaim
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if file.try_lock_exclusive().is_ok() {
                stale.push(Stale { id, path, file });
            }
        }

        Ok(stale)
    }

    /// Fail queued rows left by exited sessions (and legacy unowned rows).
    ///
    /// Rows are failed before the stale lock files are removed, so a crash
    /// in between leaves the file for the next reclaim.
    pub fn reclaim_stale(&self, store: &dyn CatalogStore, reason: &str) -> Result<usize, StoreError> {
        let stale = self.stale_peers()?;
        let owners: Vec<String> = stale.iter().map(|s| s.id.clone()).collect();

        let abandoned = store.abandon_queued(&owners, reason)?;

        for session in stale {
            if let Err(e) = fs::remove_file(&session.path) {
                warn!(session = %session.id, "Failed to remove stale session lock: {}", e);
            }
            let _ = session.file.unlock();
        }

        Ok(abandoned)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(session = %self.id, "Failed to remove session lock: {}", e);
        }
        let _ = self.file.unlock();
    }
}

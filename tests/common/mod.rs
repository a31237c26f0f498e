//! Scripted extractor and catalog backends shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use ytdlq::domain::{CollectionRef, FetchOptions, FetchedMedia};
use ytdlq::store::{MemoryStore, SqliteStore};
use ytdlq::{CatalogStore, Extractor, FetchOutcome};

/// One store per backend; the SQLite file lives under `dir`
pub fn backends(dir: &Path) -> Vec<Arc<dyn CatalogStore>> {
    vec![
        Arc::new(MemoryStore::new()),
        Arc::new(SqliteStore::open(&dir.join("catalog.sqlite3")).unwrap()),
    ]
}

/// What a scripted fetch does
#[derive(Clone)]
pub enum Script {
    /// Succeed with this (extractor, online id)
    Succeed { extractor: String, online_id: String },
    /// Succeed as a playlist entry
    SucceedInCollection {
        online_id: String,
        collection: String,
    },
    /// Succeed with every entry of a playlist
    Playlist {
        collection: String,
        online_ids: Vec<String>,
    },
    Fail(String),
    Panic,
    /// Never finish
    Hang,
    /// Wait for a permit, then succeed like the default script
    Gated(Arc<Semaphore>),
}

/// Test double that records start order and peak concurrency
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<String, Script>>,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    pub fn new(delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            delay,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, url: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
        self
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn default_success(url: &str) -> FetchOutcome {
        let online_id = url.rsplit('/').next().unwrap_or(url).to_string();
        success("ex", &online_id, None)
    }
}

/// A downloaded entry as the extractor would report it
pub fn entry(extractor: &str, online_id: &str, collection: Option<&str>) -> FetchedMedia {
    FetchedMedia {
        filepath: format!("/downloads/{}/{}.mp4", extractor, online_id),
        extractor: extractor.to_string(),
        online_id: online_id.to_string(),
        title: format!("Video {}", online_id),
        url: Some(format!("https://example.com/watch/{}", online_id)),
        collection: collection.map(|id| CollectionRef {
            online_id: id.to_string(),
            title: Some(format!("Playlist {}", id)),
        }),
    }
}

fn success(extractor: &str, online_id: &str, collection: Option<&str>) -> FetchOutcome {
    FetchOutcome::success(entry(extractor, online_id, collection))
}

/// Decrements the running count even when the fetch is aborted
struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, url: &str, _options: &FetchOptions) -> FetchOutcome {
        self.started.lock().unwrap().push(url.to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        let script = self.scripts.lock().unwrap().get(url).cloned();
        tokio::time::sleep(self.delay).await;

        match script {
            None => Self::default_success(url),
            Some(Script::Succeed {
                extractor,
                online_id,
            }) => success(&extractor, &online_id, None),
            Some(Script::SucceedInCollection {
                online_id,
                collection,
            }) => success("ex", &online_id, Some(&collection)),
            Some(Script::Playlist {
                collection,
                online_ids,
            }) => FetchOutcome::from_entries(
                online_ids
                    .iter()
                    .map(|id| entry("ex", id, Some(&collection)))
                    .collect(),
            ),
            Some(Script::Fail(message)) => FetchOutcome::failure(message),
            Some(Script::Panic) => panic!("scripted extractor panic for {}", url),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Gated(gate)) => {
                let _permit = gate.acquire().await;
                Self::default_success(url)
            }
        }
    }

    async fn health_check(&self) -> anyhow::Result<String> {
        Ok("scripted 1.0".to_string())
    }
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

//! Configuration for ytdlq.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (YDLQ_HOME, YDL_DB_BACKEND, YDLQ_POOL_SIZE, ...)
//! 2. Config file (.ytdlq/config.yaml, or an explicit `--config` path)
//! 3. Defaults (~/.ytdlq)
//!
//! Config file discovery:
//! - Searches current directory and parents for .ytdlq/config.yaml
//! - `home` is relative to the .ytdlq/ directory; other paths are relative
//!   to the project root (the directory holding .ytdlq/)
//!
//! The resolved configuration is passed around by value; nothing is cached
//! globally.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::adapters::ytdlp::DEFAULT_BINARY;
use crate::core::DispatcherConfig;
use crate::domain::SettingsOverrides;
use crate::store::StoreBackend;

pub const ENV_HOME: &str = "YDLQ_HOME";
pub const ENV_BACKEND: &str = "YDL_DB_BACKEND";
pub const ENV_POOL_SIZE: &str = "YDLQ_POOL_SIZE";
pub const ENV_FETCH_TIMEOUT: &str = "YDLQ_FETCH_TIMEOUT";
pub const ENV_EXTRACTOR_BIN: &str = "YDLQ_EXTRACTOR_BIN";

const DEFAULT_POOL_SIZE: usize = 2;
const DEFAULT_RECENT_LIMIT: usize = 20;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub dispatcher: Option<DispatcherSection>,
    #[serde(default)]
    pub extractor: Option<ExtractorConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .ytdlq/)
    pub home: Option<String>,
    /// Catalog database file (relative to project root)
    pub database: Option<String>,
    /// Download destination (relative to project root)
    pub downloads: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSection {
    pub pool_size: Option<usize>,
    pub fetch_timeout_seconds: Option<u64>,
    pub recent_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    pub binary: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    /// SQLite catalog file (unused by the memory backend)
    pub database: PathBuf,
    /// Where downloads are written
    pub downloads: PathBuf,
    pub backend: StoreBackend,
    pub pool_size: usize,
    pub fetch_timeout: Option<Duration>,
    /// Number of entries the recent list shows
    pub recent_limit: usize,
    pub extractor_binary: String,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Settings for the work dispatcher
    pub fn dispatcher_config(
        &self,
        overrides: SettingsOverrides,
        owner: Option<String>,
    ) -> DispatcherConfig {
        DispatcherConfig {
            pool_size: self.pool_size,
            fetch_timeout: self.fetch_timeout,
            downloads_dir: self.downloads.clone(),
            overrides,
            owner,
        }
    }

    /// Directory holding one lock file per submitting process
    pub fn sessions_dir(&self) -> PathBuf {
        self.database.with_extension("sessions")
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".ytdlq").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file is a valid (all defaults) config
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}={:?}: {}", name, raw, e)),
    }
}

/// Load configuration from the process environment and the file system.
///
/// `explicit` takes precedence over config file discovery.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".ytdlq");

    let config_file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            find_config_file(&cwd)
        }
    };

    resolve_config(config_file, default_home, |name| std::env::var(name).ok())
}

/// Merge config file, environment and defaults
fn resolve_config(
    config_file: Option<PathBuf>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // .ytdlq/ directory and the project root around it
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let base_dir = config_dir.parent().unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env(ENV_HOME) {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = file.paths.home {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let database = match file.paths.database {
        Some(ref db) => resolve_path(base_dir, db),
        None => home.join("ytdlq.sqlite3"),
    };

    let downloads = match file.paths.downloads {
        Some(ref dl) => resolve_path(base_dir, dl),
        None => home.join("downloads"),
    };

    let backend = match env(ENV_BACKEND).or_else(|| file.storage.and_then(|s| s.backend)) {
        Some(name) => name.parse::<StoreBackend>()?,
        None => StoreBackend::default(),
    };

    let dispatcher = file.dispatcher.as_ref();

    let pool_size = parse_env::<usize>(ENV_POOL_SIZE, env(ENV_POOL_SIZE))?
        .or_else(|| dispatcher.and_then(|d| d.pool_size))
        .unwrap_or(DEFAULT_POOL_SIZE);
    if pool_size == 0 {
        bail!("Pool size must be at least 1");
    }

    let fetch_timeout = parse_env::<u64>(ENV_FETCH_TIMEOUT, env(ENV_FETCH_TIMEOUT))?
        .or_else(|| dispatcher.and_then(|d| d.fetch_timeout_seconds))
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let recent_limit = dispatcher
        .and_then(|d| d.recent_limit)
        .unwrap_or(DEFAULT_RECENT_LIMIT);

    let extractor_binary = env(ENV_EXTRACTOR_BIN)
        .or_else(|| file.extractor.and_then(|e| e.binary))
        .unwrap_or_else(|| DEFAULT_BINARY.to_string());

    Ok(ResolvedConfig {
        home,
        database,
        downloads,
        backend,
        pool_size,
        fetch_timeout,
        recent_limit,
        extractor_binary,
        config_file,
    })
}

//! Command-line interface for ytdlq.
//!
//! Provides commands for submitting downloads, inspecting the queue and
//! history, looking up videos and collections, and checking the setup.
//! Every command prints pretty JSON on stdout; logs go to stderr.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::adapters::{Extractor, YtDlpExtractor};
use crate::api::Api;
use crate::config::{load_config, ResolvedConfig};
use crate::core::{SubmitResult, WorkDispatcher};
use crate::domain::{DownloadRequest, RecordId, SettingsOverrides};
use crate::store::{open_store, CatalogStore, Session, StoreBackend};

/// Reason stored on records an exited process left queued
const ABANDONED_REASON: &str = "abandoned: process exited before the download ran";

/// ytdlq - download queue backed by yt-dlp and a catalog database
#[derive(Parser, Debug)]
#[command(name = "ytdlq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: .ytdlq/config.yaml in this or a parent directory)
    #[arg(long, global = true, env = "YDLQ_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Queue one URL for download
    Submit {
        /// URL to download
        url: String,

        /// Format selector (configured default if omitted)
        #[arg(short, long)]
        format: Option<String>,

        /// Print the acceptance instead of the finished record
        #[arg(long)]
        no_wait: bool,
    },

    /// Queue every URL in a file (or stdin), one per line
    Batch {
        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Format selector applied to every URL
        #[arg(long)]
        format: Option<String>,

        /// Print acceptances instead of waiting for the pool to drain
        #[arg(long)]
        no_wait: bool,
    },

    /// Show queued downloads
    Queue,

    /// Show recent successful downloads
    Recent {
        /// Maximum number of entries (configured limit if omitted)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show failed downloads
    Failed,

    /// Show one video by id or by extractor key
    Video(LookupArgs),

    /// Show one collection and its videos
    Collection(LookupArgs),

    /// Show effective settings and environment overrides
    Settings,

    /// Show resolved configuration (debug)
    Config,

    /// Check that the extractor can be run
    Check,
}

impl Commands {
    /// Whether the command queues downloads (and so owns a session)
    fn submits(&self) -> bool {
        matches!(self, Commands::Submit { .. } | Commands::Batch { .. })
    }
}

/// Lookup by catalog id or by (extractor, online id)
#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Catalog id
    #[arg(required_unless_present = "extractor", conflicts_with = "extractor")]
    pub id: Option<RecordId>,

    /// Extractor name (e.g. youtube)
    #[arg(long, requires = "online_id")]
    pub extractor: Option<String>,

    /// Platform-native id
    #[arg(long, requires = "extractor")]
    pub online_id: Option<String>,
}

enum Lookup {
    Id(RecordId),
    Key { extractor: String, online_id: String },
}

impl LookupArgs {
    fn lookup(self) -> Result<Lookup> {
        match (self.id, self.extractor, self.online_id) {
            (Some(id), None, None) => Ok(Lookup::Id(id)),
            (None, Some(extractor), Some(online_id)) => Ok(Lookup::Key {
                extractor,
                online_id,
            }),
            _ => bail!("Give either an id or both --extractor and --online-id"),
        }
    }
}

/// Store, dispatcher and query surface wired from the resolved config
struct App {
    api: Api,
    dispatcher: Arc<WorkDispatcher>,

    /// Held while this process may have queued rows
    session: Option<Session>,
}

impl App {
    /// Wire everything up. Only submitting commands open a session and
    /// reclaim rows of exited sessions; queries never modify the catalog.
    fn open(config: &ResolvedConfig, submitting: bool) -> Result<Self> {
        let store = open_store(config.backend, &config.database)
            .with_context(|| format!("Failed to open catalog: {}", config.database.display()))?;

        let session = match (submitting, config.backend) {
            (true, StoreBackend::Sqlite) => Some(start_session(store.as_ref(), config)?),
            _ => None,
        };

        let overrides = SettingsOverrides::from_env();
        let owner = session.as_ref().map(|s| s.id().to_string());
        let extractor: Arc<dyn Extractor> =
            Arc::new(YtDlpExtractor::with_binary_path(&config.extractor_binary));
        let dispatcher = Arc::new(WorkDispatcher::start(
            Arc::clone(&store),
            extractor,
            config.dispatcher_config(overrides.clone(), owner),
        ));

        let api = Api::new(
            store,
            Arc::clone(&dispatcher),
            overrides,
            config.recent_limit,
            config.downloads.clone(),
        );

        Ok(Self {
            api,
            dispatcher,
            session,
        })
    }

    async fn close(self) {
        self.dispatcher.shutdown().await;
        // Every queued row is resolved; the session can go
        drop(self.session);
    }
}

/// Register this process and fail rows whose owning process is gone
fn start_session(store: &dyn CatalogStore, config: &ResolvedConfig) -> Result<Session> {
    let dir = config.sessions_dir();
    let session = Session::acquire(&dir)
        .with_context(|| format!("Failed to create session lock in {}", dir.display()))?;

    let abandoned = session
        .reclaim_stale(store, ABANDONED_REASON)
        .context("Failed to clean up stale queue entries")?;
    if abandoned > 0 {
        warn!(abandoned, "Marked queued downloads of exited processes as failed");
    }

    Ok(session)
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;

        // Commands that never touch the catalog
        match self.command {
            Commands::Config => return show_config(&config),
            Commands::Check => return check_extractor(&config).await,
            _ => {}
        }

        let app = App::open(&config, self.command.submits())?;
        let result = run_command(&app, self.command).await;
        app.close().await;
        result
    }
}

async fn run_command(app: &App, command: Commands) -> Result<()> {
    let api = &app.api;

    match command {
        Commands::Submit {
            url,
            format,
            no_wait,
        } => submit_urls(app, vec![url], format, no_wait).await,
        Commands::Batch {
            file,
            format,
            no_wait,
        } => {
            let urls = read_batch(file.as_deref())?;
            submit_urls(app, urls, format, no_wait).await
        }
        Commands::Queue => print_json(&api.queue()?),
        Commands::Recent { limit } => match limit {
            Some(limit) => print_json(&api.recent_limited(limit)?),
            None => print_json(&api.recent()?),
        },
        Commands::Failed => print_json(&api.failed()?),
        Commands::Video(args) => match args.lookup()? {
            Lookup::Id(id) => print_json(&api.video(id)?),
            Lookup::Key {
                extractor,
                online_id,
            } => print_json(&api.video_by_extractor(&extractor, &online_id)?),
        },
        Commands::Collection(args) => match args.lookup()? {
            Lookup::Id(id) => print_json(&api.collection(id)?),
            Lookup::Key {
                extractor,
                online_id,
            } => print_json(&api.collection_by_extractor(&extractor, &online_id)?),
        },
        Commands::Settings => print_json(&api.settings()?),
        Commands::Config | Commands::Check => Ok(()),
    }
}

/// Submit URLs in order, then either print acceptances or wait and print results
async fn submit_urls(
    app: &App,
    urls: Vec<String>,
    format: Option<String>,
    no_wait: bool,
) -> Result<()> {
    if urls.is_empty() {
        bail!("No URLs to submit");
    }

    let mut submissions = Vec::with_capacity(urls.len());
    for url in urls {
        let request = DownloadRequest::new(url.clone(), format.clone());
        let result = app.dispatcher.submit(request).await?;
        if let SubmitResult::Rejected { ref reason } = result {
            warn!(url = %url, "Submission rejected: {}", reason);
        }
        submissions.push((url, result));
    }

    if no_wait {
        let accepted: Vec<_> = submissions
            .iter()
            .map(|(url, result)| json!({ "url": url, "submission": result }))
            .collect();
        return print_json(&accepted);
    }

    let accepted = submissions.iter().filter(|(_, r)| r.is_accepted()).count();
    info!(accepted, "Waiting for downloads to finish");
    app.dispatcher.wait_idle().await;

    let mut results = Vec::with_capacity(submissions.len());
    for (url, result) in submissions {
        results.push(finished_entry(&app.api, &app.dispatcher, url, result)?);
    }

    if results.len() == 1 {
        print_json(&results[0])
    } else {
        print_json(&results)
    }
}

/// Output for one finished submission: the record now holding its outcome
fn finished_entry(
    api: &Api,
    dispatcher: &WorkDispatcher,
    url: String,
    result: SubmitResult,
) -> Result<serde_json::Value> {
    let SubmitResult::Accepted { id } = result else {
        return Ok(json!({ "url": url, "submission": result }));
    };

    // A merged download lives on under the record that already had its key
    let record_id = dispatcher.resolved_record(id).unwrap_or(id);
    match api.video(record_id) {
        Ok(record) => Ok(json!({ "url": url, "record": record })),
        Err(e) if e.is_not_found() => Ok(json!({
            "url": url,
            "id": id,
            "state": dispatcher.job_state(id),
        })),
        Err(e) => Err(e.into()),
    }
}

/// Read one URL per line; blank lines and `#` comments are skipped
fn read_batch(file: Option<&Path>) -> Result<Vec<String>> {
    let content = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file: {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read URLs from stdin")?;
            buf
        }
    };

    Ok(parse_batch(&content))
}

fn parse_batch(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config(config: &ResolvedConfig) -> Result<()> {
    print_json(&json!({
        "config_file": config.config_file,
        "home": config.home,
        "database": config.database,
        "downloads": config.downloads,
        "backend": config.backend,
        "pool_size": config.pool_size,
        "fetch_timeout_seconds": config.fetch_timeout.map(|t| t.as_secs()),
        "recent_limit": config.recent_limit,
        "extractor_binary": config.extractor_binary,
    }))
}

async fn check_extractor(config: &ResolvedConfig) -> Result<()> {
    let extractor = YtDlpExtractor::with_binary_path(&config.extractor_binary);
    let version = extractor.health_check().await?;
    print_json(&json!({
        "extractor": extractor.name(),
        "binary": extractor.binary_path(),
        "version": version,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DispatcherConfig;
    use crate::domain::{FetchOptions, FetchOutcome, FetchedMedia};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use clap::CommandFactory;

    /// Every URL resolves to the same video
    struct SameVideoExtractor;

    #[async_trait]
    impl Extractor for SameVideoExtractor {
        fn name(&self) -> &str {
            "same-video"
        }

        async fn fetch(&self, _url: &str, _options: &FetchOptions) -> FetchOutcome {
            FetchOutcome::success(FetchedMedia {
                filepath: "/dl/ex/42.mp4".to_string(),
                extractor: "ex".to_string(),
                online_id: "42".to_string(),
                title: "Video 42".to_string(),
                url: None,
                collection: None,
            })
        }

        async fn health_check(&self) -> anyhow::Result<String> {
            Ok("same-video 1.0".to_string())
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from(["ytdlq", "submit", "https://example.com/v1", "-f", "best"])
            .unwrap();
        match cli.command {
            Commands::Submit {
                url,
                format,
                no_wait,
            } => {
                assert_eq!(url, "https://example.com/v1");
                assert_eq!(format.as_deref(), Some("best"));
                assert!(!no_wait);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_lookup_by_id_or_key() {
        let cli = Cli::try_parse_from(["ytdlq", "video", "42"]).unwrap();
        let Commands::Video(args) = cli.command else {
            panic!("expected video command");
        };
        assert!(matches!(args.lookup().unwrap(), Lookup::Id(42)));

        let cli = Cli::try_parse_from([
            "ytdlq",
            "collection",
            "--extractor",
            "youtube",
            "--online-id",
            "PL9",
        ])
        .unwrap();
        let Commands::Collection(args) = cli.command else {
            panic!("expected collection command");
        };
        assert!(matches!(
            args.lookup().unwrap(),
            Lookup::Key { ref extractor, ref online_id } if extractor == "youtube" && online_id == "PL9"
        ));
    }

    #[test]
    fn test_lookup_requires_complete_key() {
        assert!(Cli::try_parse_from(["ytdlq", "video"]).is_err());
        assert!(Cli::try_parse_from(["ytdlq", "video", "--extractor", "youtube"]).is_err());
        assert!(Cli::try_parse_from(["ytdlq", "video", "1", "--extractor", "x", "--online-id", "y"]).is_err());
    }

    #[test]
    fn test_only_submissions_open_a_session() {
        let submit = Cli::try_parse_from(["ytdlq", "submit", "https://example.com/v1"]).unwrap();
        let batch = Cli::try_parse_from(["ytdlq", "batch", "--file", "urls.txt"]).unwrap();
        assert!(submit.command.submits());
        assert!(batch.command.submits());

        for args in [
            vec!["ytdlq", "queue"],
            vec!["ytdlq", "recent"],
            vec!["ytdlq", "failed"],
            vec!["ytdlq", "video", "1"],
            vec!["ytdlq", "settings"],
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            assert!(!cli.command.submits(), "{:?}", cli.command);
        }
    }

    #[tokio::test]
    async fn test_merged_download_prints_surviving_record() {
        let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(WorkDispatcher::start(
            Arc::clone(&store),
            Arc::new(SameVideoExtractor),
            DispatcherConfig {
                pool_size: 1,
                ..Default::default()
            },
        ));
        let api = Api::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            SettingsOverrides::default(),
            20,
            PathBuf::from("/dl"),
        );

        let first = dispatcher
            .submit(DownloadRequest::url("https://example.com/watch?v=42"))
            .await
            .unwrap();
        let second = dispatcher
            .submit(DownloadRequest::url("https://short.example/42"))
            .await
            .unwrap();
        dispatcher.wait_idle().await;

        let SubmitResult::Accepted { id: first_id } = first else {
            panic!("expected acceptance");
        };
        let entry = finished_entry(&api, &dispatcher, "https://short.example/42".into(), second)
            .unwrap();

        assert_eq!(entry["record"]["id"], json!(first_id));
        assert_eq!(entry["record"]["url"], json!("https://short.example/42"));
        assert_eq!(entry["record"]["online_id"], json!("42"));
    }

    #[test]
    fn test_parse_batch_skips_blanks_and_comments() {
        let urls = parse_batch("https://a\n\n  # later\n  https://b  \n");
        assert_eq!(urls, vec!["https://a".to_string(), "https://b".to_string()]);
    }
}

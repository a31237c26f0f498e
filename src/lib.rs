//! ytdlq - download queue and worker pool for an external media extractor
//!
//! Accepts download requests, runs them on a bounded pool of workers that
//! invoke `yt-dlp`, and records every outcome in a catalog database.
//!
//! # Architecture
//!
//! ```text
//! api ──► core::WorkDispatcher ──► adapters::Extractor
//!  │              │
//!  └──────────────┴──► store::CatalogStore
//! ```
//!
//! - A submission becomes a queued record immediately and a job on the pool
//! - At most `pool_size` fetches run at once; waiting jobs start in
//!   submission order
//! - Each job resolves its record exactly once, as succeeded or failed
//!
//! # Modules
//!
//! - `adapters`: Extractor capability and the yt-dlp subprocess adapter
//! - `api`: Typed query and submission surface
//! - `core`: Work dispatcher and job state machine
//! - `domain`: Requests, records, outcomes, settings
//! - `store`: Catalog storage (SQLite or in-memory)
//! - `config`: Paths and tuning from file and environment
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Download one URL and print the resulting record
//! ytdlq submit https://example.com/watch?v=42
//!
//! # Queue a list of URLs
//! ytdlq batch --file urls.txt
//!
//! # Inspect the catalog
//! ytdlq recent --limit 5
//! ytdlq failed
//! ```

pub mod adapters;
pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use adapters::{Extractor, YtDlpExtractor};
pub use api::{Api, ApiError};
pub use core::{DispatcherConfig, JobState, SubmitResult, WorkDispatcher};
pub use domain::{DownloadRecord, DownloadRequest, DownloadStatus, FetchOutcome};
pub use store::{open_store, CatalogStore, Session, StoreBackend, StoreError};

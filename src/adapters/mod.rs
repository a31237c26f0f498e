//! Adapter interfaces for external extraction tools.
//!
//! The dispatcher only depends on the [`Extractor`] capability, so the real
//! subprocess-backed tool can be swapped for a scripted double in tests.

pub mod metadata;
pub mod ytdlp;

use async_trait::async_trait;

use crate::domain::{FetchOptions, FetchOutcome};

// Re-export the yt-dlp adapter
pub use ytdlp::YtDlpExtractor;

/// Trait for content extraction backends
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Human-readable extractor name
    fn name(&self) -> &str;

    /// Fetch one URL with resolved options.
    ///
    /// Blocks (asynchronously) for the full duration of the download and never
    /// returns an error: every failure is folded into
    /// [`FetchOutcome::Failure`]. No timeout is applied here.
    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchOutcome;

    /// Check that the backing tool is installed and runnable
    async fn health_check(&self) -> anyhow::Result<String>;
}

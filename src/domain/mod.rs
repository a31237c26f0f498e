//! Domain types for the download queue.
//!
//! This module contains the core data structures:
//! - Request: An incoming submission (url + optional format)
//! - Record: The catalog's view of one download attempt, and collections
//! - Outcome: The normalized result of one extractor invocation
//! - Settings: Persisted configuration and environment overrides

pub mod outcome;
pub mod record;
pub mod request;
pub mod settings;

// Re-export commonly used types
pub use outcome::{CollectionRef, FetchOutcome, FetchedMedia, NO_ENTRIES};
pub use record::{Collection, DownloadRecord, DownloadStatus, RecordId};
pub use request::{DownloadRequest, ValidationError};
pub use settings::{FetchOptions, FormatOption, Settings, SettingsError, SettingsOverrides};

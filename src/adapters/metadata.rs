//! Parsing of the extractor's JSON metadata output.
//!
//! yt-dlp prints one info object per downloaded entry when run with
//! `--dump-json --no-simulate`, so a playlist yields one line per video.
//! Only the fields needed for the catalog are read; everything else is
//! ignored.

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{CollectionRef, FetchedMedia};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("extractor produced no metadata")]
    Empty,

    #[error("malformed metadata JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metadata is missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    extractor: Option<String>,
    #[serde(default)]
    extractor_key: Option<String>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
    #[serde(default, rename = "_filename")]
    underscore_filename: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    playlist_id: Option<String>,
    #[serde(default)]
    playlist_title: Option<String>,
    #[serde(default)]
    playlist: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestedDownload {
    #[serde(default)]
    filepath: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse every JSON object line on stdout, in the order printed.
///
/// Lines that are not JSON objects (warnings, progress) are skipped.
pub fn parse_fetch_output(stdout: &str) -> Result<Vec<FetchedMedia>, MetadataError> {
    let entries = stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .map(parse_entry)
        .collect::<Result<Vec<_>, _>>()?;

    if entries.is_empty() {
        return Err(MetadataError::Empty);
    }
    Ok(entries)
}

fn parse_entry(line: &str) -> Result<FetchedMedia, MetadataError> {
    let info: InfoJson = serde_json::from_str(line)?;

    let online_id = non_empty(info.id).ok_or(MetadataError::MissingField("id"))?;
    let extractor = non_empty(info.extractor_key)
        .or_else(|| non_empty(info.extractor))
        .map(|e| e.to_lowercase())
        .ok_or(MetadataError::MissingField("extractor"))?;

    let filepath = info
        .requested_downloads
        .into_iter()
        .find_map(|d| non_empty(d.filepath))
        .or_else(|| non_empty(info.underscore_filename))
        .or_else(|| non_empty(info.filename))
        .ok_or(MetadataError::MissingField("filepath"))?;

    let collection = non_empty(info.playlist_id).map(|online_id| CollectionRef {
        online_id,
        title: non_empty(info.playlist_title).or_else(|| non_empty(info.playlist)),
    });

    Ok(FetchedMedia {
        filepath,
        title: non_empty(info.title).unwrap_or_else(|| online_id.clone()),
        extractor,
        online_id,
        url: non_empty(info.webpage_url),
        collection,
    })
}

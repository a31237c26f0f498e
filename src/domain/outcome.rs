//! Normalized result of one extractor invocation.

use serde::{Deserialize, Serialize};

use super::record::DownloadStatus;

/// Message stored when a fetch claims success but produced nothing
pub const NO_ENTRIES: &str = "extractor reported no downloaded entries";

/// Collection a fetched video belongs to, as reported by the extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    pub online_id: String,
    pub title: Option<String>,
}

/// One downloaded video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedMedia {
    pub filepath: String,
    pub extractor: String,
    pub online_id: String,
    pub title: String,

    /// Canonical page of this entry (playlist members differ from the
    /// submitted URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    pub collection: Option<CollectionRef>,
}

/// Outcome of a single fetch attempt.
///
/// Failures are data, not errors: they are persisted with their message and
/// never abort the worker that produced them. A playlist URL succeeds with
/// one entry per downloaded video; the first entry resolves the submitted
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Success { entries: Vec<FetchedMedia> },
    Failure { message: String },
}

impl FetchOutcome {
    /// A single-video success
    pub fn success(media: FetchedMedia) -> Self {
        Self::Success {
            entries: vec![media],
        }
    }

    /// Success with every entry in extractor order; no entries is a failure
    pub fn from_entries(entries: Vec<FetchedMedia>) -> Self {
        if entries.is_empty() {
            Self::failure(NO_ENTRIES)
        } else {
            Self::Success { entries }
        }
    }

    /// Build a failure outcome
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    /// Terminal record status this outcome resolves to
    pub fn status(&self) -> DownloadStatus {
        match self {
            Self::Success { entries } if !entries.is_empty() => DownloadStatus::Succeeded,
            _ => DownloadStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(online_id: &str) -> FetchedMedia {
        FetchedMedia {
            filepath: format!("/dl/{}.mp4", online_id),
            extractor: "ex".to_string(),
            online_id: online_id.to_string(),
            title: online_id.to_string(),
            url: None,
            collection: None,
        }
    }

    #[test]
    fn test_empty_success_is_a_failure() {
        let outcome = FetchOutcome::from_entries(Vec::new());
        assert_eq!(outcome, FetchOutcome::failure(NO_ENTRIES));
        assert_eq!(outcome.status(), DownloadStatus::Failed);
    }

    #[test]
    fn test_entries_keep_extractor_order() {
        let outcome = FetchOutcome::from_entries(vec![media("a"), media("b")]);
        let FetchOutcome::Success { entries } = &outcome else {
            panic!("expected success");
        };
        assert_eq!(entries[0].online_id, "a");
        assert_eq!(entries[1].online_id, "b");
        assert_eq!(outcome.status(), DownloadStatus::Succeeded);
    }
}

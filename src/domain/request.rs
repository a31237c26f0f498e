//! Incoming download submissions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a submission is refused before any job exists
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing 'url' parameter")]
    MissingUrl,
}

/// A request to download one URL.
///
/// Immutable once created; the dispatcher and store only ever borrow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Source URL handed to the extractor
    pub url: String,

    /// Format selector (falls back to the configured default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl DownloadRequest {
    /// Create a request. Blank formats are treated as absent.
    pub fn new(url: impl Into<String>, format: Option<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            format: format
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
        }
    }

    /// Shorthand for a request using the default format
    pub fn url(url: impl Into<String>) -> Self {
        Self::new(url, None)
    }

    /// Reject requests the extractor could never act on
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_format_is_none() {
        let request = DownloadRequest::new("https://example.com/v1", Some("  ".to_string()));
        assert_eq!(request.format, None);
    }

    #[test]
    fn test_format_and_url_are_trimmed() {
        let request = DownloadRequest::new(" https://example.com/v1 ", Some(" worst ".to_string()));
        assert_eq!(request.url, "https://example.com/v1");
        assert_eq!(request.format.as_deref(), Some("worst"));
    }

    #[test]
    fn test_empty_url_rejected() {
        assert_eq!(
            DownloadRequest::url("   ").validate(),
            Err(ValidationError::MissingUrl)
        );
        assert!(DownloadRequest::url("https://example.com/v1").validate().is_ok());
    }
}

//! yt-dlp adapter.
//!
//! Runs the `yt-dlp` CLI as a subprocess for each fetch and reads the info
//! JSON it prints after downloading.

use std::ffi::OsString;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::metadata::parse_fetch_output;
use super::Extractor;
use crate::domain::{FetchOptions, FetchOutcome};

/// Default binary name looked up on PATH
pub const DEFAULT_BINARY: &str = "yt-dlp";

/// yt-dlp adapter using subprocess mode
pub struct YtDlpExtractor {
    /// Path to the yt-dlp binary (default: "yt-dlp")
    binary_path: String,
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpExtractor {
    /// Create an adapter using `yt-dlp` from PATH
    pub fn new() -> Self {
        Self::with_binary_path(DEFAULT_BINARY)
    }

    /// Create an adapter with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }

    /// Command-line arguments for one fetch
    pub fn build_args(url: &str, options: &FetchOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--no-simulate".into(),
            "--dump-json".into(),
            "--no-progress".into(),
            "--no-colors".into(),
            "-f".into(),
            options.format.clone().into(),
            "-o".into(),
            options.output_template.clone().into(),
        ];

        if options.write_info_json {
            args.push("--write-info-json".into());
        }
        if options.write_thumbnail {
            args.push("--write-thumbnail".into());
        }
        if options.write_description {
            args.push("--write-description".into());
        }

        // Keep URLs that start with '-' from being read as flags
        args.push("--".into());
        args.push(url.into());
        args
    }

    async fn run(&self, url: &str, options: &FetchOptions) -> Result<FetchOutcome> {
        let args = Self::build_args(url, options);
        debug!(binary = %self.binary_path, ?args, "Spawning extractor");

        let output = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start {}", self.binary_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let message = if stderr.is_empty() {
                match output.status.code() {
                    Some(code) => format!("{} exited with code {}", self.binary_path, code),
                    None => format!("{} was terminated by a signal", self.binary_path),
                }
            } else {
                stderr.to_string()
            };
            return Ok(FetchOutcome::failure(message));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_fetch_output(&stdout) {
            Ok(entries) => Ok(FetchOutcome::from_entries(entries)),
            Err(e) => Ok(FetchOutcome::failure(format!(
                "unparsable extractor metadata: {}",
                e
            ))),
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchOutcome {
        match self.run(url, options).await {
            Ok(outcome) => outcome,
            Err(e) => FetchOutcome::failure(format!("{:#}", e)),
        }
    }

    async fn health_check(&self) -> Result<String> {
        let output = Command::new(&self.binary_path)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("Failed to run {} --version", self.binary_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} health check failed: {}", self.binary_path, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> FetchOptions {
        FetchOptions {
            format: "best".to_string(),
            output_template: "/dl/%(id)s.%(ext)s".to_string(),
            write_info_json: true,
            write_thumbnail: false,
            write_description: false,
        }
    }

    #[test]
    fn test_custom_binary_path() {
        let adapter = YtDlpExtractor::with_binary_path("/custom/path/yt-dlp");
        assert_eq!(adapter.binary_path(), "/custom/path/yt-dlp");
        assert_eq!(adapter.name(), "yt-dlp");
    }

    #[test]
    fn test_build_args() {
        let args = YtDlpExtractor::build_args("-weird-url", &options());
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.windows(2).any(|w| w == ["-f", "best"]));
        assert!(args.windows(2).any(|w| w == ["-o", "/dl/%(id)s.%(ext)s"]));
        assert!(args.contains(&"--write-info-json".to_string()));
        assert!(!args.contains(&"--write-thumbnail".to_string()));
        assert_eq!(&args[args.len() - 2..], ["--", "-weird-url"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_failure_outcome() {
        let adapter = YtDlpExtractor::with_binary_path("/nonexistent/ytdlq-test-binary");
        let outcome = adapter.fetch("https://example.com/v1", &options()).await;

        match outcome {
            FetchOutcome::Failure { message } => {
                assert!(message.starts_with("failed to start /nonexistent/ytdlq-test-binary"))
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("fake-ytdlp");
        std::fs::write(&script, "#!/bin/sh\necho 'ERROR: Unsupported URL' >&2\nexit 1\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let adapter = YtDlpExtractor::with_binary_path(script.to_string_lossy());
        let outcome = adapter.fetch("https://example.com/v1", &options()).await;

        assert_eq!(outcome, FetchOutcome::failure("ERROR: Unsupported URL"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_parses_printed_json() {
        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("fake-ytdlp");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"id\": \"42\", \"extractor\": \"ex\", \"title\": \"T\", \"_filename\": \"/dl/42.mp4\"}'\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let adapter = YtDlpExtractor::with_binary_path(script.to_string_lossy());
        let outcome = adapter.fetch("https://example.com/v42", &options()).await;

        match outcome {
            FetchOutcome::Success { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].extractor, "ex");
                assert_eq!(entries[0].online_id, "42");
                assert_eq!(entries[0].filepath, "/dl/42.mp4");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_playlist_reports_each_entry() {
        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("fake-ytdlp");
        std::fs::write(
            &script,
            concat!(
                "#!/bin/sh\n",
                "echo '{\"id\": \"a\", \"extractor\": \"ex\", \"_filename\": \"/dl/a.mp4\", \"playlist_id\": \"PL\"}'\n",
                "echo '{\"id\": \"b\", \"extractor\": \"ex\", \"_filename\": \"/dl/b.mp4\", \"playlist_id\": \"PL\"}'\n",
            ),
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let adapter = YtDlpExtractor::with_binary_path(script.to_string_lossy());
        let outcome = adapter.fetch("https://example.com/playlist?list=PL", &options()).await;

        let FetchOutcome::Success { entries } = &outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        let ids: Vec<_> = entries.iter().map(|m| m.online_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(entries
            .iter()
            .all(|m| m.collection.as_ref().map(|c| c.online_id.as_str()) == Some("PL")));
    }
}

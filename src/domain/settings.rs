//! Persisted settings, format options and environment overrides.
//!
//! Settings live in the catalog's `settings` table as key/value pairs. Any key
//! can be overridden at process start by an environment variable named
//! `YDL_<KEY>` (e.g. `YDL_DEFAULT_FORMAT`); overrides are resolved once and
//! reported on the settings surface.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for settings override environment variables
pub const OVERRIDE_PREFIX: &str = "YDL_";

/// All persisted setting keys, in display order
pub const SETTING_KEYS: &[&str] = &[
    "default_format",
    "output_template",
    "write_info_json",
    "write_thumbnail",
    "write_description",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Process-wide download settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Format selector used when a request names none
    #[serde(default = "default_format")]
    pub default_format: String,

    /// Output template, relative to the downloads directory
    #[serde(default = "default_output_template")]
    pub output_template: String,

    #[serde(default)]
    pub write_info_json: bool,

    #[serde(default)]
    pub write_thumbnail: bool,

    #[serde(default)]
    pub write_description: bool,
}

fn default_format() -> String {
    "bestvideo+bestaudio/best".to_string()
}
fn default_output_template() -> String {
    "%(extractor)s/%(id)s.%(ext)s".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_format: default_format(),
            output_template: default_output_template(),
            write_info_json: false,
            write_thumbnail: false,
            write_description: false,
        }
    }
}

impl Settings {
    /// Read one setting in its storage form
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "default_format" => Some(self.default_format.clone()),
            "output_template" => Some(self.output_template.clone()),
            "write_info_json" => Some(self.write_info_json.to_string()),
            "write_thumbnail" => Some(self.write_thumbnail.to_string()),
            "write_description" => Some(self.write_description.to_string()),
            _ => None,
        }
    }

    /// Set one setting from its storage form
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "default_format" | "output_template" if value.trim().is_empty() => {
                return Err(invalid())
            }
            "default_format" => self.default_format = value.trim().to_string(),
            "output_template" => self.output_template = value.trim().to_string(),
            "write_info_json" => self.write_info_json = parse_bool(value).ok_or_else(invalid)?,
            "write_thumbnail" => self.write_thumbnail = parse_bool(value).ok_or_else(invalid)?,
            "write_description" => {
                self.write_description = parse_bool(value).ok_or_else(invalid)?
            }
            _ => return Err(SettingsError::UnknownKey(key.to_string())),
        }

        Ok(())
    }

    /// All settings as (key, storage value) pairs
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        SETTING_KEYS
            .iter()
            .filter_map(|key| self.get(key).map(|value| (*key, value)))
            .collect()
    }

    /// Build settings from stored pairs, keeping defaults for missing keys.
    ///
    /// Unknown keys and invalid values are skipped so an old or hand-edited
    /// table never prevents startup.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in pairs {
            if let Err(e) = settings.set(key.as_ref(), value.as_ref()) {
                tracing::warn!("Ignoring stored setting: {}", e);
            }
        }
        settings
    }

    /// Resolve the options for one fetch
    pub fn fetch_options(&self, format: Option<&str>, downloads_dir: &Path) -> FetchOptions {
        FetchOptions {
            format: format.unwrap_or(&self.default_format).to_string(),
            output_template: downloads_dir
                .join(&self.output_template)
                .to_string_lossy()
                .into_owned(),
            write_info_json: self.write_info_json,
            write_thumbnail: self.write_thumbnail,
            write_description: self.write_description,
        }
    }
}

/// Accepts 1/true/yes/on and 0/false/no/off (case-insensitive)
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A selectable format shown next to the submission form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOption {
    pub id: i64,

    /// Human-readable label
    pub label: String,

    /// Format selector passed to the extractor
    pub selector: String,

    /// Display order, lowest first
    pub position: i64,
}

/// Options for a single extractor invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    pub format: String,

    /// Absolute output template (downloads dir + template)
    pub output_template: String,

    pub write_info_json: bool,
    pub write_thumbnail: bool,
    pub write_description: bool,
}

/// Setting overrides captured from the environment at process start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    values: BTreeMap<String, String>,
}

impl SettingsOverrides {
    /// Pick `YDL_<KEY>` variables for known setting keys
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let values = vars
            .into_iter()
            .filter_map(|(name, value)| {
                let key = name.strip_prefix(OVERRIDE_PREFIX)?.to_ascii_lowercase();
                SETTING_KEYS.contains(&key.as_str()).then_some((key, value))
            })
            .collect();

        Self { values }
    }

    /// Capture overrides from the current process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Insert a single override (used by tests and embedding callers)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Apply overrides in place, returning the keys that took effect
    pub fn apply(&self, settings: &mut Settings) -> BTreeSet<String> {
        let mut applied = BTreeSet::new();
        for (key, value) in &self.values {
            match settings.set(key, value) {
                Ok(()) => {
                    applied.insert(key.clone());
                }
                Err(e) => tracing::warn!(
                    "Ignoring override {}{}: {}",
                    OVERRIDE_PREFIX,
                    key.to_ascii_uppercase(),
                    e
                ),
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_defaults_round_trip_through_pairs() {
        let settings = Settings::default();
        let restored = Settings::from_pairs(settings.to_pairs());
        assert_eq!(restored, settings);
    }

    #[test]
    fn test_from_pairs_skips_garbage() {
        let settings = Settings::from_pairs([
            ("default_format", "worst"),
            ("write_thumbnail", "maybe"),
            ("no_such_key", "x"),
        ]);
        assert_eq!(settings.default_format, "worst");
        assert!(!settings.write_thumbnail);
    }

    #[test]
    fn test_parse_bool_forms() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn test_overrides_only_pick_known_keys() {
        let overrides = SettingsOverrides::from_vars([
            ("YDL_DEFAULT_FORMAT".to_string(), "worst".to_string()),
            ("YDL_DB_BACKEND".to_string(), "memory".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);

        let mut settings = Settings::default();
        let applied = overrides.apply(&mut settings);

        assert_eq!(settings.default_format, "worst");
        assert_eq!(applied.into_iter().collect::<Vec<_>>(), vec!["default_format"]);
    }

    #[test]
    fn test_invalid_override_is_not_reported() {
        let overrides = SettingsOverrides::default().with("write_info_json", "sometimes");
        let mut settings = Settings::default();
        assert!(overrides.apply(&mut settings).is_empty());
        assert!(!settings.write_info_json);
    }

    #[test]
    fn test_fetch_options_resolve_format_and_template() {
        let settings = Settings {
            write_info_json: true,
            ..Default::default()
        };
        let dir = PathBuf::from("/data/downloads");

        let options = settings.fetch_options(None, &dir);
        assert_eq!(options.format, "bestvideo+bestaudio/best");
        assert_eq!(
            options.output_template,
            "/data/downloads/%(extractor)s/%(id)s.%(ext)s"
        );
        assert!(options.write_info_json);

        let options = settings.fetch_options(Some("bestaudio"), &dir);
        assert_eq!(options.format, "bestaudio");
    }
}

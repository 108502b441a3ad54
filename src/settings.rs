//! User settings stored as a JSON object on disk.
//!
//! Only `custom_api_key` is consumed; every other key in the file is ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error reading settings: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Settings file is not valid JSON: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub custom_api_key: Option<String>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        tracing::trace!(path = ?path, has_key = settings.custom_api_key.is_some(), "Loaded settings");
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file is missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(SettingsError::NotFound(_)) => {
                tracing::debug!(path = ?path, "No settings file, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, path = ?path, "Failed to read settings, using defaults");
                Self::default()
            }
        }
    }

    /// The configured API key, trimmed. Empty when unset.
    pub fn api_key(&self) -> &str {
        self.custom_api_key.as_deref().map(str::trim).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_api_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"custom_api_key": " abc123 ", "theme": "dark"}}"#).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.api_key(), "abc123");
    }

    #[test]
    fn test_missing_file_is_empty_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::NotFound(_))
        ));
        assert_eq!(Settings::load_or_default(&path).api_key(), "");
    }

    #[test]
    fn test_malformed_file_is_empty_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json at all").unwrap();

        assert!(matches!(
            Settings::load(file.path()),
            Err(SettingsError::ParseError(_))
        ));
        assert_eq!(Settings::load_or_default(file.path()).api_key(), "");
    }

    #[test]
    fn test_missing_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        assert_eq!(Settings::load(file.path()).unwrap().api_key(), "");
    }
}

//! Configuration types for the reminder engine.

use crate::events::types::DeliveryMethod;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarebellConfig {
    /// Event persistence settings.
    pub storage: StorageConfig,
    /// How long terminal events are kept before cleanup.
    pub retention: RetentionConfig,
    /// Notification defaults and channel behavior.
    pub notifications: NotificationConfig,
    /// Background coordinator settings.
    pub background: BackgroundConfig,
}

/// Event store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path (None = `carebell_dirs::database_file()`).
    pub database_file: Option<PathBuf>,
    /// JSON list used when the database cannot be opened
    /// (None = keep the fallback list in memory only).
    pub fallback_file: Option<PathBuf>,
    /// Skip the database entirely and run on the fallback list.
    pub force_fallback: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: None,
            fallback_file: Some(crate::carebell_dirs::data_dir().join("events_fallback.json")),
            force_fallback: false,
        }
    }
}

impl StorageConfig {
    /// Resolved database path.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_file
            .clone()
            .unwrap_or_else(crate::carebell_dirs::database_file)
    }
}

/// Retention windows used by expired-event cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Completed one-time events older than this many days are removed.
    pub completed_days: u32,
    /// Cancelled events older than this many days are removed.
    pub cancelled_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_days: 30,
            cancelled_days: 7,
        }
    }
}

/// Notification defaults and channel tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Methods used when an event does not request any.
    pub default_methods: Vec<DeliveryMethod>,
    /// Advance warnings (minutes) applied to new events.
    pub default_advance_warning: Vec<u32>,
    /// Snooze length used by notification actions.
    pub default_snooze_minutes: u32,
    /// Seconds before a non-high-priority visual modal closes itself.
    pub visual_timeout_secs: u64,
    /// Upper bound on a single channel attempt or permission prompt.
    pub channel_timeout_ms: u64,
    /// Extra attempts for a channel that failed transiently.
    pub channel_retries: u32,
    /// Categories whose new events default to high priority.
    pub high_priority_categories: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_methods: vec![DeliveryMethod::System, DeliveryMethod::Vibration],
            default_advance_warning: vec![5],
            default_snooze_minutes: 15,
            visual_timeout_secs: 10,
            channel_timeout_ms: 5_000,
            channel_retries: 1,
            high_priority_categories: vec![crate::events::types::CATEGORY_MEDICATION.to_owned()],
        }
    }
}

/// Background coordinator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Seconds between periodic due-event checks.
    pub check_interval_secs: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
        }
    }
}

impl CarebellConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::CarebellError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CarebellError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::carebell_dirs::config_file()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CarebellConfig::default();
        assert_eq!(config.retention.completed_days, 30);
        assert_eq!(config.retention.cancelled_days, 7);
        assert_eq!(config.notifications.default_snooze_minutes, 15);
        assert_eq!(config.notifications.visual_timeout_secs, 10);
        assert_eq!(config.notifications.default_advance_warning, vec![5]);
        assert_eq!(
            config.notifications.default_methods,
            vec![DeliveryMethod::System, DeliveryMethod::Vibration]
        );
        assert_eq!(config.background.check_interval_secs, 60);
        assert!(!config.storage.force_fallback);
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let config: CarebellConfig = toml::from_str(
            r#"
            [retention]
            cancelled_days = 3

            [notifications]
            default_methods = ["system", "sound"]
            "#,
        )
        .unwrap();
        assert_eq!(config.retention.cancelled_days, 3);
        assert_eq!(config.retention.completed_days, 30);
        assert_eq!(
            config.notifications.default_methods,
            vec![DeliveryMethod::System, DeliveryMethod::Sound]
        );
        assert_eq!(config.notifications.channel_retries, 1);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CarebellConfig::default();
        config.storage.force_fallback = true;
        config.background.check_interval_secs = 5;
        config.save_to_file(&path).unwrap();

        let loaded = CarebellConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn from_file_invalid_toml_returns_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();

        let result = CarebellConfig::from_file(&path);
        assert!(matches!(result, Err(crate::error::CarebellError::Config(_))));
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CarebellConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, CarebellConfig::default());
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = CarebellConfig::default_config_path();
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }
}

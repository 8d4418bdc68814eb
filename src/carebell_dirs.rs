//! Centralized application directory paths for carebell.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/carebell/` | `~/.local/share/carebell/` |
//! | Config | `~/Library/Application Support/carebell/` | `~/.config/carebell/` |
//!
//! # Environment Overrides
//!
//! - `CAREBELL_DATA_DIR` overrides [`data_dir`]
//! - `CAREBELL_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the event database, the fallback event list, the scheduled
/// notification queue and logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CAREBELL_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("carebell"))
        .unwrap_or_else(|| PathBuf::from("/tmp/carebell-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CAREBELL_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("carebell"))
        .unwrap_or_else(|| PathBuf::from("/tmp/carebell-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Durable event database (`data_dir()/events.db`).
#[must_use]
pub fn database_file() -> PathBuf {
    data_dir().join("events.db")
}

/// Scheduled notification queue (`data_dir()/notification_queue.json`).
#[must_use]
pub fn queue_file() -> PathBuf {
    data_dir().join("notification_queue.json")
}

/// Background worker delivery queue (`data_dir()/worker_queue.json`).
#[must_use]
pub fn worker_queue_file() -> PathBuf {
    data_dir().join("worker_queue.json")
}

/// Notification settings record (`config_dir()/notification_settings.json`).
#[must_use]
pub fn settings_file() -> PathBuf {
    config_dir().join("notification_settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_live_under_their_roots() {
        assert!(logs_dir().starts_with(data_dir()));
        assert!(database_file().starts_with(data_dir()));
        assert!(queue_file().starts_with(data_dir()));
        assert!(config_file().starts_with(config_dir()));
        assert!(settings_file().starts_with(config_dir()));
    }

    #[test]
    fn file_names_are_stable() {
        assert!(database_file().ends_with("events.db"));
        assert!(queue_file().ends_with("notification_queue.json"));
        assert!(config_file().ends_with("config.toml"));
    }
}

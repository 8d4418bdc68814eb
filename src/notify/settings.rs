//! Global notification settings, persisted as JSON.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::NotificationConfig;
use crate::events::store::write_json_atomic;
use crate::events::types::DeliveryMethod;
use crate::error::Result;

/// User-level notification preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Master switch. When off, nothing is delivered.
    pub enabled: bool,
    pub sound_enabled: bool,
    pub vibration_enabled: bool,
    /// Used when neither the call nor the event names any method.
    pub default_methods: BTreeSet<DeliveryMethod>,
    /// Normal-priority vibration pattern in milliseconds.
    pub vibration_pattern: Vec<u32>,
    /// Sound asset when the event names none.
    pub sound: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sound_enabled: true,
            vibration_enabled: true,
            default_methods: [DeliveryMethod::System, DeliveryMethod::Vibration]
                .into_iter()
                .collect(),
            vibration_pattern: vec![200, 100, 200],
            sound: "default".to_owned(),
            icon: Some("/icons/icon-192x192.png".to_owned()),
            badge: Some("/icons/badge-72x72.png".to_owned()),
        }
    }
}

impl NotificationSettings {
    /// Defaults seeded from the config file's notification section.
    #[must_use]
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            default_methods: config.default_methods.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Overlay the present fields of `patch`.
    pub fn merge(&mut self, patch: &SettingsPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(sound_enabled) = patch.sound_enabled {
            self.sound_enabled = sound_enabled;
        }
        if let Some(vibration_enabled) = patch.vibration_enabled {
            self.vibration_enabled = vibration_enabled;
        }
        if let Some(methods) = &patch.default_methods {
            self.default_methods = methods.clone();
        }
        if let Some(pattern) = &patch.vibration_pattern {
            self.vibration_pattern = pattern.clone();
        }
        if let Some(sound) = &patch.sound {
            self.sound = sound.clone();
        }
        if let Some(icon) = &patch.icon {
            self.icon = Some(icon.clone());
        }
        if let Some(badge) = &patch.badge {
            self.badge = Some(badge.clone());
        }
    }
}

/// Partial settings update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub enabled: Option<bool>,
    pub sound_enabled: Option<bool>,
    pub vibration_enabled: Option<bool>,
    pub default_methods: Option<BTreeSet<DeliveryMethod>>,
    pub vibration_pattern: Option<Vec<u32>>,
    pub sound: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
}

/// Where settings live. `None` keeps them in memory only.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    path: Option<PathBuf>,
}

impl SettingsStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load saved settings, or `defaults` if none are saved or the file is
    /// unreadable.
    #[must_use]
    pub fn load_or(&self, defaults: NotificationSettings) -> NotificationSettings {
        let Some(path) = &self.path else {
            return defaults;
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return defaults,
            Err(e) => {
                tracing::warn!("cannot read notification settings at {}: {e}", path.display());
                return defaults;
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(
                "ignoring malformed notification settings at {}: {e}",
                path.display()
            );
            defaults
        })
    }

    /// Persist `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, settings: &NotificationSettings) -> Result<()> {
        match &self.path {
            Some(path) => write_json_atomic(path, settings),
            None => Ok(()),
        }
    }
}

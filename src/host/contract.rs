//! Versioned host command/event envelopes for out-of-process callers.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Command set understood by the host bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "host.stop")]
    HostStop,
    #[serde(rename = "events.create")]
    EventsCreate,
    #[serde(rename = "events.get")]
    EventsGet,
    #[serde(rename = "events.search")]
    EventsSearch,
    #[serde(rename = "events.update")]
    EventsUpdate,
    #[serde(rename = "events.delete")]
    EventsDelete,
    #[serde(rename = "events.complete")]
    EventsComplete,
    #[serde(rename = "events.snooze")]
    EventsSnooze,
    #[serde(rename = "events.cancel")]
    EventsCancel,
    #[serde(rename = "events.pending")]
    EventsPending,
    #[serde(rename = "events.due")]
    EventsDue,
    #[serde(rename = "events.stats")]
    EventsStats,
    #[serde(rename = "events.export")]
    EventsExport,
    #[serde(rename = "events.import")]
    EventsImport,
    #[serde(rename = "events.cleanup")]
    EventsCleanup,
    #[serde(rename = "reminders.add")]
    RemindersAdd,
    #[serde(rename = "reminders.remove")]
    RemindersRemove,
    #[serde(rename = "reminders.list")]
    RemindersList,
    #[serde(rename = "reminders.update")]
    RemindersUpdate,
    #[serde(rename = "reminders.snooze")]
    RemindersSnooze,
    #[serde(rename = "reminders.complete")]
    RemindersComplete,
    #[serde(rename = "notifications.test")]
    NotificationsTest,
    #[serde(rename = "notifications.action")]
    NotificationsAction,
    #[serde(rename = "notifications.settings.get")]
    NotificationsSettingsGet,
    #[serde(rename = "notifications.settings.patch")]
    NotificationsSettingsPatch,
    #[serde(rename = "notifications.stats")]
    NotificationsStats,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::HostStop => "host.stop",
            Self::EventsCreate => "events.create",
            Self::EventsGet => "events.get",
            Self::EventsSearch => "events.search",
            Self::EventsUpdate => "events.update",
            Self::EventsDelete => "events.delete",
            Self::EventsComplete => "events.complete",
            Self::EventsSnooze => "events.snooze",
            Self::EventsCancel => "events.cancel",
            Self::EventsPending => "events.pending",
            Self::EventsDue => "events.due",
            Self::EventsStats => "events.stats",
            Self::EventsExport => "events.export",
            Self::EventsImport => "events.import",
            Self::EventsCleanup => "events.cleanup",
            Self::RemindersAdd => "reminders.add",
            Self::RemindersRemove => "reminders.remove",
            Self::RemindersList => "reminders.list",
            Self::RemindersUpdate => "reminders.update",
            Self::RemindersSnooze => "reminders.snooze",
            Self::RemindersComplete => "reminders.complete",
            Self::NotificationsTest => "notifications.test",
            Self::NotificationsAction => "notifications.action",
            Self::NotificationsSettingsGet => "notifications.settings.get",
            Self::NotificationsSettingsPatch => "notifications.settings.patch",
            Self::NotificationsStats => "notifications.stats",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(raw.to_owned())).ok()
    }

    /// Commands that mutate events or notifications.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            Self::HostPing
                | Self::HostVersion
                | Self::HostStop
                | Self::EventsGet
                | Self::EventsSearch
                | Self::EventsPending
                | Self::EventsDue
                | Self::EventsStats
                | Self::EventsExport
                | Self::RemindersList
                | Self::NotificationsSettingsGet
                | Self::NotificationsStats
        )
    }
}

/// A versioned response envelope from host -> caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from caller -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned event envelope from host -> caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope with a fresh id.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: uuid::Uuid::new_v4().to_string(),
            event: event.into(),
            payload,
        }
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

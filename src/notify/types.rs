//! Notification records, actions and delivery outcomes.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::types::{
    CATEGORY_BLOOD_PRESSURE, CATEGORY_MEDICATION, DeliveryMethod, Event, Priority,
    is_synthetic_event,
};

/// An action a user can take on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationAction {
    Complete,
    /// Medication taken.
    Taken,
    /// Measurement recorded.
    Measured,
    Snooze,
    View,
    Dismiss,
    /// Anything a client sent that the engine does not know.
    Other(String),
}

impl NotificationAction {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Complete => "complete",
            Self::Taken => "taken",
            Self::Measured => "measured",
            Self::Snooze => "snooze",
            Self::View => "view",
            Self::Dismiss => "dismiss",
            Self::Other(raw) => raw,
        }
    }

    /// Returns `true` for actions that mark the event done.
    #[must_use]
    pub fn completes_event(&self) -> bool {
        matches!(self, Self::Complete | Self::Taken | Self::Measured)
    }
}

impl From<String> for NotificationAction {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "complete" => Self::Complete,
            "taken" => Self::Taken,
            "measured" => Self::Measured,
            "snooze" => Self::Snooze,
            "view" => Self::View,
            "dismiss" => Self::Dismiss,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for NotificationAction {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_owned())
    }
}

impl From<NotificationAction> for String {
    fn from(action: NotificationAction) -> Self {
        match action {
            NotificationAction::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl std::fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub action: NotificationAction,
    pub title: String,
}

impl ActionButton {
    #[must_use]
    pub fn new(action: NotificationAction, title: impl Into<String>) -> Self {
        Self {
            action,
            title: title.into(),
        }
    }
}

/// Default buttons for a category. Medication gets "taken" and blood
/// pressure gets "measured" ahead of the generic complete/snooze pair.
#[must_use]
pub fn default_actions(category: &str) -> Vec<ActionButton> {
    let mut actions = Vec::with_capacity(3);
    match category {
        CATEGORY_MEDICATION => {
            actions.push(ActionButton::new(NotificationAction::Taken, "Taken"));
        }
        CATEGORY_BLOOD_PRESSURE => {
            actions.push(ActionButton::new(NotificationAction::Measured, "Measured"));
        }
        _ => {}
    }
    actions.push(ActionButton::new(NotificationAction::Complete, "Mark Complete"));
    actions.push(ActionButton::new(NotificationAction::Snooze, "Snooze 15min"));
    actions
}

/// Correlation data carried by system notifications and worker messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationData {
    pub notification_id: Option<String>,
    pub event_id: Option<String>,
    pub category: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// What an OS notification surface (or the background worker) is asked to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub badge: Option<String>,
    pub tag: String,
    #[serde(default)]
    pub require_interaction: bool,
    #[serde(default)]
    pub vibrate: Option<Vec<u32>>,
    #[serde(default)]
    pub actions: Vec<ActionButton>,
    #[serde(default)]
    pub data: NotificationData,
}

/// What an in-page modal presenter is asked to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModalRequest {
    pub notification_id: String,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub actions: Vec<ActionButton>,
    /// `None` keeps the modal until the user acts.
    pub auto_dismiss: Option<Duration>,
}

/// Explicit per-call overrides for a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationOptions {
    pub methods: Option<BTreeSet<DeliveryMethod>>,
    pub priority: Option<Priority>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
    pub require_interaction: Option<bool>,
    pub vibrate: Option<Vec<u32>>,
    pub sound: Option<String>,
    pub actions: Option<Vec<ActionButton>>,
}

impl NotificationOptions {
    /// Restrict delivery to `methods`.
    #[must_use]
    pub fn methods(methods: impl IntoIterator<Item = DeliveryMethod>) -> Self {
        Self {
            methods: Some(methods.into_iter().collect()),
            ..Self::default()
        }
    }
}

/// An active notification. Lives from delivery until an action, a close or
/// an all-channels-failed fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: String,
    /// Weak reference; the event may have been deleted since.
    pub event_id: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: String,
    pub priority: Priority,
    pub methods: BTreeSet<DeliveryMethod>,
    pub require_interaction: bool,
    pub vibrate: Vec<u32>,
    pub sound: String,
    pub actions: Vec<ActionButton>,
}

impl Notification {
    /// Generate a new notification id.
    #[must_use]
    pub fn new_id() -> String {
        format!("notification_{}", uuid::Uuid::new_v4().simple())
    }

    /// Tag used when the caller supplies none.
    #[must_use]
    pub fn default_tag(event: &Event) -> String {
        format!("event_{}", event.id)
    }

    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        is_synthetic_event(&self.event_id, &self.category)
    }

    /// Correlation data for surfaces and worker messages.
    #[must_use]
    pub fn data(&self) -> NotificationData {
        NotificationData {
            notification_id: Some(self.id.clone()),
            event_id: Some(self.event_id.clone()),
            category: Some(self.category.clone()),
            timestamp: Some(self.created_at),
        }
    }

    /// Request for an OS notification surface.
    #[must_use]
    pub fn to_request(&self) -> NotificationRequest {
        NotificationRequest {
            title: self.title.clone(),
            body: self.body.clone(),
            icon: self.icon.clone(),
            badge: self.badge.clone(),
            tag: self.tag.clone(),
            require_interaction: self.require_interaction,
            vibrate: Some(self.vibrate.clone()),
            actions: self.actions.clone(),
            data: self.data(),
        }
    }

    /// Request for the in-page modal. High priority stays until acted on.
    #[must_use]
    pub fn to_modal(&self, timeout: Duration) -> ModalRequest {
        ModalRequest {
            notification_id: self.id.clone(),
            title: self.title.clone(),
            body: self.body.clone(),
            priority: self.priority,
            actions: self.actions.clone(),
            auto_dismiss: (self.priority != Priority::High).then_some(timeout),
        }
    }

    /// Text for the blocking last-resort alert.
    #[must_use]
    pub fn alert_text(&self) -> String {
        format!(
            "{}\n\n{}\n\nTime: {}",
            self.title,
            self.body,
            self.created_at.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

/// Why a channel did not deliver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ChannelError {
    #[error("not supported: {0}")]
    Unsupported(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("failed: {0}")]
    Failed(String),
}

impl ChannelError {
    /// Timeouts and plain failures may succeed on a retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Failed(_))
    }
}

/// One channel's failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelFailure {
    pub method: DeliveryMethod,
    pub error: ChannelError,
}

impl std::fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.method, self.error)
    }
}

/// Outcome of one delivery attempt across every requested channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub notification_id: String,
    pub delivered: Vec<DeliveryMethod>,
    pub failures: Vec<ChannelFailure>,
    /// The blocking alert fired because nothing else did.
    pub fallback_alert: bool,
    /// Notifications are disabled globally or for this event.
    pub suppressed: bool,
}

impl DeliveryReport {
    #[must_use]
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Result of handling a notification action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The event was completed or snoozed.
    Applied { event: Box<Event> },
    /// The event was deleted or synthetic; success was simulated.
    Simulated,
    /// View or dismiss; nothing to mutate.
    Acknowledged,
    /// The action name was not recognised.
    Unrecognized,
    /// No active notification had this id.
    UnknownNotification,
}

/// Ephemeral handle for a timed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleHandle(pub u64);

/// What [`crate::notify::NotificationDispatcher::schedule_notification`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// Due now or overdue; shown immediately.
    Delivered { report: DeliveryReport },
    /// Timer armed and persisted.
    Scheduled { handle: ScheduleHandle },
}

/// Dispatcher lifecycle broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatcherEvent {
    Sent {
        notification_id: String,
        event_id: String,
        delivered: Vec<DeliveryMethod>,
    },
    FallbackAlert {
        notification_id: String,
        event_id: String,
    },
    ActionHandled {
        notification_id: String,
        event_id: String,
        action: NotificationAction,
        outcome: ActionOutcome,
    },
    Closed {
        notification_id: String,
    },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn category_actions_lead_with_specific_button() {
        let meds = default_actions(CATEGORY_MEDICATION);
        assert_eq!(meds[0].action, NotificationAction::Taken);
        assert_eq!(meds.len(), 3);

        let bp = default_actions(CATEGORY_BLOOD_PRESSURE);
        assert_eq!(bp[0].action, NotificationAction::Measured);

        let general = default_actions("general");
        assert_eq!(
            general.iter().map(|a| a.action.clone()).collect::<Vec<_>>(),
            vec![NotificationAction::Complete, NotificationAction::Snooze]
        );
        assert_eq!(general[1].title, "Snooze 15min");
    }

    #[test]
    fn action_names_parse_and_keep_unknowns() {
        assert_eq!(NotificationAction::from("Taken"), NotificationAction::Taken);
        assert!(NotificationAction::from("measured").completes_event());
        let unknown: NotificationAction = serde_json::from_str("\"later\"").unwrap();
        assert_eq!(unknown, NotificationAction::Other("later".to_owned()));
        assert_eq!(serde_json::to_string(&unknown).unwrap(), "\"later\"");
    }

    #[test]
    fn transient_errors() {
        assert!(ChannelError::Timeout(5).is_transient());
        assert!(ChannelError::Failed("x".to_owned()).is_transient());
        assert!(!ChannelError::PermissionDenied("x".to_owned()).is_transient());
        assert!(!ChannelError::Unsupported("x".to_owned()).is_transient());
    }
}

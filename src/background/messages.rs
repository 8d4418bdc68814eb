//! Typed messages between the background coordinator and foreground clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::types::Event;
use crate::notify::types::{NotificationAction, NotificationData, NotificationRequest};

/// Identifies one connected foreground client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Client to worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Queue a system notification for `event` at `delivery_time`.
    ScheduleNotification {
        event: Event,
        delivery_time: DateTime<Utc>,
    },
    /// Drop queued deliveries and close shown notifications with `tag`.
    CancelNotification { tag: String },
    /// The client gained or lost focus.
    ClientFocus { client_id: ClientId, focused: bool },
}

/// Worker to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// A due notification for a focused client to show in-app.
    ShowInAppNotification { payload: NotificationRequest },
    /// The user clicked a system notification.
    NotificationAction {
        action: NotificationAction,
        data: NotificationData,
        tag: String,
    },
    /// Look for due events and notify.
    CheckDueEvents,
    /// Refresh local event state.
    SyncHealthEvents,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn messages_use_snake_case_type_tags() {
        let json = serde_json::to_value(ClientMessage::CancelNotification {
            tag: "event_1".to_owned(),
        })
        .unwrap();
        assert_eq!(json["type"], "cancel_notification");

        let parsed: WorkerMessage = serde_json::from_str(r#"{"type":"check_due_events"}"#).unwrap();
        assert_eq!(parsed, WorkerMessage::CheckDueEvents);
    }

    #[test]
    fn action_message_accepts_unknown_actions() {
        let parsed: WorkerMessage = serde_json::from_str(
            r#"{"type":"notification_action","action":"later","data":{"event_id":"event_1"},"tag":"event_event_1"}"#,
        )
        .unwrap();
        match parsed {
            WorkerMessage::NotificationAction { action, data, .. } => {
                assert_eq!(action, NotificationAction::Other("later".to_owned()));
                assert_eq!(data.event_id.as_deref(), Some("event_1"));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}

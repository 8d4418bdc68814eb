//! Foreground side of the worker channel.
//!
//! A [`ForegroundClient`] receives [`WorkerMessage`]s from the coordinator
//! and applies them through the scheduler and dispatcher it was built with.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::messages::WorkerMessage;
use crate::error::{CarebellError, Result};
use crate::events::scheduler::EventScheduler;
use crate::events::types::DeliveryMethod;
use crate::notify::dispatcher::NotificationDispatcher;
use crate::notify::types::{
    ActionOutcome, NotificationAction, NotificationData, NotificationOptions, NotificationRequest,
};

/// What a client did with one worker message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reaction", rename_all = "snake_case")]
pub enum ClientReaction {
    /// Shown as an in-app notification.
    Shown { notification_id: String },
    /// An action was applied or simulated.
    Action { outcome: ActionOutcome },
    /// Due events were checked and this many notifications raised.
    DueChecked { notified: usize },
    /// Local state refreshed; this many expired events were cleaned up.
    Synced { removed: usize },
    /// Nothing to do.
    Ignored,
}

/// Applies worker messages to local state.
#[derive(Clone)]
pub struct ForegroundClient {
    scheduler: Arc<EventScheduler>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl ForegroundClient {
    pub fn new(scheduler: Arc<EventScheduler>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            scheduler,
            dispatcher,
        }
    }

    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Scheduler errors for real events and total delivery failure.
    pub async fn handle(&self, message: WorkerMessage) -> Result<ClientReaction> {
        match message {
            WorkerMessage::ShowInAppNotification { payload } => self.show_in_app(&payload).await,
            WorkerMessage::NotificationAction { action, data, tag } => {
                tracing::debug!(%action, %tag, "notification action from worker");
                self.apply_action(action, &data).await
            }
            WorkerMessage::CheckDueEvents => self.check_due_events().await,
            WorkerMessage::SyncHealthEvents => {
                let removed = self.scheduler.cleanup_expired_events()?;
                Ok(ClientReaction::Synced { removed })
            }
        }
    }

    async fn show_in_app(&self, payload: &NotificationRequest) -> Result<ClientReaction> {
        let Some(event_id) = payload.data.event_id.as_deref() else {
            tracing::debug!(tag = %payload.tag, "in-app payload without an event id");
            return Ok(ClientReaction::Ignored);
        };
        let event = match self.scheduler.get_event(event_id) {
            Ok(event) => event,
            Err(CarebellError::NotFound { .. }) => return Ok(ClientReaction::Ignored),
            Err(e) => return Err(e),
        };
        let options = NotificationOptions {
            title: Some(payload.title.clone()),
            body: Some(payload.body.clone()),
            tag: Some(payload.tag.clone()),
            actions: (!payload.actions.is_empty()).then(|| payload.actions.clone()),
            ..NotificationOptions::methods([DeliveryMethod::Visual, DeliveryMethod::Sound])
        };
        let notification_id = self.dispatcher.show_notification(&event, options).await?;
        Ok(ClientReaction::Shown { notification_id })
    }

    async fn apply_action(
        &self,
        action: NotificationAction,
        data: &NotificationData,
    ) -> Result<ClientReaction> {
        if let Some(notification_id) = data.notification_id.as_deref() {
            let outcome = self
                .dispatcher
                .handle_notification_action(notification_id, action.clone())
                .await?;
            if outcome != ActionOutcome::UnknownNotification {
                return Ok(ClientReaction::Action { outcome });
            }
        }

        // The notification is no longer active here, e.g. raised before a
        // restart. Fall back to the event id it carried.
        let Some(event_id) = data.event_id.as_deref() else {
            tracing::warn!(%action, "notification action without an event id");
            return Ok(ClientReaction::Ignored);
        };
        let category = data.category.as_deref().unwrap_or_default();
        let outcome = self
            .dispatcher
            .apply_event_action(event_id, category, &action)?;
        Ok(ClientReaction::Action { outcome })
    }

    async fn check_due_events(&self) -> Result<ClientReaction> {
        let mut notified = 0;
        for event in self.scheduler.get_overdue_events()? {
            if self.dispatcher.active_for_event(&event.id).is_some() {
                continue;
            }
            self.dispatcher
                .show_notification(&event, NotificationOptions::default())
                .await?;
            notified += 1;
        }
        Ok(ClientReaction::DueChecked { notified })
    }

    /// Drain `inbound` until the coordinator drops the sender.
    pub fn spawn(self, mut inbound: mpsc::UnboundedReceiver<WorkerMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                match self.handle(message).await {
                    Ok(reaction) => tracing::debug!(?reaction, "worker message handled"),
                    Err(e) => tracing::warn!("worker message failed: {e}"),
                }
            }
            tracing::debug!("worker channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use chrono::Utc;

    use super::*;
    use crate::events::store::ListEventStore;
    use crate::events::types::{EventInput, EventStatus};
    use crate::platform::recording::RecordingPlatform;

    fn client(rec: &RecordingPlatform) -> (Arc<EventScheduler>, Arc<NotificationDispatcher>, ForegroundClient) {
        let scheduler = Arc::new(EventScheduler::new(Arc::new(ListEventStore::in_memory())));
        let dispatcher = Arc::new(
            NotificationDispatcher::new(rec.platform()).with_scheduler(Arc::clone(&scheduler)),
        );
        let client = ForegroundClient::new(Arc::clone(&scheduler), Arc::clone(&dispatcher));
        (scheduler, dispatcher, client)
    }

    #[tokio::test]
    async fn action_for_unknown_notification_falls_back_to_event_id() {
        let rec = RecordingPlatform::new();
        let (scheduler, _dispatcher, client) = client(&rec);
        let event = scheduler.create_event(EventInput::at("Pill", Utc::now())).unwrap();

        let reaction = client
            .handle(WorkerMessage::NotificationAction {
                action: NotificationAction::Complete,
                data: NotificationData {
                    notification_id: Some("notification_gone".to_owned()),
                    event_id: Some(event.id.clone()),
                    ..NotificationData::default()
                },
                tag: format!("event_{}", event.id),
            })
            .await
            .unwrap();
        assert!(matches!(
            reaction,
            ClientReaction::Action {
                outcome: ActionOutcome::Applied { .. }
            }
        ));
        assert_eq!(
            scheduler.get_event(&event.id).unwrap().status,
            EventStatus::Completed
        );
    }

    #[tokio::test]
    async fn action_for_active_notification_goes_through_dispatcher() {
        let rec = RecordingPlatform::new();
        let (scheduler, dispatcher, client) = client(&rec);
        let event = scheduler.create_event(EventInput::at("Pill", Utc::now())).unwrap();
        let id = dispatcher
            .show_notification(&event, NotificationOptions::default())
            .await
            .unwrap();

        client
            .handle(WorkerMessage::NotificationAction {
                action: NotificationAction::Snooze,
                data: NotificationData {
                    notification_id: Some(id),
                    event_id: Some(event.id.clone()),
                    ..NotificationData::default()
                },
                tag: String::new(),
            })
            .await
            .unwrap();
        assert!(dispatcher.active_notifications().is_empty());
        assert_eq!(scheduler.get_event(&event.id).unwrap().metadata.snooze_count, 1);
    }

    #[tokio::test]
    async fn due_check_skips_events_already_notified() {
        let rec = RecordingPlatform::new();
        let (scheduler, _dispatcher, client) = client(&rec);
        scheduler
            .create_event(EventInput::at("Pill", Utc::now() - chrono::Duration::minutes(1)))
            .unwrap();

        let first = client.handle(WorkerMessage::CheckDueEvents).await.unwrap();
        let second = client.handle(WorkerMessage::CheckDueEvents).await.unwrap();
        assert_eq!(first, ClientReaction::DueChecked { notified: 1 });
        assert_eq!(second, ClientReaction::DueChecked { notified: 0 });
    }

    #[tokio::test]
    async fn in_app_payload_for_missing_event_is_ignored() {
        let rec = RecordingPlatform::new();
        let (_scheduler, _dispatcher, client) = client(&rec);
        let payload = NotificationRequest {
            title: "Pill".to_owned(),
            body: String::new(),
            icon: None,
            badge: None,
            tag: "event_gone".to_owned(),
            require_interaction: false,
            vibrate: None,
            actions: Vec::new(),
            data: NotificationData {
                event_id: Some("event_gone".to_owned()),
                ..NotificationData::default()
            },
        };
        let reaction = client
            .handle(WorkerMessage::ShowInAppNotification { payload })
            .await
            .unwrap();
        assert_eq!(reaction, ClientReaction::Ignored);
    }
}

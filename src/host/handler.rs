//! Production host command handler backed by the scheduler and dispatcher.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::commands::{
    AddEventRequest, CompleteRequest, ListPendingRequest, RemoveEventRequest, ReminderCommands,
    SnoozeRequest, UpdateEventRequest,
};
use crate::error::Result;
use crate::events::listeners::{LifecycleEvent, LifecycleKind, ListenerId};
use crate::events::scheduler::EventScheduler;
use crate::events::types::{
    Event, EventExport, EventInput, EventPatch, EventStatistics, EventStatus, SearchCriteria,
};
use crate::host::channel::ReminderHostHandler;
use crate::host::contract::EventEnvelope;
use crate::notify::dispatcher::{DispatcherStatistics, NotificationDispatcher};
use crate::notify::settings::{NotificationSettings, SettingsPatch};
use crate::notify::types::{ActionOutcome, DeliveryReport, DispatcherEvent, NotificationAction};

/// Serves host commands against a live scheduler and dispatcher.
///
/// Scheduler lifecycle changes and dispatcher events are re-published as
/// [`EventEnvelope`]s on the shared broadcast channel.
pub struct CarebellHostHandler {
    scheduler: Arc<EventScheduler>,
    dispatcher: Arc<NotificationDispatcher>,
    commands: ReminderCommands,
    event_tx: broadcast::Sender<EventEnvelope>,
    listener_ids: Vec<ListenerId>,
    event_bridge_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CarebellHostHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarebellHostHandler")
            .field("listeners", &self.listener_ids.len())
            .finish_non_exhaustive()
    }
}

impl CarebellHostHandler {
    pub fn new(
        scheduler: Arc<EventScheduler>,
        dispatcher: Arc<NotificationDispatcher>,
        event_tx: broadcast::Sender<EventEnvelope>,
    ) -> Self {
        let commands =
            ReminderCommands::new(Arc::clone(&scheduler)).with_dispatcher(Arc::clone(&dispatcher));

        let listener_ids = [
            LifecycleKind::EventCreated,
            LifecycleKind::EventUpdated,
            LifecycleKind::EventDeleted,
        ]
        .into_iter()
        .map(|kind| {
            let tx = event_tx.clone();
            scheduler.add_listener(kind, move |change| {
                let (name, payload) = map_lifecycle_event(change)?;
                let _ = tx.send(EventEnvelope::new(name, payload));
                Ok(())
            })
        })
        .collect();

        Self {
            scheduler,
            dispatcher,
            commands,
            event_tx,
            listener_ids,
            event_bridge_handle: Mutex::new(None),
        }
    }

    /// Start forwarding dispatcher events. Must be called inside a tokio
    /// runtime; calling it again restarts the bridge.
    pub fn start_event_bridge(&self) {
        let mut dispatcher_rx = self.dispatcher.subscribe();
        let tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                match dispatcher_rx.recv().await {
                    Ok(event) => match map_dispatcher_event(&event) {
                        Ok((name, payload)) => {
                            let _ = tx.send(EventEnvelope::new(name, payload));
                        }
                        Err(e) => warn!(error = %e, "failed to serialize dispatcher event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged = n, "dispatcher event bridge lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let previous = self
            .event_bridge_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!("dispatcher event bridge started");
    }

    /// Drop stale timers for `event` and arm one for its next due time.
    async fn rearm(&self, event: &Event) {
        let cancelled = self.dispatcher.cancel_for_event(&event.id);
        let now = Utc::now();
        let due = event
            .due_at()
            .filter(|due| *due > now && event.status == EventStatus::Pending);
        match due {
            Some(due) if event.notifications.enabled => {
                if let Err(e) = self.dispatcher.schedule_notification_at(event, due, now).await {
                    warn!(event_id = %event.id, error = %e, "could not schedule notification");
                }
            }
            _ if cancelled > 0 => {
                info!(event_id = %event.id, cancelled, "scheduled notifications dropped");
            }
            _ => {}
        }
    }
}

impl Drop for CarebellHostHandler {
    fn drop(&mut self) {
        for id in self.listener_ids.drain(..) {
            self.scheduler.remove_listener(id);
        }
        if let Some(handle) = self
            .event_bridge_handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn map_lifecycle_event(change: &LifecycleEvent) -> anyhow::Result<(&'static str, serde_json::Value)> {
    let name = match change.kind() {
        LifecycleKind::EventCreated => "event.created",
        LifecycleKind::EventUpdated => "event.updated",
        LifecycleKind::EventDeleted => "event.deleted",
    };
    Ok((name, serde_json::to_value(change)?))
}

fn map_dispatcher_event(
    event: &DispatcherEvent,
) -> serde_json::Result<(&'static str, serde_json::Value)> {
    let name = match event {
        DispatcherEvent::Sent { .. } => "notification.sent",
        DispatcherEvent::FallbackAlert { .. } => "notification.fallback_alert",
        DispatcherEvent::ActionHandled { .. } => "notification.action_handled",
        DispatcherEvent::Closed { .. } => "notification.closed",
    };
    Ok((name, serde_json::to_value(event)?))
}

#[async_trait]
impl ReminderHostHandler for CarebellHostHandler {
    async fn create_event(&self, input: EventInput) -> Result<Event> {
        let input = match input.created_by {
            Some(_) => input,
            None => input.created_by("host"),
        };
        let event = self.scheduler.create_event(input)?;
        self.rearm(&event).await;
        Ok(event)
    }

    fn get_event(&self, id: &str) -> Result<Event> {
        self.scheduler.get_event(id)
    }

    fn search_events(&self, criteria: &SearchCriteria) -> Result<Vec<Event>> {
        self.scheduler.search_events(criteria)
    }

    async fn update_event(&self, id: &str, patch: EventPatch) -> Result<Event> {
        let event = self.scheduler.update_event(id, patch)?;
        self.rearm(&event).await;
        Ok(event)
    }

    async fn delete_event(&self, id: &str) -> Result<bool> {
        self.dispatcher.cancel_for_event(id);
        self.scheduler.delete_event(id)
    }

    async fn complete_event(&self, id: &str) -> Result<Event> {
        let event = self.scheduler.complete_event(id)?;
        self.rearm(&event).await;
        Ok(event)
    }

    async fn snooze_event(&self, id: &str, minutes: Option<u32>) -> Result<Event> {
        let minutes = minutes.unwrap_or_else(|| self.dispatcher.policy().snooze_minutes);
        let event = self.scheduler.snooze_event(id, minutes)?;
        self.rearm(&event).await;
        Ok(event)
    }

    async fn cancel_event(&self, id: &str) -> Result<Event> {
        let event = self.scheduler.cancel_event(id)?;
        self.rearm(&event).await;
        Ok(event)
    }

    fn pending_events(&self) -> Result<Vec<Event>> {
        self.scheduler.get_pending_events()
    }

    fn events_due(&self, within_minutes: u32) -> Result<Vec<Event>> {
        self.scheduler.get_events_due(within_minutes)
    }

    fn event_statistics(&self) -> Result<EventStatistics> {
        self.scheduler.statistics()
    }

    fn export_events(&self) -> Result<EventExport> {
        self.scheduler.export_events()
    }

    fn import_events(&self, data: &serde_json::Value) -> Result<Vec<Event>> {
        self.scheduler.import_events(data)
    }

    fn cleanup_expired_events(&self) -> Result<usize> {
        self.scheduler.cleanup_expired_events()
    }

    async fn reminder_add(&self, request: AddEventRequest) -> Result<String> {
        self.commands.add_event(request).await
    }

    async fn reminder_remove(&self, request: RemoveEventRequest) -> Result<String> {
        self.commands.remove_event(request).await
    }

    fn reminder_list(&self, request: &ListPendingRequest) -> Result<String> {
        self.commands.list_pending(request)
    }

    fn reminder_update(&self, request: UpdateEventRequest) -> Result<String> {
        self.commands.update_event(request)
    }

    fn reminder_snooze(&self, request: &SnoozeRequest) -> Result<String> {
        self.commands.snooze_event(request)
    }

    fn reminder_complete(&self, request: &CompleteRequest) -> Result<String> {
        self.commands.mark_complete(request)
    }

    async fn test_notification(&self) -> Result<DeliveryReport> {
        self.dispatcher.test_notification().await
    }

    async fn notification_action(
        &self,
        notification_id: &str,
        action: NotificationAction,
    ) -> Result<ActionOutcome> {
        self.dispatcher
            .handle_notification_action(notification_id, action)
            .await
    }

    fn notification_settings(&self) -> Result<NotificationSettings> {
        Ok(self.dispatcher.settings())
    }

    fn patch_notification_settings(&self, patch: &SettingsPatch) -> Result<NotificationSettings> {
        self.dispatcher.update_settings(patch)
    }

    async fn notification_statistics(&self) -> Result<DispatcherStatistics> {
        Ok(self.dispatcher.statistics().await)
    }
}

//! Long-lived background delivery coordinator.
//!
//! Outlives any single foreground client. It keeps its own persisted queue
//! of timed deliveries, decides per delivery whether a focused client can
//! show it in-app or whether it needs an OS notification, and routes
//! notification clicks back to a live client.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::messages::{ClientId, ClientMessage, WorkerMessage};
use crate::config::BackgroundConfig;
use crate::events::types::Event;
use crate::notify::delivery::build_notification;
use crate::notify::queue::{DeliveryQueueStore, ScheduledDelivery};
use crate::notify::settings::{NotificationSettings, SettingsStore};
use crate::notify::types::{
    ActionButton, Notification, NotificationAction, NotificationData, NotificationOptions,
    NotificationRequest,
};
use crate::platform::{NotificationSurface, PermissionState};

/// Opens a new foreground client when a click arrives and none is
/// connected. The new client is expected to [`BackgroundCoordinator::connect`].
#[async_trait]
pub trait ClientLauncher: Send + Sync {
    async fn open_client(&self) -> anyhow::Result<()>;
}

/// A system notification the user closed without acting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dismissal {
    pub tag: String,
    pub dismissed_at: DateTime<Utc>,
}

/// How a due delivery reached the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryRoute {
    InApp(ClientId),
    System,
}

/// What happened to a notification click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickRoute {
    /// Sent to a connected client.
    Client(ClientId),
    /// Held for a client the launcher is opening.
    AwaitingClient,
    /// No client could be reached; only logged.
    Logged,
}

/// Buttons on notifications the coordinator raises itself.
#[must_use]
pub fn background_actions() -> Vec<ActionButton> {
    vec![
        ActionButton::new(NotificationAction::Complete, "Mark Complete"),
        ActionButton::new(NotificationAction::Snooze, "Snooze 15min"),
        ActionButton::new(NotificationAction::View, "View"),
    ]
}

struct ClientSlot {
    focused: bool,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

#[derive(Default)]
struct State {
    clients: BTreeMap<ClientId, ClientSlot>,
    pending_clicks: Vec<WorkerMessage>,
    /// Latest dismissal per tag.
    dismissals: BTreeMap<String, DateTime<Utc>>,
}

struct QueueEntry {
    record: ScheduledDelivery,
    timer: AbortHandle,
}

/// Background delivery coordinator.
pub struct BackgroundCoordinator {
    surface: Arc<dyn NotificationSurface>,
    launcher: Option<Arc<dyn ClientLauncher>>,
    check_interval: Duration,
    settings_store: SettingsStore,
    default_settings: NotificationSettings,
    state: Mutex<State>,
    queue: Mutex<BTreeMap<u64, QueueEntry>>,
    queue_store: DeliveryQueueStore,
    next_id: AtomicU64,
}

impl BackgroundCoordinator {
    /// Coordinator raising OS notifications on `surface`.
    pub fn new(surface: Arc<dyn NotificationSurface>, queue_store: DeliveryQueueStore) -> Self {
        Self {
            surface,
            launcher: None,
            check_interval: Duration::from_secs(BackgroundConfig::default().check_interval_secs),
            settings_store: SettingsStore::in_memory(),
            default_settings: NotificationSettings::default(),
            state: Mutex::new(State::default()),
            queue: Mutex::new(BTreeMap::new()),
            queue_store,
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn ClientLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(Duration::from_secs(1));
        self
    }

    /// Read notification settings from `store` at each delivery, so changes
    /// saved by the dispatcher apply here too.
    #[must_use]
    pub fn with_settings_store(
        mut self,
        store: SettingsStore,
        defaults: NotificationSettings,
    ) -> Self {
        self.settings_store = store;
        self.default_settings = defaults;
        self
    }

    #[must_use]
    pub fn settings(&self) -> NotificationSettings {
        self.settings_store.load_or(self.default_settings.clone())
    }

    // ── clients ──────────────────────────────────────────────────────────────

    /// Register a foreground client. Clicks held for a client being opened
    /// are flushed to it.
    pub fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<WorkerMessage>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock_state();
        for message in state.pending_clicks.drain(..) {
            let _ = tx.send(message);
        }
        state.clients.insert(id, ClientSlot { focused: false, tx });
        tracing::info!(client = %id, "client connected");
        (id, rx)
    }

    pub fn disconnect(&self, id: ClientId) {
        if self.lock_state().clients.remove(&id).is_some() {
            tracing::info!(client = %id, "client disconnected");
        }
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.lock_state().clients.len()
    }

    fn set_focus(&self, id: ClientId, focused: bool) {
        match self.lock_state().clients.get_mut(&id) {
            Some(slot) => slot.focused = focused,
            None => tracing::debug!(client = %id, "focus change from unknown client"),
        }
    }

    /// Send to `id`, dropping the client if its receiver is gone.
    fn send_to(&self, id: ClientId, message: WorkerMessage) -> bool {
        let mut state = self.lock_state();
        let sent = state
            .clients
            .get(&id)
            .is_some_and(|slot| slot.tx.send(message).is_ok());
        if !sent {
            state.clients.remove(&id);
        }
        sent
    }

    fn focused_client(&self) -> Option<ClientId> {
        self.lock_state()
            .clients
            .iter()
            .find(|(_, slot)| slot.focused)
            .map(|(id, _)| *id)
    }

    fn first_client(&self) -> Option<ClientId> {
        let state = self.lock_state();
        state
            .clients
            .iter()
            .find(|(_, slot)| slot.focused)
            .or_else(|| state.clients.iter().next())
            .map(|(id, _)| *id)
    }

    // ── messages ─────────────────────────────────────────────────────────────

    /// Handle one message from a client.
    pub async fn handle_client_message(self: &Arc<Self>, message: ClientMessage) {
        match message {
            ClientMessage::ScheduleNotification {
                event,
                delivery_time,
            } => self.schedule(event, delivery_time, Utc::now()).await,
            ClientMessage::CancelNotification { tag } => {
                self.cancel_tag(&tag).await;
            }
            ClientMessage::ClientFocus { client_id, focused } => self.set_focus(client_id, focused),
        }
    }

    /// Queue a delivery, or deliver now if `delivery_time` has passed.
    pub async fn schedule(
        self: &Arc<Self>,
        event: Event,
        delivery_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let record = ScheduledDelivery {
            event,
            delivery_time,
            scheduled_at: now,
        };
        match (delivery_time - now).to_std() {
            Ok(delay) if !delay.is_zero() => {
                self.enqueue(record, delay);
                self.persist_queue();
            }
            _ => {
                self.deliver_event(&record.event).await;
            }
        }
    }

    fn enqueue(self: &Arc<Self>, record: ScheduledDelivery, delay: Duration) -> bool {
        let mut queue = self.lock_queue();
        if queue.values().any(|entry| entry.record.same_slot(&record)) {
            return false;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(coordinator) = weak.upgrade() {
                coordinator.fire(id).await;
            }
        })
        .abort_handle();
        tracing::debug!(event_id = %record.event.id, delivery_time = %record.delivery_time, "delivery queued");
        queue.insert(id, QueueEntry { record, timer });
        true
    }

    async fn fire(&self, id: u64) {
        let Some(entry) = self.lock_queue().remove(&id) else {
            return;
        };
        self.persist_queue();
        self.deliver_event(&entry.record.event).await;
    }

    /// Drop queued deliveries for `tag` and close shown notifications.
    /// Returns how many queued deliveries were dropped.
    pub async fn cancel_tag(&self, tag: &str) -> usize {
        let removed: Vec<QueueEntry> = {
            let mut queue = self.lock_queue();
            let ids: Vec<u64> = queue
                .iter()
                .filter(|(_, entry)| Notification::default_tag(&entry.record.event) == tag)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| queue.remove(id)).collect()
        };
        for entry in &removed {
            entry.timer.abort();
        }
        if !removed.is_empty() {
            self.persist_queue();
        }
        if let Err(e) = self.surface.close_tag(tag).await {
            tracing::debug!(%tag, "closing shown notifications failed: {e:#}");
        }
        removed.len()
    }

    /// Queued deliveries, soonest first.
    #[must_use]
    pub fn queued(&self) -> Vec<ScheduledDelivery> {
        let mut records: Vec<ScheduledDelivery> = self
            .lock_queue()
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by_key(|r| r.delivery_time);
        records
    }

    /// Reload the persisted queue: re-arm future deliveries and deliver
    /// overdue ones. Returns `(rearmed, delivered)`.
    pub async fn restore(self: &Arc<Self>) -> (usize, usize) {
        self.restore_at(Utc::now()).await
    }

    /// [`Self::restore`] with an explicit clock.
    pub async fn restore_at(self: &Arc<Self>, now: DateTime<Utc>) -> (usize, usize) {
        let (mut rearmed, mut delivered) = (0, 0);
        for record in self.queue_store.load() {
            match (record.delivery_time - now).to_std() {
                Ok(delay) if !delay.is_zero() => {
                    if self.enqueue(record, delay) {
                        rearmed += 1;
                    }
                }
                _ => {
                    self.deliver_event(&record.event).await;
                    delivered += 1;
                }
            }
        }
        self.persist_queue();
        tracing::info!(rearmed, delivered, "background queue restored");
        (rearmed, delivered)
    }

    fn persist_queue(&self) {
        if let Err(e) = self.queue_store.save(&self.queued()) {
            tracing::warn!("failed to persist background queue: {e}");
        }
    }

    // ── delivery ─────────────────────────────────────────────────────────────

    /// Deliver a due event: in-app to a focused client, else as an OS
    /// notification with the standard background actions. Nothing is shown
    /// when notifications are off globally or for this event.
    pub async fn deliver_event(&self, event: &Event) -> Option<DeliveryRoute> {
        let settings = self.settings();
        if !settings.enabled || !event.notifications.enabled {
            tracing::debug!(event_id = %event.id, "notifications disabled, delivery skipped");
            return None;
        }
        let options = NotificationOptions {
            actions: Some(background_actions()),
            require_interaction: Some(true),
            ..NotificationOptions::default()
        };
        let notification = build_notification(event, &options, &settings, Utc::now());
        self.present(notification.to_request()).await
    }

    async fn present(&self, request: NotificationRequest) -> Option<DeliveryRoute> {
        if let Some(client) = self.focused_client() {
            let message = WorkerMessage::ShowInAppNotification {
                payload: request.clone(),
            };
            if self.send_to(client, message) {
                tracing::debug!(%client, tag = %request.tag, "delivered in-app");
                return Some(DeliveryRoute::InApp(client));
            }
        }
        match self.surface.show(&request).await {
            Ok(()) => {
                tracing::debug!(tag = %request.tag, "delivered as system notification");
                Some(DeliveryRoute::System)
            }
            Err(e) => {
                tracing::error!(tag = %request.tag, "system notification failed: {e:#}");
                None
            }
        }
    }

    // ── clicks and closes ────────────────────────────────────────────────────

    /// Route a notification click to a client. A click on the body with no
    /// button counts as `view`.
    pub async fn handle_notification_click(
        &self,
        action: Option<NotificationAction>,
        data: NotificationData,
        tag: String,
    ) -> ClickRoute {
        let message = WorkerMessage::NotificationAction {
            action: action.unwrap_or(NotificationAction::View),
            data,
            tag,
        };

        if let Some(client) = self.first_client() {
            if self.send_to(client, message.clone()) {
                return ClickRoute::Client(client);
            }
        }

        if let Some(launcher) = &self.launcher {
            self.lock_state().pending_clicks.push(message.clone());
            match launcher.open_client().await {
                Ok(()) => return ClickRoute::AwaitingClient,
                Err(e) => {
                    tracing::warn!("could not open a client for notification click: {e:#}");
                    self.lock_state().pending_clicks.retain(|held| held != &message);
                }
            }
        }

        tracing::info!(?message, "no client available, notification click logged only");
        ClickRoute::Logged
    }

    /// Record that the user closed a system notification.
    pub fn handle_notification_close(&self, tag: &str) {
        self.handle_notification_close_at(tag, Utc::now());
    }

    pub fn handle_notification_close_at(&self, tag: &str, now: DateTime<Utc>) {
        tracing::debug!(%tag, "system notification dismissed");
        self.lock_state().dismissals.insert(tag.to_owned(), now);
    }

    /// One entry per dismissed tag, ordered by tag.
    #[must_use]
    pub fn dismissals(&self) -> Vec<Dismissal> {
        self.lock_state()
            .dismissals
            .iter()
            .map(|(tag, at)| Dismissal {
                tag: tag.clone(),
                dismissed_at: *at,
            })
            .collect()
    }

    // ── periodic work ────────────────────────────────────────────────────────

    /// Ask a client to check for due events. Skipped when no client is
    /// connected. Returns whether a client was asked.
    pub fn check_due_events(&self) -> bool {
        match self.first_client() {
            Some(client) => self.send_to(client, WorkerMessage::CheckDueEvents),
            None => {
                tracing::debug!("no client connected, skipping due-event check");
                false
            }
        }
    }

    /// Ask every client to refresh. Returns how many were reached.
    pub fn sync_clients(&self) -> usize {
        let ids: Vec<ClientId> = self.lock_state().clients.keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.send_to(*id, WorkerMessage::SyncHealthEvents))
            .count()
    }

    /// Run the coordinator loop until `cancel` fires or `inbound` closes.
    ///
    /// Restores the persisted queue first, then handles client messages and
    /// runs the periodic due-event check.
    pub fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<ClientMessage>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.restore().await;
            let mut interval = tokio::time::interval(self.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            interval.tick().await;
            tracing::info!(
                interval_secs = self.check_interval.as_secs(),
                "background coordinator started"
            );

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    message = inbound.recv() => match message {
                        Some(message) => self.handle_client_message(message).await,
                        None => break,
                    },
                    _ = interval.tick() => {
                        self.check_due_events();
                    }
                }
            }
            tracing::info!("background coordinator stopped");
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_queue(&self) -> MutexGuard<'_, BTreeMap<u64, QueueEntry>> {
        self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for BackgroundCoordinator {
    fn drop(&mut self) {
        if let Ok(queue) = self.queue.get_mut() {
            for entry in queue.values() {
                entry.timer.abort();
            }
        }
    }
}

/// Registered as the dispatcher's worker, the coordinator shows system
/// notifications in-app when a client has focus.
#[async_trait]
impl NotificationSurface for BackgroundCoordinator {
    async fn permission(&self) -> PermissionState {
        self.surface.permission().await
    }

    async fn request_permission(&self) -> PermissionState {
        self.surface.request_permission().await
    }

    async fn show(&self, request: &NotificationRequest) -> anyhow::Result<()> {
        match self.present(request.clone()).await {
            Some(_) => Ok(()),
            None => anyhow::bail!("background coordinator could not deliver {}", request.tag),
        }
    }

    async fn close_tag(&self, tag: &str) -> anyhow::Result<usize> {
        self.surface.close_tag(tag).await
    }
}

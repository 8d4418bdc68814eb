//! Multi-channel notification dispatcher.
//!
//! Fans each notification out to every requested channel concurrently,
//! bounds each attempt with a timeout and a retry budget, and falls back to
//! a single blocking alert when nothing got through. Timed deliveries are
//! armed as tokio tasks and mirrored to disk so they survive a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use super::channels::{
    AudioChannel, DeliveryChannel, SystemChannel, VibrationChannel, VisualChannel,
};
use super::delivery::build_notification;
use super::queue::{DeliveryQueueStore, ScheduledDelivery};
use super::settings::{NotificationSettings, SettingsPatch, SettingsStore};
use super::types::{
    ActionOutcome, ChannelError, ChannelFailure, DeliveryReport, DispatcherEvent, Notification,
    NotificationAction, NotificationOptions, ScheduleHandle, ScheduleOutcome,
};
use crate::config::{CarebellConfig, NotificationConfig};
use crate::error::{CarebellError, Result};
use crate::events::scheduler::EventScheduler;
use crate::events::types::{
    CATEGORY_TEST, DeliveryMethod, Event, EventMetadata, EventNotifications, EventStatus,
    is_synthetic_event,
};
use crate::platform::{NotificationSurface, PermissionState, Platform};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Timing and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Upper bound for one channel attempt and for a permission prompt.
    pub channel_timeout: Duration,
    /// Extra attempts after a transient channel failure.
    pub channel_retries: u32,
    /// Lifetime of a non-high-priority modal.
    pub visual_timeout: Duration,
    /// Snooze length applied by the snooze action.
    pub snooze_minutes: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&NotificationConfig::default())
    }
}

impl DispatchPolicy {
    #[must_use]
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            channel_timeout: Duration::from_millis(config.channel_timeout_ms),
            channel_retries: config.channel_retries,
            visual_timeout: Duration::from_secs(config.visual_timeout_secs),
            snooze_minutes: config.default_snooze_minutes,
        }
    }
}

/// Permission and capability snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PermissionReport {
    pub notifications: PermissionState,
    pub vibration_supported: bool,
}

/// Dispatcher status for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherStatistics {
    pub permission: PermissionState,
    pub vibration_supported: bool,
    pub worker_registered: bool,
    pub active_notifications: usize,
    pub queued_deliveries: usize,
    pub settings: NotificationSettings,
}

/// What a restore did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    /// Future deliveries re-armed.
    pub rearmed: usize,
    /// Overdue deliveries shown immediately.
    pub delivered: usize,
}

struct QueuedDelivery {
    record: ScheduledDelivery,
    timer: Option<AbortHandle>,
}

/// Delivers notifications for events.
pub struct NotificationDispatcher {
    platform: Platform,
    system: Arc<SystemChannel>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
    scheduler: Option<Arc<EventScheduler>>,
    policy: DispatchPolicy,
    settings: Mutex<NotificationSettings>,
    settings_store: SettingsStore,
    active: Mutex<HashMap<String, Notification>>,
    queue: Mutex<BTreeMap<ScheduleHandle, QueuedDelivery>>,
    queue_store: DeliveryQueueStore,
    next_handle: AtomicU64,
    events_tx: broadcast::Sender<DispatcherEvent>,
}

impl NotificationDispatcher {
    /// Dispatcher over `platform` with default policy, in-memory settings
    /// and no persisted queue.
    pub fn new(platform: Platform) -> Self {
        let policy = DispatchPolicy::default();
        let system = Arc::new(SystemChannel::new(Arc::clone(&platform.notifications)));
        let channels = build_channels(&platform, &system, policy.visual_timeout);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            platform,
            system,
            channels,
            scheduler: None,
            policy,
            settings: Mutex::new(NotificationSettings::default()),
            settings_store: SettingsStore::in_memory(),
            active: Mutex::new(HashMap::new()),
            queue: Mutex::new(BTreeMap::new()),
            queue_store: DeliveryQueueStore::in_memory(),
            next_handle: AtomicU64::new(1),
            events_tx,
        }
    }

    /// Dispatcher wired from config with persisted settings and queue.
    pub fn from_config(
        config: &CarebellConfig,
        platform: Platform,
        scheduler: Option<Arc<EventScheduler>>,
    ) -> Self {
        let defaults = NotificationSettings::from_config(&config.notifications);
        let mut dispatcher = Self::new(platform)
            .with_policy(DispatchPolicy::from_config(&config.notifications))
            .with_settings_store(SettingsStore::at(crate::carebell_dirs::settings_file()), defaults)
            .with_queue_store(DeliveryQueueStore::at(crate::carebell_dirs::queue_file()));
        if let Some(scheduler) = scheduler {
            dispatcher = dispatcher.with_scheduler(scheduler);
        }
        dispatcher
    }

    /// Let action handlers complete and snooze events.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<EventScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self.channels = build_channels(&self.platform, &self.system, policy.visual_timeout);
        self
    }

    /// Load settings from `store`, falling back to `defaults`.
    #[must_use]
    pub fn with_settings_store(
        mut self,
        store: SettingsStore,
        defaults: NotificationSettings,
    ) -> Self {
        self.settings = Mutex::new(store.load_or(defaults));
        self.settings_store = store;
        self
    }

    #[must_use]
    pub fn with_queue_store(mut self, store: DeliveryQueueStore) -> Self {
        self.queue_store = store;
        self
    }

    /// Route system notifications through a background worker.
    pub fn register_worker(&self, worker: Arc<dyn NotificationSurface>) {
        self.system.register_worker(worker);
        tracing::info!("background worker registered for system notifications");
    }

    /// Subscribe to dispatcher lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.events_tx.subscribe()
    }

    // ── settings ─────────────────────────────────────────────────────────────

    #[must_use]
    pub fn settings(&self) -> NotificationSettings {
        lock(&self.settings).clone()
    }

    /// Merge `patch` into the settings and persist them.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file cannot be written. The
    /// in-memory settings are updated either way.
    pub fn update_settings(&self, patch: &SettingsPatch) -> Result<NotificationSettings> {
        let updated = {
            let mut settings = lock(&self.settings);
            settings.merge(patch);
            settings.clone()
        };
        self.settings_store.save(&updated)?;
        Ok(updated)
    }

    // ── permissions ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Current permissions, prompting if undecided. The prompt is bounded
    /// by the channel timeout and counts as denied if it expires.
    pub async fn check_permissions(&self) -> PermissionReport {
        let surface = &self.platform.notifications;
        let mut notifications = surface.permission().await;
        if notifications == PermissionState::Prompt {
            notifications =
                match tokio::time::timeout(self.policy.channel_timeout, surface.request_permission())
                    .await
                {
                    Ok(state) => state,
                    Err(_) => {
                        tracing::warn!("notification permission prompt timed out");
                        PermissionState::Denied
                    }
                };
        }
        PermissionReport {
            notifications,
            vibration_supported: self.platform.vibrator.is_supported(),
        }
    }

    // ── delivery ─────────────────────────────────────────────────────────────

    /// Show a notification for `event` now and return its id.
    ///
    /// # Errors
    ///
    /// [`CarebellError::AllChannelsFailed`] if every channel and the
    /// blocking alert failed.
    pub async fn show_notification(&self, event: &Event, options: NotificationOptions) -> Result<String> {
        self.deliver(event, options).await.map(|report| report.notification_id)
    }

    /// Show a notification for `event` now and report per-channel results.
    pub async fn deliver(&self, event: &Event, options: NotificationOptions) -> Result<DeliveryReport> {
        self.deliver_at(event, options, Utc::now()).await
    }

    /// [`Self::deliver`] with an explicit clock.
    pub async fn deliver_at(
        &self,
        event: &Event,
        options: NotificationOptions,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let settings = self.settings();
        let notification = build_notification(event, &options, &settings, now);
        let mut report = DeliveryReport {
            notification_id: notification.id.clone(),
            delivered: Vec::new(),
            failures: Vec::new(),
            fallback_alert: false,
            suppressed: false,
        };

        if !settings.enabled || !event.notifications.enabled {
            tracing::debug!(event_id = %event.id, "notifications disabled, skipping delivery");
            report.suppressed = true;
            return Ok(report);
        }

        let requested: Vec<&Arc<dyn DeliveryChannel>> = self
            .channels
            .iter()
            .filter(|channel| notification.methods.contains(&channel.method()))
            .collect();
        if requested.is_empty() {
            tracing::debug!(event_id = %event.id, "no delivery methods requested, skipping delivery");
            report.suppressed = true;
            return Ok(report);
        }

        self.replace_tag(&notification).await;
        lock(&self.active).insert(notification.id.clone(), notification.clone());
        let attempts = requested
            .iter()
            .map(|channel| self.attempt_channel(channel.as_ref(), &notification));
        let results = futures_util::future::join_all(attempts).await;

        for (channel, result) in requested.iter().zip(results) {
            match result {
                Ok(()) => report.delivered.push(channel.method()),
                Err(error) => {
                    tracing::warn!(
                        notification_id = %notification.id,
                        method = %channel.method(),
                        "channel failed: {error}"
                    );
                    report.failures.push(ChannelFailure {
                        method: channel.method(),
                        error,
                    });
                }
            }
        }

        if report.any_delivered() {
            tracing::info!(
                notification_id = %notification.id,
                event_id = %event.id,
                delivered = ?report.delivered,
                "notification delivered"
            );
            self.emit(DispatcherEvent::Sent {
                notification_id: notification.id.clone(),
                event_id: event.id.clone(),
                delivered: report.delivered.clone(),
            });
            return Ok(report);
        }

        // Nothing got through: one blocking alert, then forget the notification.
        lock(&self.active).remove(&notification.id);
        match self.platform.alert.alert(&notification.alert_text()) {
            Ok(()) => {
                tracing::warn!(
                    notification_id = %notification.id,
                    "all channels failed, fell back to blocking alert"
                );
                report.fallback_alert = true;
                self.emit(DispatcherEvent::FallbackAlert {
                    notification_id: notification.id.clone(),
                    event_id: event.id.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                tracing::error!(notification_id = %notification.id, "blocking alert failed: {e:#}");
                let mut failures: Vec<String> =
                    report.failures.iter().map(ToString::to_string).collect();
                failures.push(format!("alert: {e:#}"));
                Err(CarebellError::AllChannelsFailed { failures })
            }
        }
    }

    async fn attempt_channel(
        &self,
        channel: &dyn DeliveryChannel,
        notification: &Notification,
    ) -> std::result::Result<(), ChannelError> {
        let timeout = self.policy.channel_timeout;
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(timeout, channel.deliver(notification)).await {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Timeout(timeout.as_millis() as u64)),
            };
            match result {
                Err(error) if error.is_transient() && attempt < self.policy.channel_retries => {
                    attempt += 1;
                    tracing::debug!(
                        method = %channel.method(),
                        attempt,
                        "retrying channel after: {error}"
                    );
                    tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                }
                other => return other,
            }
        }
    }

    /// A new notification replaces any active one with the same tag.
    async fn replace_tag(&self, notification: &Notification) {
        let replaced: Vec<String> = {
            let mut active = lock(&self.active);
            let ids: Vec<String> = active
                .values()
                .filter(|n| n.tag == notification.tag)
                .map(|n| n.id.clone())
                .collect();
            for id in &ids {
                active.remove(id);
            }
            ids
        };
        for id in replaced {
            tracing::debug!(replaced = %id, tag = %notification.tag, "notification replaced by tag");
            if let Err(e) = self.platform.modal.dismiss(&id).await {
                tracing::debug!(notification_id = %id, "modal dismiss failed: {e:#}");
            }
        }
    }

    // ── scheduling ───────────────────────────────────────────────────────────

    /// Deliver at `delivery_time`. Past or present times deliver
    /// immediately and never arm a timer.
    pub async fn schedule_notification(
        self: &Arc<Self>,
        event: &Event,
        delivery_time: DateTime<Utc>,
    ) -> Result<ScheduleOutcome> {
        self.schedule_notification_at(event, delivery_time, Utc::now()).await
    }

    /// [`Self::schedule_notification`] with an explicit clock.
    pub async fn schedule_notification_at(
        self: &Arc<Self>,
        event: &Event,
        delivery_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome> {
        let delay = match (delivery_time - now).to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => {
                let report = self
                    .deliver_at(event, NotificationOptions::default(), now)
                    .await?;
                return Ok(ScheduleOutcome::Delivered { report });
            }
        };

        let record = ScheduledDelivery {
            event: event.clone(),
            delivery_time,
            scheduled_at: now,
        };
        let handle = self.enqueue(record, delay);
        self.persist_queue();
        tracing::info!(event_id = %event.id, %delivery_time, "notification scheduled");
        Ok(ScheduleOutcome::Scheduled { handle })
    }

    fn enqueue(self: &Arc<Self>, record: ScheduledDelivery, delay: Duration) -> ScheduleHandle {
        let mut queue = lock(&self.queue);
        if let Some((handle, _)) = queue.iter().find(|(_, q)| q.record.same_slot(&record)) {
            return *handle;
        }
        let handle = ScheduleHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let timer = arm_timer(Arc::downgrade(self), handle, delay);
        queue.insert(
            handle,
            QueuedDelivery {
                record,
                timer: Some(timer),
            },
        );
        handle
    }

    async fn fire(&self, handle: ScheduleHandle) {
        let Some(queued) = lock(&self.queue).remove(&handle) else {
            return;
        };
        self.persist_queue();

        let Some(event) = self.refresh(queued.record.event) else {
            return;
        };

        if let Err(e) = self.deliver(&event, NotificationOptions::default()).await {
            tracing::error!(event_id = %event.id, "scheduled delivery failed: {e}");
        }
    }

    /// Current state of a queued event. `None` when it was deleted or is
    /// no longer pending; the queued snapshot when it cannot be re-read.
    fn refresh(&self, snapshot: Event) -> Option<Event> {
        let Some(scheduler) = &self.scheduler else {
            return Some(snapshot);
        };
        match scheduler.get_event(&snapshot.id) {
            Ok(current) if current.status == EventStatus::Pending => Some(current),
            Ok(current) => {
                tracing::info!(
                    event_id = %current.id,
                    status = current.status.as_str(),
                    "skipping scheduled delivery for inactive event"
                );
                None
            }
            Err(CarebellError::NotFound { id }) => {
                tracing::info!(event_id = %id, "skipping scheduled delivery for deleted event");
                None
            }
            Err(e) => {
                tracing::warn!("cannot refresh scheduled event, using snapshot: {e}");
                Some(snapshot)
            }
        }
    }

    /// Cancel a timed delivery. Unknown handles are a no-op.
    pub fn cancel_scheduled(&self, handle: ScheduleHandle) -> bool {
        let removed = lock(&self.queue).remove(&handle);
        match removed {
            Some(queued) => {
                if let Some(timer) = queued.timer {
                    timer.abort();
                }
                self.persist_queue();
                true
            }
            None => false,
        }
    }

    /// Cancel every timed delivery for `event_id`. Returns how many.
    pub fn cancel_for_event(&self, event_id: &str) -> usize {
        let removed: Vec<QueuedDelivery> = {
            let mut queue = lock(&self.queue);
            let handles: Vec<ScheduleHandle> = queue
                .iter()
                .filter(|(_, q)| q.record.event.id == event_id)
                .map(|(h, _)| *h)
                .collect();
            handles.iter().filter_map(|h| queue.remove(h)).collect()
        };
        for queued in &removed {
            if let Some(timer) = &queued.timer {
                timer.abort();
            }
        }
        if !removed.is_empty() {
            self.persist_queue();
        }
        removed.len()
    }

    /// Pending timed deliveries, soonest first.
    #[must_use]
    pub fn queued_deliveries(&self) -> Vec<ScheduledDelivery> {
        let mut records: Vec<ScheduledDelivery> =
            lock(&self.queue).values().map(|q| q.record.clone()).collect();
        records.sort_by_key(|r| r.delivery_time);
        records
    }

    /// Reload persisted deliveries after a restart: re-arm future ones and
    /// show overdue ones now.
    pub async fn restore_scheduled_notifications(self: &Arc<Self>) -> RestoreSummary {
        self.restore_scheduled_notifications_at(Utc::now()).await
    }

    /// [`Self::restore_scheduled_notifications`] with an explicit clock.
    pub async fn restore_scheduled_notifications_at(
        self: &Arc<Self>,
        now: DateTime<Utc>,
    ) -> RestoreSummary {
        let mut summary = RestoreSummary::default();
        for record in self.queue_store.load() {
            let already_queued = lock(&self.queue)
                .values()
                .any(|q| q.record.same_slot(&record));
            if already_queued {
                continue;
            }
            match (record.delivery_time - now).to_std() {
                Ok(delay) if !delay.is_zero() => {
                    self.enqueue(record, delay);
                    summary.rearmed += 1;
                }
                _ => {
                    let Some(event) = self.refresh(record.event) else {
                        continue;
                    };
                    if let Err(e) = self
                        .deliver_at(&event, NotificationOptions::default(), now)
                        .await
                    {
                        tracing::error!(event_id = %event.id, "overdue delivery failed: {e}");
                    }
                    summary.delivered += 1;
                }
            }
        }
        self.persist_queue();
        tracing::info!(
            rearmed = summary.rearmed,
            delivered = summary.delivered,
            "scheduled notifications restored"
        );
        summary
    }

    fn persist_queue(&self) {
        let records = self.queued_deliveries();
        if let Err(e) = self.queue_store.save(&records) {
            tracing::warn!("failed to persist delivery queue: {e}");
        }
    }

    // ── actions ──────────────────────────────────────────────────────────────

    /// Apply a user action to an active notification.
    ///
    /// The notification leaves the active set whatever the outcome.
    ///
    /// # Errors
    ///
    /// Scheduler errors for real, existing events. Deleted and synthetic
    /// events simulate success.
    pub async fn handle_notification_action(
        &self,
        notification_id: &str,
        action: NotificationAction,
    ) -> Result<ActionOutcome> {
        let Some(notification) = lock(&self.active).get(notification_id).cloned() else {
            tracing::warn!(%notification_id, %action, "action for unknown notification");
            return Ok(ActionOutcome::UnknownNotification);
        };

        let result =
            self.apply_action(&notification.event_id, notification.is_synthetic(), &action);

        lock(&self.active).remove(notification_id);
        if let Err(e) = self.platform.modal.dismiss(notification_id).await {
            tracing::debug!(%notification_id, "modal dismiss failed: {e:#}");
        }

        if let Ok(outcome) = &result {
            tracing::info!(%notification_id, %action, "notification action handled");
            self.emit(DispatcherEvent::ActionHandled {
                notification_id: notification.id.clone(),
                event_id: notification.event_id.clone(),
                action,
                outcome: outcome.clone(),
            });
        }
        result
    }

    /// Apply `action` to an event without an active notification, as when a
    /// click arrives from the background worker after a restart.
    ///
    /// # Errors
    ///
    /// Same policy as [`Self::handle_notification_action`].
    pub fn apply_event_action(
        &self,
        event_id: &str,
        category: &str,
        action: &NotificationAction,
    ) -> Result<ActionOutcome> {
        self.apply_action(event_id, is_synthetic_event(event_id, category), action)
    }

    fn apply_action(
        &self,
        event_id: &str,
        synthetic: bool,
        action: &NotificationAction,
    ) -> Result<ActionOutcome> {
        let completes = match action {
            a if a.completes_event() => true,
            NotificationAction::Snooze => false,
            NotificationAction::View | NotificationAction::Dismiss => {
                return Ok(ActionOutcome::Acknowledged);
            }
            _ => {
                tracing::warn!(%action, "unrecognized notification action");
                return Ok(ActionOutcome::Unrecognized);
            }
        };

        let Some(scheduler) = &self.scheduler else {
            tracing::debug!("no scheduler attached, simulating action");
            return Ok(ActionOutcome::Simulated);
        };

        let result = if completes {
            scheduler.complete_event(event_id)
        } else {
            scheduler.snooze_event(event_id, self.policy.snooze_minutes)
        };
        match result {
            Ok(event) => Ok(ActionOutcome::Applied {
                event: Box::new(event),
            }),
            Err(CarebellError::NotFound { id }) => {
                tracing::info!(event_id = %id, "event gone, simulating action");
                Ok(ActionOutcome::Simulated)
            }
            Err(e) if synthetic => {
                tracing::debug!("synthetic event action simulated after: {e}");
                Ok(ActionOutcome::Simulated)
            }
            Err(e) => Err(e),
        }
    }

    /// Forget a notification the user closed without acting.
    pub async fn handle_notification_closed(&self, notification_id: &str) -> bool {
        let removed = lock(&self.active).remove(notification_id).is_some();
        if removed {
            if let Err(e) = self.platform.modal.dismiss(notification_id).await {
                tracing::debug!(%notification_id, "modal dismiss failed: {e:#}");
            }
            self.emit(DispatcherEvent::Closed {
                notification_id: notification_id.to_owned(),
            });
        }
        removed
    }

    /// Active notifications.
    #[must_use]
    pub fn active_notifications(&self) -> Vec<Notification> {
        let mut active: Vec<Notification> = lock(&self.active).values().cloned().collect();
        active.sort_by_key(|n| n.created_at);
        active
    }

    /// Id of the active notification for `event_id`, if any.
    #[must_use]
    pub fn active_for_event(&self, event_id: &str) -> Option<String> {
        lock(&self.active)
            .values()
            .find(|n| n.event_id == event_id)
            .map(|n| n.id.clone())
    }

    /// Fire a synthetic notification through system, vibration and visual.
    pub async fn test_notification(&self) -> Result<DeliveryReport> {
        let now = Utc::now();
        let event = synthetic_event(now);
        let options = NotificationOptions::methods([
            DeliveryMethod::System,
            DeliveryMethod::Vibration,
            DeliveryMethod::Visual,
        ]);
        self.deliver_at(&event, options, now).await
    }

    pub async fn statistics(&self) -> DispatcherStatistics {
        DispatcherStatistics {
            permission: self.platform.notifications.permission().await,
            vibration_supported: self.platform.vibrator.is_supported(),
            worker_registered: self.system.has_worker(),
            active_notifications: lock(&self.active).len(),
            queued_deliveries: lock(&self.queue).len(),
            settings: self.settings(),
        }
    }

    fn emit(&self, event: DispatcherEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        if let Ok(queue) = self.queue.get_mut() {
            for queued in queue.values() {
                if let Some(timer) = &queued.timer {
                    timer.abort();
                }
            }
        }
    }
}

fn arm_timer(
    dispatcher: Weak<NotificationDispatcher>,
    handle: ScheduleHandle,
    delay: Duration,
) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(dispatcher) = dispatcher.upgrade() {
            dispatcher.fire(handle).await;
        }
    })
    .abort_handle()
}

fn build_channels(
    platform: &Platform,
    system: &Arc<SystemChannel>,
    visual_timeout: Duration,
) -> Vec<Arc<dyn DeliveryChannel>> {
    vec![
        Arc::clone(system) as Arc<dyn DeliveryChannel>,
        Arc::new(VibrationChannel::new(Arc::clone(&platform.vibrator))),
        Arc::new(AudioChannel::new(Arc::clone(&platform.audio))),
        Arc::new(VisualChannel::new(Arc::clone(&platform.modal), visual_timeout)),
    ]
}

fn synthetic_event(now: DateTime<Utc>) -> Event {
    let at = now + chrono::Duration::seconds(30);
    Event {
        id: format!("test_notification_{}", uuid::Uuid::new_v4().simple()),
        title: "Test notification".to_owned(),
        description: "Notifications are working.".to_owned(),
        category: CATEGORY_TEST.to_owned(),
        datetime: at,
        recurring: None,
        next_occurrence: Some(at),
        notifications: EventNotifications::default(),
        status: EventStatus::Pending,
        metadata: EventMetadata::new("test", now),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::events::store::ListEventStore;
    use crate::events::types::{EventInput, test_event};
    use crate::notify::types::NotificationAction;
    use crate::platform::recording::{Device, RecordingPlatform};

    fn dispatcher(rec: &RecordingPlatform) -> NotificationDispatcher {
        NotificationDispatcher::new(rec.platform())
    }

    fn with_scheduler(rec: &RecordingPlatform) -> (Arc<EventScheduler>, NotificationDispatcher) {
        let scheduler = Arc::new(EventScheduler::new(Arc::new(ListEventStore::in_memory())));
        let dispatcher = dispatcher(rec).with_scheduler(Arc::clone(&scheduler));
        (scheduler, dispatcher)
    }

    #[tokio::test]
    async fn delivers_on_every_requested_channel() {
        let rec = RecordingPlatform::new();
        let d = dispatcher(&rec);
        let report = d
            .deliver(&test_event("event_1", "Pill"), NotificationOptions::default())
            .await
            .unwrap();
        assert_eq!(
            report.delivered,
            vec![DeliveryMethod::System, DeliveryMethod::Vibration]
        );
        assert!(report.failures.is_empty());
        assert!(!report.fallback_alert);
        assert_eq!(d.active_notifications().len(), 1);
    }

    #[tokio::test]
    async fn partial_failure_still_counts_as_delivered() {
        let rec = RecordingPlatform::new();
        rec.set_permission(PermissionState::Denied);
        let d = dispatcher(&rec);
        let report = d
            .deliver(&test_event("event_1", "Pill"), NotificationOptions::default())
            .await
            .unwrap();
        assert_eq!(report.delivered, vec![DeliveryMethod::Vibration]);
        assert_eq!(report.failures.len(), 1);
        assert!(rec.alerts().is_empty());
    }

    #[tokio::test]
    async fn all_channels_failing_fires_one_alert() {
        let rec = RecordingPlatform::new();
        rec.fail_all_channels();
        let d = dispatcher(&rec);
        let mut events = d.subscribe();
        let report = d
            .deliver(&test_event("event_1", "Take Aspirin"), NotificationOptions::default())
            .await
            .unwrap();

        assert!(report.fallback_alert);
        assert!(report.delivered.is_empty());
        let alerts = rec.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Take Aspirin"));
        assert!(d.active_notifications().is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            DispatcherEvent::FallbackAlert { .. }
        ));
    }

    #[tokio::test]
    async fn alert_failure_surfaces_all_channels_failed() {
        let rec = RecordingPlatform::new();
        rec.fail_all_channels();
        rec.fail(Device::Alert);
        let d = dispatcher(&rec);
        let err = d
            .deliver(&test_event("event_1", "Pill"), NotificationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CarebellError::AllChannelsFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_channel_times_out_without_blocking_others() {
        let rec = RecordingPlatform::new();
        rec.hang(Device::Notifications);
        let d = dispatcher(&rec).with_policy(DispatchPolicy {
            channel_timeout: Duration::from_millis(100),
            channel_retries: 0,
            ..DispatchPolicy::default()
        });
        let report = d
            .deliver(&test_event("event_1", "Pill"), NotificationOptions::default())
            .await
            .unwrap();
        assert_eq!(report.delivered, vec![DeliveryMethod::Vibration]);
        assert_eq!(report.failures[0].error, ChannelError::Timeout(100));
    }

    #[tokio::test]
    async fn same_tag_replaces_active_notification() {
        let rec = RecordingPlatform::new();
        let d = dispatcher(&rec);
        let event = test_event("event_1", "Pill");
        let first = d.show_notification(&event, NotificationOptions::default()).await.unwrap();
        let second = d.show_notification(&event, NotificationOptions::default()).await.unwrap();
        let active = d.active_notifications();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second);
        assert!(rec.dismissed().contains(&first));
    }

    #[tokio::test]
    async fn suppressed_when_disabled() {
        let rec = RecordingPlatform::new();
        let d = dispatcher(&rec);
        d.update_settings(&SettingsPatch {
            enabled: Some(false),
            ..SettingsPatch::default()
        })
        .unwrap();
        let report = d
            .deliver(&test_event("event_1", "Pill"), NotificationOptions::default())
            .await
            .unwrap();
        assert!(report.suppressed);
        assert!(rec.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_method_list_raises_no_alert() {
        let rec = RecordingPlatform::new();
        let d = dispatcher(&rec);
        let options = NotificationOptions::methods(std::iter::empty());
        let report = d.deliver(&test_event("event_1", "Pill"), options).await.unwrap();
        assert!(report.suppressed);
        assert!(!report.fallback_alert);
        assert!(rec.alerts().is_empty());
        assert!(d.active_notifications().is_empty());
    }

    #[tokio::test]
    async fn complete_action_completes_event_and_clears_notification() {
        let rec = RecordingPlatform::new();
        let (scheduler, d) = with_scheduler(&rec);
        let event = scheduler
            .create_event(EventInput::at("Pill", Utc::now()))
            .unwrap();
        let id = d.show_notification(&event, NotificationOptions::default()).await.unwrap();

        let outcome = d
            .handle_notification_action(&id, NotificationAction::Taken)
            .await
            .unwrap();
        match outcome {
            ActionOutcome::Applied { event } => assert_eq!(event.status, EventStatus::Completed),
            other => panic!("expected Applied, got {other:?}"),
        }
        assert!(d.active_notifications().is_empty());
    }

    #[tokio::test]
    async fn snooze_action_uses_policy_minutes() {
        let rec = RecordingPlatform::new();
        let (scheduler, d) = with_scheduler(&rec);
        let event = scheduler
            .create_event(EventInput::at("Pill", Utc::now()))
            .unwrap();
        let due = event.due_at().unwrap();
        let id = d.show_notification(&event, NotificationOptions::default()).await.unwrap();

        d.handle_notification_action(&id, NotificationAction::Snooze)
            .await
            .unwrap();
        let snoozed = scheduler.get_event(&event.id).unwrap();
        assert_eq!(snoozed.due_at(), Some(due + chrono::Duration::minutes(15)));
    }

    #[tokio::test]
    async fn action_on_deleted_event_is_simulated() {
        let rec = RecordingPlatform::new();
        let (scheduler, d) = with_scheduler(&rec);
        let event = scheduler
            .create_event(EventInput::at("Pill", Utc::now()))
            .unwrap();
        let id = d.show_notification(&event, NotificationOptions::default()).await.unwrap();
        scheduler.delete_event(&event.id).unwrap();

        let outcome = d
            .handle_notification_action(&id, NotificationAction::Complete)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Simulated);
        assert!(d.active_notifications().is_empty());
    }

    #[tokio::test]
    async fn genuine_scheduler_error_propagates_and_still_cleans_up() {
        let rec = RecordingPlatform::new();
        let (scheduler, d) = with_scheduler(&rec);
        let event = scheduler
            .create_event(EventInput::at("Pill", Utc::now()))
            .unwrap();
        let id = d.show_notification(&event, NotificationOptions::default()).await.unwrap();
        scheduler.cancel_event(&event.id).unwrap();

        let result = d
            .handle_notification_action(&id, NotificationAction::Complete)
            .await;
        assert!(matches!(result, Err(CarebellError::InvalidInput(_))));
        assert!(d.active_notifications().is_empty());
    }

    #[tokio::test]
    async fn unknown_notification_and_action() {
        let rec = RecordingPlatform::new();
        let d = dispatcher(&rec);
        assert_eq!(
            d.handle_notification_action("nope", NotificationAction::Complete)
                .await
                .unwrap(),
            ActionOutcome::UnknownNotification
        );

        let id = d
            .show_notification(&test_event("event_1", "Pill"), NotificationOptions::default())
            .await
            .unwrap();
        assert_eq!(
            d.handle_notification_action(&id, NotificationAction::from("later"))
                .await
                .unwrap(),
            ActionOutcome::Unrecognized
        );
    }

    #[tokio::test]
    async fn test_notification_simulates_actions() {
        let rec = RecordingPlatform::new();
        let (_scheduler, d) = with_scheduler(&rec);
        let report = d.test_notification().await.unwrap();
        assert!(report.delivered.contains(&DeliveryMethod::Visual));

        let outcome = d
            .handle_notification_action(&report.notification_id, NotificationAction::Complete)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Simulated);
    }

    #[tokio::test]
    async fn closing_removes_active_notification() {
        let rec = RecordingPlatform::new();
        let d = dispatcher(&rec);
        let id = d
            .show_notification(&test_event("event_1", "Pill"), NotificationOptions::default())
            .await
            .unwrap();
        assert!(d.handle_notification_closed(&id).await);
        assert!(!d.handle_notification_closed(&id).await);
    }

    #[tokio::test]
    async fn modal_dismiss_failure_does_not_block_close_or_replace() {
        let rec = RecordingPlatform::new();
        let d = dispatcher(&rec);
        let mut events = d.subscribe();
        let event = test_event("event_1", "Pill");
        let first = d.show_notification(&event, NotificationOptions::default()).await.unwrap();
        rec.fail(Device::Modal);

        let second = d.show_notification(&event, NotificationOptions::default()).await.unwrap();
        let active = d.active_notifications();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second);
        assert!(!rec.dismissed().contains(&first));

        assert!(d.handle_notification_closed(&second).await);
        assert!(d.active_notifications().is_empty());
        let mut closed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DispatcherEvent::Closed { notification_id } = event {
                closed.push(notification_id);
            }
        }
        assert_eq!(closed, vec![second]);
    }

    #[tokio::test(start_paused = true)]
    async fn past_delivery_time_shows_immediately() {
        let rec = RecordingPlatform::new();
        let d = Arc::new(dispatcher(&rec));
        let event = test_event("event_1", "Pill");
        let outcome = d
            .schedule_notification_at(&event, event.datetime, event.datetime + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Delivered { .. }));
        assert!(d.queued_deliveries().is_empty());
        assert_eq!(rec.shown().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn future_delivery_fires_after_delay() {
        let rec = RecordingPlatform::new();
        let d = Arc::new(dispatcher(&rec));
        let event = test_event("event_1", "Pill");
        let now = event.datetime - chrono::Duration::seconds(60);

        let outcome = d.schedule_notification_at(&event, event.datetime, now).await.unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Scheduled { .. }));
        assert_eq!(d.queued_deliveries().len(), 1);
        assert!(rec.shown().is_empty());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(rec.shown().len(), 1);
        assert!(d.queued_deliveries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_delivery_never_fires() {
        let rec = RecordingPlatform::new();
        let d = Arc::new(dispatcher(&rec));
        let event = test_event("event_1", "Pill");
        let now = event.datetime - chrono::Duration::seconds(60);
        let ScheduleOutcome::Scheduled { handle } =
            d.schedule_notification_at(&event, event.datetime, now).await.unwrap()
        else {
            panic!("expected a scheduled delivery");
        };

        assert!(d.cancel_scheduled(handle));
        assert!(!d.cancel_scheduled(handle));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rec.shown().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_rearms_future_and_delivers_overdue() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeliveryQueueStore::at(dir.path().join("queue.json"));
        let now = test_event("x", "x").datetime;

        let overdue = test_event("event_old", "Overdue pill");
        let future = test_event("event_new", "Future pill");
        store
            .save(&[
                ScheduledDelivery {
                    event: overdue.clone(),
                    delivery_time: now - chrono::Duration::minutes(5),
                    scheduled_at: now - chrono::Duration::hours(1),
                },
                ScheduledDelivery {
                    event: future.clone(),
                    delivery_time: now + chrono::Duration::minutes(5),
                    scheduled_at: now - chrono::Duration::hours(1),
                },
            ])
            .unwrap();

        let rec = RecordingPlatform::new();
        let d = Arc::new(dispatcher(&rec).with_queue_store(store.clone()));
        let summary = d.restore_scheduled_notifications_at(now).await;
        assert_eq!(summary, RestoreSummary { rearmed: 1, delivered: 1 });
        assert_eq!(rec.shown().len(), 1);
        assert_eq!(rec.shown()[0].title, "Overdue pill");

        let persisted = store.load();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].event.id, future.id);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_skips_overdue_records_for_gone_or_finished_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeliveryQueueStore::at(dir.path().join("queue.json"));
        let rec = RecordingPlatform::new();
        let (scheduler, d) = with_scheduler(&rec);
        let d = Arc::new(d.with_queue_store(store.clone()));

        let now = test_event("x", "x").datetime;
        let due = now - chrono::Duration::minutes(5);
        let deleted = scheduler.create_event(EventInput::at("Deleted pill", due)).unwrap();
        let completed = scheduler.create_event(EventInput::at("Taken pill", due)).unwrap();
        let pending = scheduler.create_event(EventInput::at("Missed pill", due)).unwrap();
        let record = |event: &Event| ScheduledDelivery {
            event: event.clone(),
            delivery_time: due,
            scheduled_at: now - chrono::Duration::hours(1),
        };
        store
            .save(&[record(&deleted), record(&completed), record(&pending)])
            .unwrap();
        scheduler.delete_event(&deleted.id).unwrap();
        scheduler.complete_event(&completed.id).unwrap();

        let summary = d.restore_scheduled_notifications_at(now).await;
        assert_eq!(summary, RestoreSummary { rearmed: 0, delivered: 1 });
        let shown = rec.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Missed pill");
        assert!(store.load().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn permission_prompt_is_bounded() {
        let rec = RecordingPlatform::new();
        rec.prompt_resolves_to(PermissionState::Granted);
        rec.hang(Device::Notifications);
        let d = dispatcher(&rec);
        let report = d.check_permissions().await;
        assert_eq!(report.notifications, PermissionState::Denied);

        rec.recover(Device::Notifications);
        let report = d.check_permissions().await;
        assert_eq!(report.notifications, PermissionState::Granted);
        assert!(report.vibration_supported);
    }

    #[tokio::test]
    async fn settings_persist_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::at(dir.path().join("settings.json"));
        let rec = RecordingPlatform::new();
        let d = dispatcher(&rec).with_settings_store(store.clone(), NotificationSettings::default());
        d.update_settings(&SettingsPatch {
            sound_enabled: Some(false),
            ..SettingsPatch::default()
        })
        .unwrap();

        let reloaded = dispatcher(&rec).with_settings_store(store, NotificationSettings::default());
        assert!(!reloaded.settings().sound_enabled);
    }
}

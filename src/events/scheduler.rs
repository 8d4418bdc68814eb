//! Event lifecycle: create, update, complete, snooze, cancel, delete,
//! query and cleanup.
//!
//! Every mutating operation has an `_at(now)` variant taking the current
//! time explicitly; the plain variant forwards `Utc::now()`.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

use super::listeners::{LifecycleEvent, LifecycleKind, ListenerId, ListenerRegistry};
use super::recurrence::{first_occurrence, next_after};
use super::store::{EventStore, ResilientEventStore, StoreBackend};
use super::types::{
    CATEGORY_GENERAL, DeliveryMethod, EXPORT_VERSION, Event, EventExport, EventInput,
    EventMetadata, EventNotifications, EventPatch, EventStatistics, EventStatus, Priority,
    Recurrence, RecurrenceKind, SearchCriteria, parse_event_datetime,
};
use crate::config::{CarebellConfig, RetentionConfig};
use crate::error::{CarebellError, Result};

/// Defaults the scheduler applies to new events, plus retention windows.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerPolicy {
    pub retention: RetentionConfig,
    pub default_methods: BTreeSet<DeliveryMethod>,
    pub default_advance_warning: Vec<u32>,
    pub default_sound: String,
    pub high_priority_categories: Vec<String>,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self::from_config(&CarebellConfig::default())
    }
}

impl SchedulerPolicy {
    #[must_use]
    pub fn from_config(config: &CarebellConfig) -> Self {
        Self {
            retention: config.retention,
            default_methods: config.notifications.default_methods.iter().copied().collect(),
            default_advance_warning: config.notifications.default_advance_warning.clone(),
            default_sound: "default".to_owned(),
            high_priority_categories: config.notifications.high_priority_categories.clone(),
        }
    }

    fn notifications_for(&self, category: &str) -> EventNotifications {
        let priority = if self.high_priority_categories.iter().any(|c| c == category) {
            Priority::High
        } else {
            Priority::Normal
        };
        EventNotifications {
            enabled: true,
            methods: self.default_methods.clone(),
            advance_warning: self.default_advance_warning.clone(),
            priority,
            sound: Some(self.default_sound.clone()),
        }
    }
}

/// Owns event lifecycle rules over an [`EventStore`].
pub struct EventScheduler {
    store: Arc<dyn EventStore>,
    listeners: ListenerRegistry,
    policy: SchedulerPolicy,
}

impl EventScheduler {
    /// Scheduler over `store` with default policy.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            listeners: ListenerRegistry::new(),
            policy: SchedulerPolicy::default(),
        }
    }

    /// Open the configured resilient store and apply the config's policy.
    #[must_use]
    pub fn open(config: &CarebellConfig) -> Self {
        let store: Arc<dyn EventStore> = Arc::new(ResilientEventStore::open(&config.storage));
        Self::new(store).with_policy(SchedulerPolicy::from_config(config))
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SchedulerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Backend currently serving the store.
    #[must_use]
    pub fn store_backend(&self) -> StoreBackend {
        self.store.backend()
    }

    #[must_use]
    pub fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    // ── listeners ────────────────────────────────────────────────────────────

    /// Register a lifecycle listener.
    pub fn add_listener<F>(&self, kind: LifecycleKind, callback: F) -> ListenerId
    where
        F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.add(kind, callback)
    }

    /// Unregister a lifecycle listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    // ── mutations ────────────────────────────────────────────────────────────

    /// Create an event.
    ///
    /// # Errors
    ///
    /// [`CarebellError::InvalidDateTime`] for an unparsable time and
    /// [`CarebellError::InvalidInput`] for an empty title or a bad rule.
    pub fn create_event(&self, input: EventInput) -> Result<Event> {
        self.create_event_at(input, Utc::now())
    }

    /// [`Self::create_event`] with an explicit clock.
    pub fn create_event_at(&self, input: EventInput, now: DateTime<Utc>) -> Result<Event> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(CarebellError::InvalidInput("event title is required".to_owned()));
        }
        let datetime = parse_event_datetime(&input.datetime)?;
        if let Some(rule) = &input.recurring {
            validate_rule(rule)?;
        }

        let category = input
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(CATEGORY_GENERAL)
            .to_owned();

        let mut notifications = self.policy.notifications_for(&category);
        if let Some(patch) = &input.notifications {
            patch.apply_to(&mut notifications);
        }

        let mut event = Event {
            id: Event::new_id(),
            title: title.to_owned(),
            description: input.description.unwrap_or_default(),
            category,
            datetime,
            recurring: input.recurring,
            next_occurrence: None,
            notifications,
            status: EventStatus::Pending,
            metadata: EventMetadata::new(input.created_by.as_deref().unwrap_or("user"), now),
        };
        event.next_occurrence = initial_occurrence(&event, now);

        let stored = self.store.put(&event)?;
        tracing::info!(
            event_id = %stored.id,
            category = %stored.category,
            recurring = stored.is_recurring(),
            "event created"
        );
        self.listeners.notify(&LifecycleEvent::EventCreated {
            event: stored.clone(),
        });
        Ok(stored)
    }

    /// Apply a partial update.
    ///
    /// Changing the anchor time or the recurrence recomputes the next
    /// occurrence.
    ///
    /// # Errors
    ///
    /// [`CarebellError::NotFound`] for an unknown id, plus the validation
    /// errors of [`Self::create_event`].
    pub fn update_event(&self, id: &str, patch: EventPatch) -> Result<Event> {
        self.update_event_at(id, patch, Utc::now())
    }

    /// [`Self::update_event`] with an explicit clock.
    pub fn update_event_at(&self, id: &str, patch: EventPatch, now: DateTime<Utc>) -> Result<Event> {
        let mut event = self.get_event(id)?;

        if let Some(title) = &patch.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(CarebellError::InvalidInput("event title is required".to_owned()));
            }
            event.title = title.to_owned();
        }
        if let Some(description) = &patch.description {
            event.description.clone_from(description);
        }
        if let Some(category) = &patch.category {
            event.category.clone_from(category);
        }
        if let Some(raw) = &patch.datetime {
            event.datetime = parse_event_datetime(raw)?;
        }
        if let Some(recurring) = &patch.recurring {
            if let Some(rule) = recurring {
                validate_rule(rule)?;
            }
            event.recurring.clone_from(recurring);
        }
        if let Some(notifications) = &patch.notifications {
            notifications.apply_to(&mut event.notifications);
        }
        if let Some(status) = patch.status {
            if status == EventStatus::Cancelled && event.status != EventStatus::Cancelled {
                event.metadata.cancelled_at = Some(now);
            }
            event.status = status;
        }
        if patch.reschedules() {
            event.next_occurrence = initial_occurrence(&event, now);
        }

        self.save_updated(event)
    }

    /// Mark the current instance done.
    ///
    /// One-time events become completed. Recurring events stay pending and
    /// advance to the first occurrence after `now`.
    ///
    /// # Errors
    ///
    /// [`CarebellError::NotFound`] for an unknown id,
    /// [`CarebellError::InvalidInput`] for a cancelled event.
    pub fn complete_event(&self, id: &str) -> Result<Event> {
        self.complete_event_at(id, Utc::now())
    }

    /// [`Self::complete_event`] with an explicit clock.
    pub fn complete_event_at(&self, id: &str, now: DateTime<Utc>) -> Result<Event> {
        let mut event = self.get_event(id)?;
        reject_cancelled(&event)?;

        event.metadata.completed_count += 1;
        event.metadata.last_completed = Some(now);
        if event.is_recurring() {
            event.status = EventStatus::Pending;
            event.next_occurrence = event.due_at().and_then(|due| next_after(&event, due, now));
            if event.next_occurrence.is_none() {
                tracing::info!(event_id = %event.id, "recurring series ended");
            }
        } else {
            event.status = EventStatus::Completed;
        }

        tracing::info!(
            event_id = %event.id,
            completed_count = event.metadata.completed_count,
            "event completed"
        );
        self.save_updated(event)
    }

    /// Push the due time back by `minutes`.
    ///
    /// # Errors
    ///
    /// [`CarebellError::NotFound`] for an unknown id,
    /// [`CarebellError::InvalidInput`] for a cancelled event.
    pub fn snooze_event(&self, id: &str, minutes: u32) -> Result<Event> {
        self.snooze_event_at(id, minutes, Utc::now())
    }

    /// [`Self::snooze_event`] with an explicit clock.
    pub fn snooze_event_at(&self, id: &str, minutes: u32, now: DateTime<Utc>) -> Result<Event> {
        let mut event = self.get_event(id)?;
        reject_cancelled(&event)?;

        let base = event.due_at().unwrap_or(event.datetime);
        event.next_occurrence = Some(base + Duration::minutes(i64::from(minutes)));
        event.metadata.snooze_count += 1;
        event.metadata.snoozed_at = Some(now);

        tracing::info!(event_id = %event.id, minutes, "event snoozed");
        self.save_updated(event)
    }

    /// Cancel an event. Cancelled is terminal.
    ///
    /// # Errors
    ///
    /// [`CarebellError::NotFound`] for an unknown id.
    pub fn cancel_event(&self, id: &str) -> Result<Event> {
        self.cancel_event_at(id, Utc::now())
    }

    /// [`Self::cancel_event`] with an explicit clock.
    pub fn cancel_event_at(&self, id: &str, now: DateTime<Utc>) -> Result<Event> {
        let mut event = self.get_event(id)?;
        if event.status == EventStatus::Cancelled {
            return Ok(event);
        }
        event.status = EventStatus::Cancelled;
        event.metadata.cancelled_at = Some(now);
        tracing::info!(event_id = %event.id, "event cancelled");
        self.save_updated(event)
    }

    /// Delete an event. Deleting a missing id is a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn delete_event(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(id)?;
        if removed {
            tracing::info!(event_id = %id, "event deleted");
            self.listeners.notify(&LifecycleEvent::EventDeleted { id: id.to_owned() });
        }
        Ok(removed)
    }

    /// Remove completed one-time events and cancelled events older than
    /// their retention windows. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn cleanup_expired_events(&self) -> Result<usize> {
        self.cleanup_expired_events_at(Utc::now())
    }

    /// [`Self::cleanup_expired_events`] with an explicit clock.
    pub fn cleanup_expired_events_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let completed_cutoff = now - Duration::days(i64::from(self.policy.retention.completed_days));
        let cancelled_cutoff = now - Duration::days(i64::from(self.policy.retention.cancelled_days));

        let expired: Vec<String> = self
            .store
            .get_all()?
            .into_iter()
            .filter(|event| match event.status {
                EventStatus::Completed if !event.is_recurring() => {
                    event.metadata.last_completed.unwrap_or(event.datetime) < completed_cutoff
                }
                EventStatus::Cancelled => {
                    event.metadata.cancelled_at.unwrap_or(event.datetime) < cancelled_cutoff
                }
                _ => false,
            })
            .map(|event| event.id)
            .collect();

        let mut removed = 0;
        for id in &expired {
            if self.delete_event(id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "expired events cleaned up");
        }
        Ok(removed)
    }

    /// Import events from export data (the JSON form of [`EventExport`]).
    /// Every imported event gets a fresh id. Records that fail to decode or
    /// to persist are logged and skipped.
    ///
    /// # Errors
    ///
    /// [`CarebellError::InvalidInput`] when `data` has no `events` array.
    pub fn import_events(&self, data: &serde_json::Value) -> Result<Vec<Event>> {
        self.import_events_at(data, Utc::now())
    }

    /// [`Self::import_events`] with an explicit clock.
    pub fn import_events_at(
        &self,
        data: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let records = data
            .get("events")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                CarebellError::InvalidInput("import data must contain an events array".to_owned())
            })?;
        match data.get("version").and_then(serde_json::Value::as_str) {
            Some(EXPORT_VERSION) => {}
            version => {
                tracing::warn!(?version, "importing events from an unknown export version");
            }
        }

        let mut imported = Vec::with_capacity(records.len());
        let mut skipped = 0usize;
        for (index, record) in records.iter().enumerate() {
            let mut event = match Event::deserialize(record) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping malformed import record");
                    skipped += 1;
                    continue;
                }
            };
            event.id = Event::new_id();
            event.metadata.imported_at = Some(now);
            match self.store.put(&event) {
                Ok(stored) => {
                    self.listeners.notify(&LifecycleEvent::EventCreated {
                        event: stored.clone(),
                    });
                    imported.push(stored);
                }
                Err(e) => {
                    tracing::warn!(index, title = %event.title, error = %e, "failed to store imported event");
                    skipped += 1;
                }
            }
        }
        tracing::info!(count = imported.len(), skipped, "events imported");
        Ok(imported)
    }

    // ── queries ──────────────────────────────────────────────────────────────

    /// Fetch one event.
    ///
    /// # Errors
    ///
    /// [`CarebellError::NotFound`] for an unknown id.
    pub fn get_event(&self, id: &str) -> Result<Event> {
        self.store
            .get(id)?
            .ok_or_else(|| CarebellError::NotFound { id: id.to_owned() })
    }

    /// Every stored event, ordered by due time (ended series last).
    pub fn all_events(&self) -> Result<Vec<Event>> {
        let mut events = self.store.get_all()?;
        sort_by_due(&mut events);
        Ok(events)
    }

    /// Events matching every present criterion, ordered by due time.
    pub fn search_events(&self, criteria: &SearchCriteria) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .store
            .get_all()?
            .into_iter()
            .filter(|event| criteria.matches(event))
            .collect();
        sort_by_due(&mut events);
        Ok(events)
    }

    /// Pending events that still have a due time, soonest first.
    pub fn get_pending_events(&self) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .store
            .get_all()?
            .into_iter()
            .filter(|event| event.status == EventStatus::Pending && event.due_at().is_some())
            .collect();
        sort_by_due(&mut events);
        Ok(events)
    }

    /// Pending events due in `[now, now + within_minutes]`. Overdue events
    /// are not included; see [`Self::get_overdue_events`].
    pub fn get_events_due(&self, within_minutes: u32) -> Result<Vec<Event>> {
        self.get_events_due_at(within_minutes, Utc::now())
    }

    /// [`Self::get_events_due`] with an explicit clock.
    pub fn get_events_due_at(&self, within_minutes: u32, now: DateTime<Utc>) -> Result<Vec<Event>> {
        let horizon = now + Duration::minutes(i64::from(within_minutes));
        Ok(self
            .get_pending_events()?
            .into_iter()
            .filter(|event| event.due_at().is_some_and(|due| due >= now && due <= horizon))
            .collect())
    }

    /// Pending events whose due time is at or before now.
    pub fn get_overdue_events(&self) -> Result<Vec<Event>> {
        self.get_overdue_events_at(Utc::now())
    }

    /// [`Self::get_overdue_events`] with an explicit clock.
    pub fn get_overdue_events_at(&self, now: DateTime<Utc>) -> Result<Vec<Event>> {
        Ok(self
            .get_pending_events()?
            .into_iter()
            .filter(|event| event.due_at().is_some_and(|due| due <= now))
            .collect())
    }

    /// Resolve free text to exactly one pending event.
    ///
    /// `on` narrows the match to events due on that UTC day.
    ///
    /// # Errors
    ///
    /// [`CarebellError::NoMatch`] when nothing matches and
    /// [`CarebellError::AmbiguousMatch`] listing every candidate when more
    /// than one does. Never picks one arbitrarily.
    pub fn find_unique_pending(&self, query: &str, on: Option<NaiveDate>) -> Result<Event> {
        let needle = query.trim().to_lowercase();
        let mut matches: Vec<Event> = self
            .get_pending_events()?
            .into_iter()
            .filter(|event| event.matches_text(&needle))
            .filter(|event| match on {
                Some(day) => event.due_at().is_some_and(|due| due.date_naive() == day),
                None => true,
            })
            .collect();

        match matches.len() {
            0 => Err(CarebellError::NoMatch {
                query: query.to_owned(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(CarebellError::AmbiguousMatch {
                query: query.to_owned(),
                candidates: matches.iter().map(Event::to_candidate).collect(),
            }),
        }
    }

    /// Aggregate counts.
    pub fn statistics(&self) -> Result<EventStatistics> {
        Ok(EventStatistics::from_events(&self.store.get_all()?))
    }

    /// Dump every event.
    pub fn export_events(&self) -> Result<EventExport> {
        self.export_events_at(Utc::now())
    }

    /// [`Self::export_events`] with an explicit clock.
    pub fn export_events_at(&self, now: DateTime<Utc>) -> Result<EventExport> {
        Ok(EventExport {
            version: EXPORT_VERSION.to_owned(),
            export_date: now,
            events: self.all_events()?,
        })
    }

    fn save_updated(&self, event: Event) -> Result<Event> {
        let stored = self.store.put(&event)?;
        self.listeners.notify(&LifecycleEvent::EventUpdated {
            event: stored.clone(),
        });
        Ok(stored)
    }
}

/// Next due time for a freshly anchored event. A recurring series whose
/// anchor is already in the past starts at its first occurrence after `now`.
fn initial_occurrence(event: &Event, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let first = first_occurrence(event)?;
    if event.is_recurring() && first < now {
        next_after(event, first, now)
    } else {
        Some(first)
    }
}

fn validate_rule(rule: &Recurrence) -> Result<()> {
    if rule.kind == RecurrenceKind::Custom && rule.custom_interval_ms.is_some_and(|ms| ms <= 0) {
        return Err(CarebellError::InvalidInput(
            "custom recurrence interval must be positive".to_owned(),
        ));
    }
    Ok(())
}

fn reject_cancelled(event: &Event) -> Result<()> {
    if event.status == EventStatus::Cancelled {
        return Err(CarebellError::InvalidInput(format!(
            "event {} is cancelled",
            event.id
        )));
    }
    Ok(())
}

fn sort_by_due(events: &mut [Event]) {
    events.sort_by_key(|event| (event.due_at().is_none(), event.due_at()));
}

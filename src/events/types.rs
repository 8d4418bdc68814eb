//! Health event records and the request/query types around them.
//!
//! An [`Event`] is one reminder, either one-time or recurring. Everything a
//! caller can hand to the scheduler ([`EventInput`], [`EventPatch`],
//! [`SearchCriteria`]) lives here too so the command layer, host bridge and
//! background coordinator share one vocabulary.

use crate::error::{CarebellError, MatchCandidate, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Well-known category for medication reminders.
pub const CATEGORY_MEDICATION: &str = "medication";
/// Well-known category for blood-pressure checks.
pub const CATEGORY_BLOOD_PRESSURE: &str = "blood-pressure";
/// Well-known category for appointments.
pub const CATEGORY_APPOINTMENT: &str = "appointment";
/// Category used when the caller does not supply one.
pub const CATEGORY_GENERAL: &str = "general";
/// Category for synthetic events created by notification self-tests.
pub const CATEGORY_TEST: &str = "test";

/// A channel a notification can be delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    /// OS-level system notification.
    System,
    /// Device vibration.
    Vibration,
    /// Audio asset or synthesized tone.
    Sound,
    /// In-page modal.
    Visual,
}

impl DeliveryMethod {
    /// Wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Vibration => "vibration",
            Self::Sound => "sound",
            Self::Visual => "visual",
        }
    }
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The only actionable state.
    #[default]
    Pending,
    /// Terminal for one-time events.
    Completed,
    /// Terminal.
    Cancelled,
}

impl EventStatus {
    /// Wire name of the status, also used as the indexed column value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Recurrence cadence.
///
/// Unrecognised kinds survive a persistence round trip as [`RecurrenceKind::Other`]
/// so the calculator can log them instead of failing the whole load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
    /// Fixed millisecond offset (`custom_interval_ms`).
    Custom,
    Other(String),
}

impl From<String> for RecurrenceKind {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            "custom" => Self::Custom,
            _ => Self::Other(raw),
        }
    }
}

impl From<RecurrenceKind> for String {
    fn from(kind: RecurrenceKind) -> Self {
        match kind {
            RecurrenceKind::Daily => "daily".to_owned(),
            RecurrenceKind::Weekly => "weekly".to_owned(),
            RecurrenceKind::Monthly => "monthly".to_owned(),
            RecurrenceKind::Custom => "custom".to_owned(),
            RecurrenceKind::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for RecurrenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
            Self::Custom => f.write_str("custom"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

fn default_interval() -> u32 {
    1
}

/// Recurrence rule. Absent on an event means one-time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    /// Cadence.
    #[serde(rename = "type")]
    pub kind: RecurrenceKind,
    /// Multiplier on the cadence; zero is treated as one.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Occurrences after this instant end the series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Offset for [`RecurrenceKind::Custom`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_interval_ms: Option<i64>,
}

impl Recurrence {
    /// Recurrence of `kind` every `interval` units with no end date.
    #[must_use]
    pub fn new(kind: RecurrenceKind, interval: u32) -> Self {
        Self {
            kind,
            interval,
            end_date: None,
            custom_interval_ms: None,
        }
    }

    /// Every `interval` days.
    #[must_use]
    pub fn daily(interval: u32) -> Self {
        Self::new(RecurrenceKind::Daily, interval)
    }

    /// Every `interval` weeks.
    #[must_use]
    pub fn weekly(interval: u32) -> Self {
        Self::new(RecurrenceKind::Weekly, interval)
    }

    /// Every `interval` calendar months.
    #[must_use]
    pub fn monthly(interval: u32) -> Self {
        Self::new(RecurrenceKind::Monthly, interval)
    }

    /// Every `interval_ms` milliseconds.
    #[must_use]
    pub fn custom(interval_ms: i64) -> Self {
        Self {
            custom_interval_ms: Some(interval_ms),
            ..Self::new(RecurrenceKind::Custom, 1)
        }
    }

    /// End the series after `end`.
    #[must_use]
    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }
}

/// Per-event notification preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventNotifications {
    pub enabled: bool,
    pub methods: BTreeSet<DeliveryMethod>,
    /// Minutes before the due time at which to warn.
    pub advance_warning: Vec<u32>,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

impl Default for EventNotifications {
    fn default() -> Self {
        Self {
            enabled: true,
            methods: [DeliveryMethod::System, DeliveryMethod::Vibration]
                .into_iter()
                .collect(),
            advance_warning: vec![5],
            priority: Priority::Normal,
            sound: None,
        }
    }
}

/// Explicit notification overrides supplied with a create or update call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsPatch {
    pub enabled: Option<bool>,
    pub methods: Option<BTreeSet<DeliveryMethod>>,
    pub advance_warning: Option<Vec<u32>>,
    pub priority: Option<Priority>,
    pub sound: Option<String>,
}

impl NotificationsPatch {
    /// Overlay these explicit values onto `base`.
    pub fn apply_to(&self, base: &mut EventNotifications) {
        if let Some(enabled) = self.enabled {
            base.enabled = enabled;
        }
        if let Some(methods) = &self.methods {
            base.methods = methods.clone();
        }
        if let Some(advance) = &self.advance_warning {
            base.advance_warning = advance.clone();
        }
        if let Some(priority) = self.priority {
            base.priority = priority;
        }
        if let Some(sound) = &self.sound {
            base.sound = Some(sound.clone());
        }
    }
}

/// Audit counters. Mutated only by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub completed_count: u32,
    #[serde(default)]
    pub last_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snooze_count: u32,
    #[serde(default)]
    pub snoozed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,
}

impl EventMetadata {
    /// Fresh metadata stamped at `now`.
    #[must_use]
    pub fn new(created_by: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            created_by: created_by.into(),
            completed_count: 0,
            last_completed: None,
            snooze_count: 0,
            snoozed_at: None,
            cancelled_at: None,
            imported_at: None,
        }
    }
}

/// One health reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique, immutable, never reused.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Open-ended tag such as `medication` or `appointment`.
    pub category: String,
    /// Anchor occurrence.
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub recurring: Option<Recurrence>,
    /// When the event is next due. `None` on a recurring event means the
    /// series has ended.
    #[serde(default)]
    pub next_occurrence: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notifications: EventNotifications,
    #[serde(default)]
    pub status: EventStatus,
    pub metadata: EventMetadata,
}

impl Event {
    /// Generate a new unique event id.
    #[must_use]
    pub fn new_id() -> String {
        format!("event_{}", uuid::Uuid::new_v4().simple())
    }

    /// Returns `true` when the event has a recurrence rule.
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.recurring.is_some()
    }

    /// Returns `true` for a recurring event whose series has ended.
    #[must_use]
    pub fn is_series_ended(&self) -> bool {
        self.is_recurring() && self.next_occurrence.is_none()
    }

    /// When the event is next due, or `None` once a series has ended.
    #[must_use]
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match (self.next_occurrence, &self.recurring) {
            (Some(next), _) => Some(next),
            (None, None) => Some(self.datetime),
            (None, Some(_)) => None,
        }
    }

    /// Synthetic events are created by notification self-tests. Action
    /// handlers simulate success for them instead of failing.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        is_synthetic_event(&self.id, &self.category)
    }

    /// Case-insensitive substring match on title or description.
    ///
    /// `query_lower` must already be lowercased.
    #[must_use]
    pub fn matches_text(&self, query_lower: &str) -> bool {
        self.title.to_lowercase().contains(query_lower)
            || self.description.to_lowercase().contains(query_lower)
    }

    /// Summary used when reporting an ambiguous match.
    #[must_use]
    pub fn to_candidate(&self) -> MatchCandidate {
        MatchCandidate {
            id: self.id.clone(),
            title: self.title.clone(),
            next_occurrence: self.due_at(),
        }
    }
}

/// Shared synthetic-event test used for events and delivery records alike.
#[must_use]
pub fn is_synthetic_event(id: &str, category: &str) -> bool {
    category == CATEGORY_TEST || id.contains("test")
}

/// Structured input for creating an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventInput {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// ISO-ish date/time string, validated by [`parse_event_datetime`].
    pub datetime: String,
    pub recurring: Option<Recurrence>,
    pub notifications: Option<NotificationsPatch>,
    pub created_by: Option<String>,
}

impl EventInput {
    /// Input with a title and a raw date/time string.
    #[must_use]
    pub fn new(title: impl Into<String>, datetime: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            datetime: datetime.into(),
            ..Self::default()
        }
    }

    /// Input anchored at an already-parsed instant.
    #[must_use]
    pub fn at(title: impl Into<String>, datetime: DateTime<Utc>) -> Self {
        Self::new(title, datetime.to_rfc3339())
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_recurring(mut self, recurring: Recurrence) -> Self {
        self.recurring = Some(recurring);
        self
    }

    #[must_use]
    pub fn with_notifications(mut self, notifications: NotificationsPatch) -> Self {
        self.notifications = Some(notifications);
        self
    }

    #[must_use]
    pub fn created_by(mut self, creator: impl Into<String>) -> Self {
        self.created_by = Some(creator.into());
        self
    }
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    /// New anchor time as an ISO-ish string.
    pub datetime: Option<String>,
    /// `Some(None)` clears the recurrence; an explicit JSON `null` does the same.
    #[serde(deserialize_with = "deserialize_some")]
    pub recurring: Option<Option<Recurrence>>,
    pub notifications: Option<NotificationsPatch>,
    pub status: Option<EventStatus>,
}

impl EventPatch {
    /// Returns `true` when the patch changes the anchor time or the recurrence.
    #[must_use]
    pub fn reschedules(&self) -> bool {
        self.datetime.is_some() || self.recurring.is_some()
    }
}

fn deserialize_some<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Search filter. All present criteria are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    /// Case-insensitive substring of title or description.
    pub query: Option<String>,
    pub category: Option<String>,
    pub status: Option<EventStatus>,
    /// Inclusive lower bound on the due time.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the due time.
    pub end: Option<DateTime<Utc>>,
}

impl SearchCriteria {
    /// Free-text search.
    #[must_use]
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Returns `true` if `event` satisfies every present criterion.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(query) = &self.query {
            if !event.matches_text(&query.to_lowercase()) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &event.category != category {
                return false;
            }
        }
        if let Some(status) = self.status {
            if event.status != status {
                return false;
            }
        }
        if self.start.is_some() || self.end.is_some() {
            let Some(due) = event.due_at() else {
                return false;
            };
            if self.start.is_some_and(|start| due < start) {
                return false;
            }
            if self.end.is_some_and(|end| due > end) {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStatistics {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub recurring: usize,
    pub categories: BTreeMap<String, usize>,
}

impl EventStatistics {
    /// Tally `events`.
    #[must_use]
    pub fn from_events(events: &[Event]) -> Self {
        let mut stats = Self {
            total: events.len(),
            ..Self::default()
        };
        for event in events {
            match event.status {
                EventStatus::Pending => stats.pending += 1,
                EventStatus::Completed => stats.completed += 1,
                EventStatus::Cancelled => stats.cancelled += 1,
            }
            if event.is_recurring() {
                stats.recurring += 1;
            }
            *stats.categories.entry(event.category.clone()).or_insert(0) += 1;
        }
        stats
    }
}

/// Pending one-time medication event at a fixed instant, for unit tests.
#[cfg(test)]
pub(crate) fn test_event(id: &str, title: &str) -> Event {
    use chrono::TimeZone;
    let at = Utc
        .with_ymd_and_hms(2026, 5, 4, 8, 0, 0)
        .single()
        .unwrap_or_default();
    Event {
        id: id.to_owned(),
        title: title.to_owned(),
        description: String::new(),
        category: CATEGORY_MEDICATION.to_owned(),
        datetime: at,
        recurring: None,
        next_occurrence: Some(at),
        notifications: EventNotifications::default(),
        status: EventStatus::Pending,
        metadata: EventMetadata::new("user", at),
    }
}

/// Current export format version.
pub const EXPORT_VERSION: &str = "1.0";

/// Portable dump of every stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventExport {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub events: Vec<Event>,
}

/// Parse an ISO-ish date/time string into a UTC instant.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM[:SS]`, `YYYY-MM-DD HH:MM[:SS]`
/// (both read as UTC) and a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_event_datetime(input: &str) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();
    let invalid = || CarebellError::InvalidDateTime {
        input: input.to_owned(),
    };
    if trimmed.is_empty() {
        return Err(invalid());
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(invalid)
}

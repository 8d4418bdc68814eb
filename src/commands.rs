//! Reminder command facade.
//!
//! Plain structured commands for a voice or chat layer: add, remove, list,
//! update, snooze and complete. Lookups by free text resolve over pending
//! events only and never guess: zero matches is [`CarebellError::NoMatch`],
//! several is [`CarebellError::AmbiguousMatch`]. Replies are short plain
//! sentences suitable for speech; [`render_error`] turns failures into the
//! same register.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CarebellError, Result};
use crate::events::scheduler::EventScheduler;
use crate::events::types::{
    CATEGORY_APPOINTMENT, CATEGORY_BLOOD_PRESSURE, CATEGORY_GENERAL, CATEGORY_MEDICATION, Event,
    EventInput, EventPatch, NotificationsPatch, Priority, Recurrence, RecurrenceKind,
    parse_event_datetime,
};
use crate::notify::dispatcher::NotificationDispatcher;

const DEFAULT_SNOOZE_MINUTES: u32 = 15;

/// `add_event` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddEventRequest {
    pub title: String,
    pub datetime: String,
    pub description: Option<String>,
    /// Inferred from the title and description when absent.
    pub category: Option<String>,
    /// Phrase such as "daily" or "every 2 weeks".
    pub recurring: Option<String>,
    pub advance_warning: Option<Vec<u32>>,
    pub priority: Option<Priority>,
}

/// `remove_event` arguments. An explicit id skips the text lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoveEventRequest {
    pub description: Option<String>,
    /// Narrow the lookup to events due that day.
    pub date: Option<String>,
    pub event_id: Option<String>,
}

/// `list_pending` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListPendingRequest {
    /// `today`, `tomorrow`, `week`, `month` or a number of days.
    pub timeframe: Option<String>,
    /// Substring of the category or title.
    pub category: Option<String>,
    pub limit: Option<usize>,
}

/// `update_event` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateEventRequest {
    pub description: String,
    pub new_datetime: Option<String>,
    pub new_title: Option<String>,
    pub new_description: Option<String>,
    pub new_recurring: Option<String>,
}

/// `snooze_event` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozeRequest {
    pub description: String,
    pub minutes: Option<u32>,
}

/// `mark_complete` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompleteRequest {
    pub description: String,
}

/// Listing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    /// Through the end of today, overdue included.
    Today,
    /// Only events due tomorrow.
    Tomorrow,
    Week,
    Month,
    Days(u32),
}

impl FromStr for Timeframe {
    type Err = CarebellError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "tomorrow" => Ok(Self::Tomorrow),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => other.parse().map(Self::Days).map_err(|_| {
                CarebellError::InvalidInput(format!("unknown timeframe \"{raw}\""))
            }),
        }
    }
}

impl Timeframe {
    /// Inclusive `(start, end)` due-time window relative to `now`.
    #[must_use]
    pub fn window(self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, DateTime<Utc>) {
        let today = now.date_naive();
        let end_of = |day: NaiveDate| {
            day.and_hms_milli_opt(23, 59, 59, 999)
                .map_or(now, |naive| naive.and_utc())
        };
        match self {
            Self::Today => (None, end_of(today)),
            Self::Tomorrow => {
                let tomorrow = today.succ_opt().unwrap_or(today);
                let start = tomorrow.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
                (start, end_of(tomorrow))
            }
            Self::Week => (None, now + Duration::days(7)),
            Self::Month => (None, now + Duration::days(30)),
            Self::Days(days) => (None, now + Duration::days(i64::from(days))),
        }
    }
}

/// Guess a category from free text.
#[must_use]
pub fn infer_category(title: &str, description: &str) -> &'static str {
    let text = format!("{title} {description}").to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));
    if has(&["medication", "medicine", "pill", "dose", "aspirin"]) {
        CATEGORY_MEDICATION
    } else if has(&["blood pressure", "bp "]) || text.trim_end().ends_with(" bp") {
        CATEGORY_BLOOD_PRESSURE
    } else if has(&["appointment", "doctor", "clinic"]) {
        CATEGORY_APPOINTMENT
    } else if has(&["exercise", "workout", "walk"]) {
        "exercise"
    } else if has(&["meal", "eat", "diet"]) {
        "nutrition"
    } else {
        CATEGORY_GENERAL
    }
}

/// Parse a recurrence phrase. Unrecognised phrases repeat daily.
#[must_use]
pub fn parse_recurrence_phrase(phrase: &str) -> Recurrence {
    let text = phrase.to_lowercase();
    let words: Vec<&str> = text.split_whitespace().collect();

    // "every N days|weeks|months"
    for window in words.windows(3) {
        if window[0] != "every" {
            continue;
        }
        let Ok(interval) = window[1].parse::<u32>() else {
            continue;
        };
        match window[2].trim_end_matches('s') {
            "day" => return Recurrence::daily(interval),
            "week" => return Recurrence::weekly(interval),
            "month" => return Recurrence::monthly(interval),
            _ => {}
        }
    }

    if text.contains("weekly") || text.contains("every week") {
        Recurrence::weekly(1)
    } else if text.contains("monthly") || text.contains("every month") {
        Recurrence::monthly(1)
    } else {
        Recurrence::daily(1)
    }
}

/// Human phrase for a recurrence rule.
#[must_use]
pub fn describe_recurrence(rule: &Recurrence) -> String {
    let n = rule.interval.max(1);
    let unit = match &rule.kind {
        RecurrenceKind::Daily => "day",
        RecurrenceKind::Weekly => "week",
        RecurrenceKind::Monthly => "month",
        RecurrenceKind::Custom => {
            let minutes = rule.custom_interval_ms.unwrap_or_default() / 60_000;
            return format!("every {minutes} minutes");
        }
        RecurrenceKind::Other(raw) => return raw.clone(),
    };
    if n == 1 {
        format!("every {unit}")
    } else {
        format!("every {n} {unit}s")
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn due_text(event: &Event) -> String {
    event
        .due_at()
        .map_or_else(|| "no further occurrences".to_owned(), format_time)
}

/// Render a command failure as a reply. `verb` names the attempted action,
/// e.g. "remove" or "mark as complete".
#[must_use]
pub fn render_error(verb: &str, error: &CarebellError) -> String {
    match error {
        CarebellError::NoMatch { query } if query.trim().is_empty() => {
            format!("No pending events found to {verb}.")
        }
        CarebellError::NoMatch { query } => {
            format!("No pending events found matching \"{query}\".")
        }
        CarebellError::AmbiguousMatch { candidates, .. } => {
            let list: Vec<String> = candidates.iter().map(ToString::to_string).collect();
            format!(
                "Found multiple events: {}. Please be more specific about which event to {verb}.",
                list.join(", ")
            )
        }
        CarebellError::InvalidDateTime { input } => format!(
            "Could not understand the time \"{input}\". Please give a date and time like 2026-05-04 08:00."
        ),
        CarebellError::NotFound { id } => format!("No event with id {id}."),
        other => format!("Could not {verb} the event: {other}."),
    }
}

/// Command facade over a scheduler and an optional dispatcher.
#[derive(Clone)]
pub struct ReminderCommands {
    scheduler: Arc<EventScheduler>,
    dispatcher: Option<Arc<NotificationDispatcher>>,
}

impl ReminderCommands {
    pub fn new(scheduler: Arc<EventScheduler>) -> Self {
        Self {
            scheduler,
            dispatcher: None,
        }
    }

    /// Schedule notifications for new events and cancel them for removed ones.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Create an event and schedule its notification.
    ///
    /// # Errors
    ///
    /// [`CarebellError::InvalidDateTime`] for an unparsable time, plus
    /// scheduler validation errors.
    pub async fn add_event(&self, request: AddEventRequest) -> Result<String> {
        self.add_event_at(request, Utc::now()).await
    }

    /// [`Self::add_event`] with an explicit clock.
    pub async fn add_event_at(&self, request: AddEventRequest, now: DateTime<Utc>) -> Result<String> {
        let description = request.description.clone().unwrap_or_default();
        let category = request
            .category
            .clone()
            .unwrap_or_else(|| infer_category(&request.title, &description).to_owned());
        let mut input = EventInput::new(request.title.clone(), request.datetime.clone())
            .with_category(category)
            .created_by("voice");
        if !description.is_empty() {
            input = input.with_description(description);
        }
        if let Some(phrase) = &request.recurring {
            input = input.with_recurring(parse_recurrence_phrase(phrase));
        }
        if request.advance_warning.is_some() || request.priority.is_some() {
            input = input.with_notifications(NotificationsPatch {
                advance_warning: request.advance_warning.clone(),
                priority: request.priority,
                ..NotificationsPatch::default()
            });
        }

        let event = self.scheduler.create_event_at(input, now)?;
        self.schedule_delivery(&event, now).await;

        let mut reply = format!(
            "Event created: \"{}\" scheduled for {}",
            event.title,
            due_text(&event)
        );
        if let Some(rule) = &event.recurring {
            reply.push_str(&format!(" (repeats {})", describe_recurrence(rule)));
        }
        let warnings = &event.notifications.advance_warning;
        if event.notifications.enabled && !warnings.is_empty() {
            let minutes: Vec<String> = warnings.iter().map(ToString::to_string).collect();
            reply.push_str(&format!(
                ". You'll be notified {} minutes before",
                minutes.join(" and ")
            ));
        }
        reply.push('.');
        Ok(reply)
    }

    async fn schedule_delivery(&self, event: &Event, now: DateTime<Utc>) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        let Some(due) = event.due_at() else {
            return;
        };
        if !event.notifications.enabled || due <= now {
            return;
        }
        if let Err(e) = dispatcher.schedule_notification_at(event, due, now).await {
            tracing::warn!(event_id = %event.id, "could not schedule notification: {e}");
        }
    }

    /// Delete one pending event found by id, text and/or day.
    ///
    /// # Errors
    ///
    /// [`CarebellError::NoMatch`], [`CarebellError::AmbiguousMatch`],
    /// [`CarebellError::NotFound`] for an explicit unknown id, and
    /// [`CarebellError::InvalidDateTime`] for an unparsable day.
    pub async fn remove_event(&self, request: RemoveEventRequest) -> Result<String> {
        let event = match &request.event_id {
            Some(id) => self.scheduler.get_event(id)?,
            None => {
                let day = request
                    .date
                    .as_deref()
                    .map(parse_event_datetime)
                    .transpose()?
                    .map(|at| at.date_naive());
                let query = request.description.as_deref().unwrap_or_default();
                self.scheduler.find_unique_pending(query, day)?
            }
        };

        self.scheduler.delete_event(&event.id)?;
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.cancel_for_event(&event.id);
        }
        Ok(format!(
            "Removed event: \"{}\" scheduled for {}.",
            event.title,
            due_text(&event)
        ))
    }

    /// List pending events, soonest first.
    ///
    /// # Errors
    ///
    /// [`CarebellError::InvalidInput`] for an unknown timeframe.
    pub fn list_pending(&self, request: &ListPendingRequest) -> Result<String> {
        self.list_pending_at(request, Utc::now())
    }

    /// [`Self::list_pending`] with an explicit clock.
    pub fn list_pending_at(&self, request: &ListPendingRequest, now: DateTime<Utc>) -> Result<String> {
        let timeframe = request
            .timeframe
            .as_deref()
            .map(Timeframe::from_str)
            .transpose()?;
        let category = request.category.as_deref().map(str::to_lowercase);

        let mut events: Vec<Event> = self
            .scheduler
            .get_pending_events()?
            .into_iter()
            .filter(|event| match &category {
                Some(needle) => {
                    event.category.to_lowercase().contains(needle)
                        || event.title.to_lowercase().contains(needle)
                }
                None => true,
            })
            .filter(|event| match (timeframe, event.due_at()) {
                (Some(frame), Some(due)) => {
                    let (start, end) = frame.window(now);
                    start.is_none_or(|start| due >= start) && due <= end
                }
                _ => true,
            })
            .collect();
        if let Some(limit) = request.limit {
            events.truncate(limit);
        }

        let timeframe_text = request
            .timeframe
            .as_deref()
            .map(|t| format!(" for {t}"))
            .unwrap_or_default();
        if events.is_empty() {
            let category_text = request
                .category
                .as_deref()
                .map(|c| format!(" in {c}"))
                .unwrap_or_default();
            return Ok(format!("No pending events found{timeframe_text}{category_text}."));
        }

        let lines: Vec<String> = events
            .iter()
            .enumerate()
            .map(|(index, event)| {
                let mut line = format!("{}. {} - {}", index + 1, event.title, due_text(event));
                if let Some(rule) = &event.recurring {
                    line.push_str(&format!(" ({})", rule.kind));
                }
                if !event.description.is_empty() {
                    line.push_str(&format!(" - {}", event.description));
                }
                line
            })
            .collect();
        let category_text = request
            .category
            .as_deref()
            .map(|c| format!(" ({c})"))
            .unwrap_or_default();
        Ok(format!(
            "Upcoming events{timeframe_text}{category_text}:\n\n{}",
            lines.join("\n")
        ))
    }

    /// Update one pending event found by text.
    ///
    /// # Errors
    ///
    /// Lookup errors and [`CarebellError::InvalidDateTime`].
    pub fn update_event(&self, request: UpdateEventRequest) -> Result<String> {
        let event = self.scheduler.find_unique_pending(&request.description, None)?;
        let patch = EventPatch {
            title: request.new_title,
            description: request.new_description,
            datetime: request.new_datetime,
            recurring: request
                .new_recurring
                .as_deref()
                .map(|phrase| Some(parse_recurrence_phrase(phrase))),
            ..EventPatch::default()
        };
        let rescheduled = patch.reschedules();
        let updated = self.scheduler.update_event(&event.id, patch)?;

        let mut reply = format!("Updated event: \"{}\"", updated.title);
        if rescheduled {
            reply.push_str(&format!(" - next at {}", due_text(&updated)));
        }
        reply.push('.');
        Ok(reply)
    }

    /// Snooze one pending event found by text. Defaults to 15 minutes.
    ///
    /// # Errors
    ///
    /// Lookup errors.
    pub fn snooze_event(&self, request: &SnoozeRequest) -> Result<String> {
        let event = self.scheduler.find_unique_pending(&request.description, None)?;
        let minutes = request.minutes.unwrap_or(DEFAULT_SNOOZE_MINUTES);
        let snoozed = self.scheduler.snooze_event(&event.id, minutes)?;
        Ok(format!(
            "Snoozed \"{}\" for {minutes} minutes. Next reminder at {}.",
            snoozed.title,
            due_text(&snoozed)
        ))
    }

    /// Complete one pending event found by text.
    ///
    /// # Errors
    ///
    /// Lookup errors.
    pub fn mark_complete(&self, request: &CompleteRequest) -> Result<String> {
        let event = self.scheduler.find_unique_pending(&request.description, None)?;
        let completed = self.scheduler.complete_event(&event.id)?;
        let mut reply = format!("Marked \"{}\" as completed.", completed.title);
        if completed.is_recurring() {
            if let Some(next) = completed.next_occurrence {
                reply.push_str(&format!(" Next occurrence scheduled for {}.", format_time(next)));
            }
        }
        Ok(reply)
    }
}

//! Next-occurrence calculation for recurring events.
//!
//! Pure functions only. The scheduler decides which base time to feed in.

use crate::events::types::{Event, Recurrence, RecurrenceKind};
use chrono::{DateTime, Duration, Months, Utc};

/// Compute the next due instant of `event` after `from`.
///
/// `from` defaults to the event's anchor `datetime`. One-time events always
/// return their anchor. Returns `None` once the series has passed its end
/// date. Monthly steps clamp to the last day of shorter months.
#[must_use]
pub fn next_occurrence(event: &Event, from: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let Some(rule) = &event.recurring else {
        return Some(event.datetime);
    };
    let base = from.unwrap_or(event.datetime);

    let next = match step(rule, base) {
        Step::Next(next) => next,
        Step::Unsupported => {
            tracing::warn!(
                event_id = %event.id,
                kind = %rule.kind,
                "unknown recurrence type, keeping anchor time"
            );
            return Some(event.datetime);
        }
        Step::Overflow => {
            tracing::warn!(event_id = %event.id, "recurrence step overflowed, ending series");
            return None;
        }
    };

    within_end(rule, next)
}

/// First occurrence of a series: the anchor itself, unless the anchor is
/// already past the end date.
#[must_use]
pub fn first_occurrence(event: &Event) -> Option<DateTime<Utc>> {
    match &event.recurring {
        None => Some(event.datetime),
        Some(rule) => within_end(rule, event.datetime),
    }
}

/// Advance from `current` until the result is strictly after `now`.
///
/// Completing an instance early moves exactly one interval; completing
/// late skips missed instances but keeps the series' time of day.
#[must_use]
pub fn next_after(
    event: &Event,
    current: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    const MAX_STEPS: usize = 100_000;

    let mut cursor = current;
    for _ in 0..MAX_STEPS {
        let next = next_occurrence(event, Some(cursor))?;
        if next > now {
            return Some(next);
        }
        if next <= cursor {
            // Non-advancing rule (unknown kind or zero custom offset).
            return Some(next);
        }
        cursor = next;
    }
    tracing::warn!(event_id = %event.id, "recurrence catch-up gave up");
    None
}

enum Step {
    Next(DateTime<Utc>),
    Unsupported,
    Overflow,
}

fn step(rule: &Recurrence, base: DateTime<Utc>) -> Step {
    let interval = rule.interval.max(1);
    let next = match &rule.kind {
        RecurrenceKind::Daily => base.checked_add_signed(Duration::days(i64::from(interval))),
        RecurrenceKind::Weekly => {
            base.checked_add_signed(Duration::weeks(i64::from(interval)))
        }
        RecurrenceKind::Monthly => base.checked_add_months(Months::new(interval)),
        RecurrenceKind::Custom => match rule.custom_interval_ms {
            Some(ms) => base.checked_add_signed(Duration::milliseconds(ms)),
            None => {
                tracing::warn!("custom recurrence without an interval");
                Some(base)
            }
        },
        RecurrenceKind::Other(_) => return Step::Unsupported,
    };
    next.map_or(Step::Overflow, Step::Next)
}

fn within_end(rule: &Recurrence, candidate: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match rule.end_date {
        Some(end) if candidate > end => None,
        _ => Some(candidate),
    }
}

//! Shared helpers for integration tests.

use std::sync::Arc;

use carebell::config::{CarebellConfig, StorageConfig};
use carebell::events::{EventScheduler, ListEventStore};
use carebell::notify::{DeliveryQueueStore, NotificationDispatcher};
use carebell::platform::recording::RecordingPlatform;
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Scheduler over an in-memory list store.
pub(crate) fn memory_scheduler() -> Arc<EventScheduler> {
    Arc::new(EventScheduler::new(Arc::new(ListEventStore::in_memory())))
}

/// Config whose database lives in `dir`, with no fallback file.
pub(crate) fn sqlite_config(dir: &tempfile::TempDir) -> CarebellConfig {
    CarebellConfig {
        storage: StorageConfig {
            database_file: Some(dir.path().join("events.db")),
            fallback_file: None,
            force_fallback: false,
        },
        ..CarebellConfig::default()
    }
}

/// Dispatcher on a recording platform with its queue persisted in `dir`.
pub(crate) fn recording_dispatcher(
    rec: &RecordingPlatform,
    scheduler: &Arc<EventScheduler>,
    dir: &tempfile::TempDir,
) -> Arc<NotificationDispatcher> {
    Arc::new(
        NotificationDispatcher::new(rec.platform())
            .with_scheduler(Arc::clone(scheduler))
            .with_queue_store(DeliveryQueueStore::at(dir.path().join("notification_queue.json"))),
    )
}

/// 08:00 UTC on the day after `now`.
pub(crate) fn tomorrow_at_eight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    Utc.from_utc_datetime(&tomorrow.and_hms_opt(8, 0, 0).expect("valid time"))
}

use std::sync::{Arc, Mutex};

use carebell::CarebellError;
use carebell::events::{
    EventInput, EventPatch, EventScheduler, EventStatus, LifecycleEvent, LifecycleKind,
    Recurrence, SearchCriteria, StoreBackend,
};
use chrono::{Duration, Utc};

use crate::helpers::{memory_scheduler, sqlite_config, tomorrow_at_eight};

#[test]
fn daily_medication_advances_one_day_on_completion() {
    let scheduler = memory_scheduler();
    let at = tomorrow_at_eight(Utc::now());

    let event = scheduler
        .create_event(
            EventInput::at("Take Aspirin", at)
                .with_category("medication")
                .with_recurring(Recurrence::daily(1)),
        )
        .unwrap();
    assert_eq!(event.status, EventStatus::Pending);
    assert_eq!(event.next_occurrence, Some(at));

    let completed = scheduler.complete_event(&event.id).unwrap();
    assert_eq!(completed.status, EventStatus::Pending);
    assert_eq!(completed.next_occurrence, Some(at + Duration::days(1)));
    assert_eq!(completed.metadata.completed_count, 1);
}

#[test]
fn one_time_event_completes_and_leaves_pending_list() {
    let scheduler = memory_scheduler();
    let event = scheduler
        .create_event(EventInput::at("Dentist", Utc::now() + Duration::hours(3)))
        .unwrap();

    scheduler.complete_event(&event.id).unwrap();
    assert_eq!(
        scheduler.get_event(&event.id).unwrap().status,
        EventStatus::Completed
    );
    assert!(scheduler.get_pending_events().unwrap().is_empty());
}

#[test]
fn deleting_twice_is_a_quiet_noop() {
    let scheduler = memory_scheduler();
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deleted);
    scheduler.add_listener(LifecycleKind::EventDeleted, move |change| {
        if let LifecycleEvent::EventDeleted { id } = change {
            sink.lock().unwrap().push(id.clone());
        }
        Ok(())
    });

    let event = scheduler
        .create_event(EventInput::at("Walk", Utc::now() + Duration::hours(1)))
        .unwrap();
    assert!(scheduler.delete_event(&event.id).unwrap());
    assert!(!scheduler.delete_event(&event.id).unwrap());
    assert_eq!(*deleted.lock().unwrap(), vec![event.id.clone()]);
    assert!(matches!(
        scheduler.get_event(&event.id),
        Err(CarebellError::NotFound { .. })
    ));
}

#[test]
fn search_finds_events_by_text_and_category() {
    let scheduler = memory_scheduler();
    let soon = Utc::now() + Duration::hours(1);
    scheduler
        .create_event(
            EventInput::at("Blood pressure check", soon)
                .with_category("blood-pressure")
                .with_description("left arm"),
        )
        .unwrap();
    scheduler
        .create_event(EventInput::at("Metformin", soon).with_category("medication"))
        .unwrap();

    let by_text = scheduler
        .search_events(&SearchCriteria::text("LEFT ARM"))
        .unwrap();
    assert_eq!(by_text.len(), 1);
    assert_eq!(by_text[0].title, "Blood pressure check");

    let by_category = scheduler
        .search_events(&SearchCriteria {
            category: Some("medication".to_owned()),
            ..SearchCriteria::default()
        })
        .unwrap();
    assert_eq!(by_category.len(), 1);
    assert_eq!(by_category[0].title, "Metformin");
}

#[test]
fn rescheduling_through_update_moves_next_occurrence() {
    let scheduler = memory_scheduler();
    let event = scheduler
        .create_event(EventInput::new("Physio", "2099-01-10T09:30"))
        .unwrap();

    let updated = scheduler
        .update_event(
            &event.id,
            EventPatch {
                datetime: Some("2099-01-12 14:00".to_owned()),
                ..EventPatch::default()
            },
        )
        .unwrap();
    assert_eq!(
        updated.next_occurrence.unwrap().to_rfc3339(),
        "2099-01-12T14:00:00+00:00"
    );
}

#[test]
fn events_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&dir);

    let id = {
        let scheduler = EventScheduler::open(&config);
        assert_eq!(scheduler.store_backend(), StoreBackend::Durable);
        scheduler
            .create_event(
                EventInput::at("Insulin", tomorrow_at_eight(Utc::now()))
                    .with_recurring(Recurrence::weekly(1)),
            )
            .unwrap()
            .id
    };

    let reopened = EventScheduler::open(&config);
    let event = reopened.get_event(&id).unwrap();
    assert_eq!(event.title, "Insulin");
    assert!(event.is_recurring());
    assert_eq!(reopened.statistics().unwrap().recurring, 1);
}

#[test]
fn export_then_import_assigns_fresh_ids() {
    let source = memory_scheduler();
    let original = source
        .create_event(EventInput::at("Eye drops", Utc::now() + Duration::hours(5)))
        .unwrap();
    let export = source.export_events().unwrap();
    assert_eq!(export.version, "1.0");

    let target = memory_scheduler();
    let imported = target
        .import_events(&serde_json::to_value(&export).unwrap())
        .unwrap();
    assert_eq!(imported.len(), 1);
    assert_ne!(imported[0].id, original.id);
    assert_eq!(imported[0].title, "Eye drops");
    assert!(imported[0].metadata.imported_at.is_some());
}

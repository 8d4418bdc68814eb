use std::sync::Arc;
use std::time::Duration as StdDuration;

use carebell::background::BackgroundCoordinator;
use carebell::events::EventInput;
use carebell::notify::{DeliveryQueueStore, RestoreSummary, ScheduleOutcome};
use carebell::platform::recording::RecordingPlatform;
use chrono::{Duration, Utc};

use crate::helpers::{memory_scheduler, recording_dispatcher};

#[tokio::test(start_paused = true)]
async fn queued_delivery_survives_a_restart_and_fires_on_time() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = memory_scheduler();
    let due = Utc::now() + Duration::hours(1);
    let event = scheduler
        .create_event(EventInput::at("Evening insulin", due))
        .unwrap();

    {
        let rec = RecordingPlatform::new();
        let first = recording_dispatcher(&rec, &scheduler, &dir);
        let outcome = first.schedule_notification(&event, due).await.unwrap();
        assert!(matches!(outcome, ScheduleOutcome::Scheduled { .. }));
        assert!(rec.shown().is_empty());
    }

    let rec = RecordingPlatform::new();
    let second = recording_dispatcher(&rec, &scheduler, &dir);
    let summary = second.restore_scheduled_notifications().await;
    assert_eq!(summary, RestoreSummary { rearmed: 1, delivered: 0 });
    assert!(rec.shown().is_empty());

    tokio::time::sleep(StdDuration::from_secs(3601)).await;
    assert_eq!(rec.shown().len(), 1);
    assert_eq!(rec.shown()[0].title, "Evening insulin");
    assert!(second.queued_deliveries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delivery_missed_while_down_is_shown_at_restore() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = memory_scheduler();
    let due = Utc::now() + Duration::minutes(10);
    let event = scheduler
        .create_event(EventInput::at("Blood pressure check", due))
        .unwrap();

    {
        let rec = RecordingPlatform::new();
        let first = recording_dispatcher(&rec, &scheduler, &dir);
        first
            .schedule_notification_at(&event, due, due - Duration::minutes(10))
            .await
            .unwrap();
    }

    let rec = RecordingPlatform::new();
    let second = recording_dispatcher(&rec, &scheduler, &dir);
    let summary = second
        .restore_scheduled_notifications_at(due + Duration::minutes(5))
        .await;
    assert_eq!(summary, RestoreSummary { rearmed: 0, delivered: 1 });
    assert_eq!(rec.shown().len(), 1);

    let persisted = DeliveryQueueStore::at(dir.path().join("notification_queue.json")).load();
    assert!(persisted.is_empty());
}

#[tokio::test(start_paused = true)]
async fn restoring_twice_does_not_double_arm() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = memory_scheduler();
    let due = Utc::now() + Duration::minutes(30);
    let event = scheduler
        .create_event(EventInput::at("Vitamin D", due))
        .unwrap();

    let rec = RecordingPlatform::new();
    let dispatcher = recording_dispatcher(&rec, &scheduler, &dir);
    dispatcher.schedule_notification(&event, due).await.unwrap();

    let summary = dispatcher.restore_scheduled_notifications().await;
    assert_eq!(summary, RestoreSummary::default());
    assert_eq!(dispatcher.queued_deliveries().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn coordinator_queue_is_restored_from_its_own_file() {
    let dir = tempfile::tempdir().unwrap();
    let queue_file = dir.path().join("worker_queue.json");
    let scheduler = memory_scheduler();
    let now = Utc::now();
    let event = scheduler
        .create_event(EventInput::at("Physio exercises", now + Duration::minutes(5)))
        .unwrap();

    {
        let rec = RecordingPlatform::new();
        let coordinator = Arc::new(BackgroundCoordinator::new(
            rec.platform().notifications,
            DeliveryQueueStore::at(&queue_file),
        ));
        coordinator
            .schedule(event.clone(), now + Duration::minutes(5), now)
            .await;
        assert_eq!(coordinator.queued().len(), 1);
    }

    let rec = RecordingPlatform::new();
    let coordinator = Arc::new(BackgroundCoordinator::new(
        rec.platform().notifications,
        DeliveryQueueStore::at(&queue_file),
    ));
    assert_eq!(coordinator.restore_at(now).await, (1, 0));
    assert_eq!(coordinator.queued()[0].event.id, event.id);

    tokio::time::sleep(StdDuration::from_secs(301)).await;
    assert_eq!(rec.shown().len(), 1);
    assert!(coordinator.queued().is_empty());
    assert!(DeliveryQueueStore::at(&queue_file).load().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delivery_for_event_deleted_while_down_is_dropped_at_restore() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = memory_scheduler();
    let due = Utc::now() + Duration::minutes(10);
    let event = scheduler
        .create_event(EventInput::at("Cancelled appointment", due))
        .unwrap();

    {
        let rec = RecordingPlatform::new();
        let first = recording_dispatcher(&rec, &scheduler, &dir);
        first
            .schedule_notification_at(&event, due, due - Duration::minutes(10))
            .await
            .unwrap();
    }
    assert!(scheduler.delete_event(&event.id).unwrap());

    let rec = RecordingPlatform::new();
    let second = recording_dispatcher(&rec, &scheduler, &dir);
    let summary = second
        .restore_scheduled_notifications_at(due + Duration::minutes(5))
        .await;
    assert_eq!(summary, RestoreSummary::default());
    assert!(rec.shown().is_empty());

    let persisted = DeliveryQueueStore::at(dir.path().join("notification_queue.json")).load();
    assert!(persisted.is_empty());
}

use std::sync::Arc;

use carebell::CarebellError;
use carebell::events::{DeliveryMethod, EventInput, EventScheduler};
use carebell::notify::{
    ActionOutcome, DispatcherEvent, NotificationAction, NotificationDispatcher, NotificationOptions,
};
use carebell::platform::recording::{Device, RecordingPlatform};
use chrono::{Duration, Utc};

use crate::helpers::memory_scheduler;

fn dispatcher(rec: &RecordingPlatform, scheduler: &Arc<EventScheduler>) -> NotificationDispatcher {
    NotificationDispatcher::new(rec.platform()).with_scheduler(Arc::clone(scheduler))
}

#[tokio::test(start_paused = true)]
async fn every_channel_failing_falls_back_to_one_blocking_alert() {
    let rec = RecordingPlatform::new();
    rec.fail_all_channels();
    let scheduler = memory_scheduler();
    let dispatcher = dispatcher(&rec, &scheduler);
    let mut events = dispatcher.subscribe();
    let event = scheduler
        .create_event(EventInput::at("Take Aspirin", Utc::now()))
        .unwrap();

    let report = dispatcher
        .deliver(&event, NotificationOptions::default())
        .await
        .unwrap();

    assert!(report.fallback_alert);
    assert!(report.delivered.is_empty());
    assert_eq!(report.failures.len(), 2);
    let alerts = rec.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("Take Aspirin"));
    assert!(dispatcher.active_notifications().is_empty());
    assert!(matches!(
        events.try_recv().unwrap(),
        DispatcherEvent::FallbackAlert { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn failing_alert_reports_every_channel() {
    let rec = RecordingPlatform::new();
    rec.fail_all_channels();
    rec.fail(Device::Alert);
    let scheduler = memory_scheduler();
    let dispatcher = dispatcher(&rec, &scheduler);
    let event = scheduler
        .create_event(EventInput::at("Take Aspirin", Utc::now()))
        .unwrap();

    let err = dispatcher
        .deliver(&event, NotificationOptions::default())
        .await
        .unwrap_err();
    match err {
        CarebellError::AllChannelsFailed { failures } => {
            assert_eq!(failures.len(), 3);
            assert!(failures.iter().any(|f| f.starts_with("alert")));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn one_working_channel_is_enough() {
    let rec = RecordingPlatform::new();
    rec.fail(Device::Vibration);
    let scheduler = memory_scheduler();
    let dispatcher = dispatcher(&rec, &scheduler);
    let event = scheduler
        .create_event(EventInput::at("Take Aspirin", Utc::now()))
        .unwrap();

    let report = dispatcher
        .deliver(&event, NotificationOptions::default())
        .await
        .unwrap();

    assert_eq!(report.delivered, vec![DeliveryMethod::System]);
    assert_eq!(report.failures.len(), 1);
    assert!(!report.fallback_alert);
    assert!(rec.alerts().is_empty());
    assert_eq!(dispatcher.active_notifications().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn snooze_action_pushes_the_event_back() {
    let rec = RecordingPlatform::new();
    let scheduler = memory_scheduler();
    let dispatcher = dispatcher(&rec, &scheduler);
    let due = Utc::now() + Duration::minutes(1);
    let event = scheduler
        .create_event(EventInput::at("Take Aspirin", due))
        .unwrap();
    let id = dispatcher
        .show_notification(&event, NotificationOptions::default())
        .await
        .unwrap();

    let outcome = dispatcher
        .handle_notification_action(&id, NotificationAction::Snooze)
        .await
        .unwrap();

    let ActionOutcome::Applied { event: snoozed } = outcome else {
        panic!("snooze was not applied");
    };
    assert_eq!(
        snoozed.next_occurrence,
        Some(event.due_at().unwrap() + Duration::minutes(15))
    );
    assert!(dispatcher.active_notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn action_on_a_deleted_event_is_simulated() {
    let rec = RecordingPlatform::new();
    let scheduler = memory_scheduler();
    let dispatcher = dispatcher(&rec, &scheduler);
    let event = scheduler
        .create_event(EventInput::at("Take Aspirin", Utc::now()))
        .unwrap();
    let id = dispatcher
        .show_notification(&event, NotificationOptions::default())
        .await
        .unwrap();
    scheduler.delete_event(&event.id).unwrap();

    let outcome = dispatcher
        .handle_notification_action(&id, NotificationAction::Complete)
        .await
        .unwrap();
    assert_eq!(outcome, ActionOutcome::Simulated);
}

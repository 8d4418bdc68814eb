use std::sync::Arc;

use carebell::host::stdio::run_bridge;
use carebell::host::{
    CarebellHostHandler, CommandEnvelope, CommandName, EventEnvelope, HostCommandClient,
    command_channel_with_events,
};
use carebell::notify::NotificationDispatcher;
use carebell::platform::recording::RecordingPlatform;
use chrono::{Duration, Utc};
use serde_json::json;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::broadcast;

use crate::helpers::{memory_scheduler, tomorrow_at_eight};

fn host(rec: &RecordingPlatform) -> (CarebellHostHandler, broadcast::Sender<EventEnvelope>) {
    let scheduler = memory_scheduler();
    let dispatcher = Arc::new(
        NotificationDispatcher::new(rec.platform()).with_scheduler(Arc::clone(&scheduler)),
    );
    let (event_tx, _) = broadcast::channel(64);
    let handler = CarebellHostHandler::new(scheduler, dispatcher, event_tx.clone());
    (handler, event_tx)
}

fn connect(rec: &RecordingPlatform) -> HostCommandClient {
    let (handler, event_tx) = host(rec);
    let (client, server) = command_channel_with_events(16, event_tx, handler);
    tokio::spawn(server.run());
    client
}

async fn send(
    client: &HostCommandClient,
    command: CommandName,
    payload: serde_json::Value,
) -> carebell::host::ResponseEnvelope {
    client
        .send(CommandEnvelope::new(uuid::Uuid::new_v4().to_string(), command, payload))
        .await
        .unwrap()
}

#[tokio::test]
async fn reminder_added_by_phrase_shows_up_in_the_list() {
    let rec = RecordingPlatform::new();
    let client = connect(&rec);
    let at = tomorrow_at_eight(Utc::now());

    let added = send(
        &client,
        CommandName::RemindersAdd,
        json!({
            "title": "Take Aspirin",
            "datetime": at.format("%Y-%m-%d %H:%M").to_string(),
            "recurring": "daily",
        }),
    )
    .await;
    assert!(added.ok, "{:?}", added.error);
    let reply = added.payload["reply"].as_str().unwrap();
    assert!(reply.starts_with("Event created: \"Take Aspirin\""), "{reply}");

    let listed = send(&client, CommandName::RemindersList, json!({})).await;
    assert!(listed.ok);
    assert!(listed.payload["reply"].as_str().unwrap().contains("Take Aspirin"));
}

#[tokio::test]
async fn ambiguous_completion_asks_for_more_detail() {
    let rec = RecordingPlatform::new();
    let client = connect(&rec);
    let at = tomorrow_at_eight(Utc::now());
    for title in ["Aspirin morning", "Aspirin evening"] {
        let resp = send(
            &client,
            CommandName::EventsCreate,
            json!({"title": title, "datetime": at.to_rfc3339()}),
        )
        .await;
        assert!(resp.ok, "{:?}", resp.error);
    }

    let resp = send(
        &client,
        CommandName::RemindersComplete,
        json!({"description": "aspirin"}),
    )
    .await;
    assert!(!resp.ok);
    let message = resp.error.unwrap();
    assert!(message.starts_with("Found multiple events:"), "{message}");
    assert!(message.ends_with("which event to mark as complete."), "{message}");
}

#[tokio::test]
async fn deleting_an_event_twice_reports_the_second_as_noop() {
    let rec = RecordingPlatform::new();
    let client = connect(&rec);
    let mut events = client.subscribe_events();

    let created = send(
        &client,
        CommandName::EventsCreate,
        json!({"title": "Dentist", "datetime": (Utc::now() + Duration::days(2)).to_rfc3339()}),
    )
    .await;
    let id = created.payload["event"]["id"].as_str().unwrap().to_owned();
    assert_eq!(events.recv().await.unwrap().event, "event.created");

    let first = send(&client, CommandName::EventsDelete, json!({"id": id})).await;
    assert_eq!(first.payload["deleted"], true);
    assert_eq!(events.recv().await.unwrap().event, "event.deleted");

    let second = send(&client, CommandName::EventsDelete, json!({"id": id})).await;
    assert!(second.ok);
    assert_eq!(second.payload["deleted"], false);

    let missing = send(&client, CommandName::EventsGet, json!({"id": id})).await;
    assert!(!missing.ok);
}

#[tokio::test]
async fn stdio_lines_drive_the_full_host() {
    let rec = RecordingPlatform::new();
    let (handler, event_tx) = host(&rec);
    let due = (Utc::now() + Duration::hours(4)).to_rfc3339();
    let input = format!(
        "{}\n{}\n",
        json!({"v": 1, "request_id": "create", "command": "events.create",
               "payload": {"title": "Inhaler", "datetime": due}}),
        json!({"v": 1, "request_id": "pending", "command": "events.pending"}),
    );
    let (out_writer, mut out_reader) = tokio::io::duplex(64 * 1024);

    run_bridge(handler, event_tx, BufReader::new(input.as_bytes()), out_writer)
        .await
        .unwrap();

    let mut output = String::new();
    out_reader.read_to_string(&mut output).await.unwrap();
    let lines: Vec<serde_json::Value> = output
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();

    let pending = lines
        .iter()
        .find(|line| line["request_id"] == "pending")
        .unwrap();
    assert_eq!(pending["ok"], true);
    assert_eq!(pending["payload"]["count"], 1);
    assert_eq!(pending["payload"]["events"][0]["title"], "Inhaler");
}

#[tokio::test]
async fn import_keeps_good_records_when_one_is_malformed() {
    let rec = RecordingPlatform::new();
    let client = connect(&rec);
    let due = (Utc::now() + Duration::days(1)).to_rfc3339();
    let created = send(
        &client,
        CommandName::EventsCreate,
        json!({"title": "Statin", "datetime": due}),
    )
    .await;
    assert!(created.ok, "{:?}", created.error);

    let exported = send(&client, CommandName::EventsExport, json!({})).await;
    let mut data = exported.payload.clone();
    data["events"]
        .as_array_mut()
        .unwrap()
        .push(json!({"title": "half a record"}));

    let imported = send(&client, CommandName::EventsImport, data).await;
    assert!(imported.ok, "{:?}", imported.error);
    assert_eq!(imported.payload["imported"], 1);
    assert_eq!(imported.payload["events"][0]["title"], "Statin");

    let rejected = send(&client, CommandName::EventsImport, json!({"version": "1.0"})).await;
    assert!(!rejected.ok);
}

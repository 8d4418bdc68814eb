//! Host command channel and router for out-of-process callers.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::commands::{
    AddEventRequest, CompleteRequest, ListPendingRequest, RemoveEventRequest, SnoozeRequest,
    UpdateEventRequest, render_error,
};
use crate::error::{CarebellError, Result};
use crate::events::types::{Event, EventExport, EventInput, EventPatch, EventStatistics, SearchCriteria};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::notify::dispatcher::DispatcherStatistics;
use crate::notify::settings::{NotificationSettings, SettingsPatch};
use crate::notify::types::{ActionOutcome, DeliveryReport, NotificationAction};

/// Backend operations the router calls into.
///
/// Every method has a default that rejects the command, so a partial host
/// only implements what it serves.
#[async_trait]
pub trait ReminderHostHandler: Send + Sync + 'static {
    async fn create_event(&self, _input: EventInput) -> Result<Event> {
        Err(unsupported(CommandName::EventsCreate))
    }
    fn get_event(&self, _id: &str) -> Result<Event> {
        Err(unsupported(CommandName::EventsGet))
    }
    fn search_events(&self, _criteria: &SearchCriteria) -> Result<Vec<Event>> {
        Err(unsupported(CommandName::EventsSearch))
    }
    async fn update_event(&self, _id: &str, _patch: EventPatch) -> Result<Event> {
        Err(unsupported(CommandName::EventsUpdate))
    }
    async fn delete_event(&self, _id: &str) -> Result<bool> {
        Err(unsupported(CommandName::EventsDelete))
    }
    async fn complete_event(&self, _id: &str) -> Result<Event> {
        Err(unsupported(CommandName::EventsComplete))
    }
    /// `None` uses the host's default snooze length.
    async fn snooze_event(&self, _id: &str, _minutes: Option<u32>) -> Result<Event> {
        Err(unsupported(CommandName::EventsSnooze))
    }
    async fn cancel_event(&self, _id: &str) -> Result<Event> {
        Err(unsupported(CommandName::EventsCancel))
    }
    fn pending_events(&self) -> Result<Vec<Event>> {
        Err(unsupported(CommandName::EventsPending))
    }
    fn events_due(&self, _within_minutes: u32) -> Result<Vec<Event>> {
        Err(unsupported(CommandName::EventsDue))
    }
    fn event_statistics(&self) -> Result<EventStatistics> {
        Err(unsupported(CommandName::EventsStats))
    }
    fn export_events(&self) -> Result<EventExport> {
        Err(unsupported(CommandName::EventsExport))
    }
    /// `data` is the JSON form of an [`EventExport`]; bad records are skipped.
    fn import_events(&self, _data: &Value) -> Result<Vec<Event>> {
        Err(unsupported(CommandName::EventsImport))
    }
    fn cleanup_expired_events(&self) -> Result<usize> {
        Err(unsupported(CommandName::EventsCleanup))
    }

    async fn reminder_add(&self, _request: AddEventRequest) -> Result<String> {
        Err(unsupported(CommandName::RemindersAdd))
    }
    async fn reminder_remove(&self, _request: RemoveEventRequest) -> Result<String> {
        Err(unsupported(CommandName::RemindersRemove))
    }
    fn reminder_list(&self, _request: &ListPendingRequest) -> Result<String> {
        Err(unsupported(CommandName::RemindersList))
    }
    fn reminder_update(&self, _request: UpdateEventRequest) -> Result<String> {
        Err(unsupported(CommandName::RemindersUpdate))
    }
    fn reminder_snooze(&self, _request: &SnoozeRequest) -> Result<String> {
        Err(unsupported(CommandName::RemindersSnooze))
    }
    fn reminder_complete(&self, _request: &CompleteRequest) -> Result<String> {
        Err(unsupported(CommandName::RemindersComplete))
    }

    async fn test_notification(&self) -> Result<DeliveryReport> {
        Err(unsupported(CommandName::NotificationsTest))
    }
    async fn notification_action(
        &self,
        _notification_id: &str,
        _action: NotificationAction,
    ) -> Result<ActionOutcome> {
        Err(unsupported(CommandName::NotificationsAction))
    }
    fn notification_settings(&self) -> Result<NotificationSettings> {
        Err(unsupported(CommandName::NotificationsSettingsGet))
    }
    fn patch_notification_settings(&self, _patch: &SettingsPatch) -> Result<NotificationSettings> {
        Err(unsupported(CommandName::NotificationsSettingsPatch))
    }
    async fn notification_statistics(&self) -> Result<DispatcherStatistics> {
        Err(unsupported(CommandName::NotificationsStats))
    }
}

fn unsupported(command: CommandName) -> CarebellError {
    CarebellError::InvalidInput(format!("{} is not supported by this host", command.as_str()))
}

/// Handler that serves only the `host.*` commands.
#[derive(Debug, Default)]
pub struct NoopReminderHandler;

#[async_trait]
impl ReminderHostHandler for NoopReminderHandler {}

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            CarebellError::InvalidInput(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| {
                CarebellError::Channel(format!("failed to send host command request: {e}"))
            })?;

        response_rx
            .await
            .map_err(|e| CarebellError::Channel(format!("host command response dropped: {e}")))
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer<H: ReminderHostHandler> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    handler: H,
}

#[must_use]
pub fn command_channel<H: ReminderHostHandler>(
    request_capacity: usize,
    event_capacity: usize,
    handler: H,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));
    command_channel_with_events(request_capacity, event_tx, handler)
}

/// Create a command channel on an existing event broadcast sender, so
/// events the handler emits on its own reach callers on the same stream.
#[must_use]
pub fn command_channel_with_events<H: ReminderHostHandler>(
    request_capacity: usize,
    event_tx: broadcast::Sender<EventEnvelope>,
    handler: H,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            event_tx,
            handler,
        },
    )
}

impl<H: ReminderHostHandler> HostCommandServer<H> {
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let response = self.route(&request.envelope).await;
            let _ = request.response_tx.send(response);
        }
    }

    /// Route a command envelope to the handler. Failures become error
    /// envelopes carrying the caller's request id.
    pub async fn route(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        let command = envelope.command;
        if command.is_mutating() {
            tracing::info!(command = command.as_str(), request_id = %envelope.request_id, "host command");
        } else {
            tracing::debug!(command = command.as_str(), request_id = %envelope.request_id, "host command");
        }

        if let Some(verb) = reminder_verb(command) {
            return match self.dispatch_reminder(envelope).await {
                Ok(reply) => ResponseEnvelope::ok(envelope.request_id.clone(), json!({ "reply": reply })),
                Err(e) => ResponseEnvelope::error(envelope.request_id.clone(), render_error(verb, &e)),
            };
        }

        match self.dispatch(envelope).await {
            Ok(payload) => ResponseEnvelope::ok(envelope.request_id.clone(), payload),
            Err(e) => {
                tracing::debug!(command = command.as_str(), error = %e, "host command failed");
                ResponseEnvelope::error(envelope.request_id.clone(), e.to_string())
            }
        }
    }

    async fn dispatch(&self, envelope: &CommandEnvelope) -> Result<Value> {
        let payload = &envelope.payload;
        let command = envelope.command;
        match command {
            CommandName::HostPing => Ok(json!({"pong": true})),
            CommandName::HostVersion => Ok(json!({
                "contract_version": crate::host::contract::EVENT_VERSION,
                "crate_version": env!("CARGO_PKG_VERSION"),
                "channel": "host_command_v1"
            })),
            CommandName::HostStop => {
                self.emit_event("host.stopping", json!({"request_id": envelope.request_id}));
                Ok(json!({"accepted": true}))
            }
            CommandName::EventsCreate => {
                let input: EventInput = parse_payload(payload, command)?;
                let event = self.handler.create_event(input).await?;
                Ok(json!({ "event": event }))
            }
            CommandName::EventsGet => {
                let event = self.handler.get_event(&parse_id(payload, command)?)?;
                Ok(json!({ "event": event }))
            }
            CommandName::EventsSearch => {
                let criteria: SearchCriteria = parse_payload_or_default(payload, command)?;
                events_payload(self.handler.search_events(&criteria)?)
            }
            CommandName::EventsUpdate => {
                let id = parse_id(payload, command)?;
                let patch: EventPatch = match payload.get("patch") {
                    Some(patch) => parse_payload(patch, command)?,
                    None => {
                        return Err(CarebellError::InvalidInput(format!(
                            "{} requires a patch object",
                            command.as_str()
                        )));
                    }
                };
                let event = self.handler.update_event(&id, patch).await?;
                Ok(json!({ "event": event }))
            }
            CommandName::EventsDelete => {
                let deleted = self.handler.delete_event(&parse_id(payload, command)?).await?;
                Ok(json!({ "deleted": deleted }))
            }
            CommandName::EventsComplete => {
                let event = self
                    .handler
                    .complete_event(&parse_id(payload, command)?)
                    .await?;
                Ok(json!({ "event": event }))
            }
            CommandName::EventsSnooze => {
                let id = parse_id(payload, command)?;
                let minutes = parse_optional_u32(payload, "minutes", command)?;
                let event = self.handler.snooze_event(&id, minutes).await?;
                Ok(json!({ "event": event }))
            }
            CommandName::EventsCancel => {
                let event = self.handler.cancel_event(&parse_id(payload, command)?).await?;
                Ok(json!({ "event": event }))
            }
            CommandName::EventsPending => events_payload(self.handler.pending_events()?),
            CommandName::EventsDue => {
                let within = parse_optional_u32(payload, "within_minutes", command)?.unwrap_or(0);
                events_payload(self.handler.events_due(within)?)
            }
            CommandName::EventsStats => Ok(serde_json::to_value(self.handler.event_statistics()?)?),
            CommandName::EventsExport => Ok(serde_json::to_value(self.handler.export_events()?)?),
            CommandName::EventsImport => {
                let imported = self.handler.import_events(payload)?;
                Ok(json!({ "imported": imported.len(), "events": imported }))
            }
            CommandName::EventsCleanup => {
                let removed = self.handler.cleanup_expired_events()?;
                Ok(json!({ "removed": removed }))
            }
            CommandName::NotificationsTest => {
                Ok(serde_json::to_value(self.handler.test_notification().await?)?)
            }
            CommandName::NotificationsAction => {
                let notification_id = parse_non_empty_field(payload, "notification_id", command)?;
                let action =
                    NotificationAction::from(parse_non_empty_field(payload, "action", command)?);
                let outcome = self
                    .handler
                    .notification_action(&notification_id, action)
                    .await?;
                Ok(serde_json::to_value(outcome)?)
            }
            CommandName::NotificationsSettingsGet => {
                Ok(serde_json::to_value(self.handler.notification_settings()?)?)
            }
            CommandName::NotificationsSettingsPatch => {
                let patch: SettingsPatch = parse_payload(payload, command)?;
                Ok(serde_json::to_value(
                    self.handler.patch_notification_settings(&patch)?,
                )?)
            }
            CommandName::NotificationsStats => {
                Ok(serde_json::to_value(self.handler.notification_statistics().await?)?)
            }
            CommandName::RemindersAdd
            | CommandName::RemindersRemove
            | CommandName::RemindersList
            | CommandName::RemindersUpdate
            | CommandName::RemindersSnooze
            | CommandName::RemindersComplete => self
                .dispatch_reminder(envelope)
                .await
                .map(|reply| json!({ "reply": reply })),
        }
    }

    async fn dispatch_reminder(&self, envelope: &CommandEnvelope) -> Result<String> {
        let payload = &envelope.payload;
        let command = envelope.command;
        match command {
            CommandName::RemindersAdd => {
                self.handler
                    .reminder_add(parse_payload(payload, command)?)
                    .await
            }
            CommandName::RemindersRemove => {
                self.handler
                    .reminder_remove(parse_payload_or_default(payload, command)?)
                    .await
            }
            CommandName::RemindersList => self
                .handler
                .reminder_list(&parse_payload_or_default(payload, command)?),
            CommandName::RemindersUpdate => {
                self.handler.reminder_update(parse_payload(payload, command)?)
            }
            CommandName::RemindersSnooze => {
                self.handler.reminder_snooze(&parse_payload(payload, command)?)
            }
            CommandName::RemindersComplete => {
                self.handler.reminder_complete(&parse_payload(payload, command)?)
            }
            other => Err(CarebellError::InvalidInput(format!(
                "{} is not a reminder command",
                other.as_str()
            ))),
        }
    }

    fn emit_event(&self, event: &str, payload: Value) {
        let _ = self.event_tx.send(EventEnvelope::new(event, payload));
    }
}

/// The verb used in spoken failures for each reminder command.
fn reminder_verb(command: CommandName) -> Option<&'static str> {
    match command {
        CommandName::RemindersAdd => Some("add"),
        CommandName::RemindersRemove => Some("remove"),
        CommandName::RemindersList => Some("list"),
        CommandName::RemindersUpdate => Some("update"),
        CommandName::RemindersSnooze => Some("snooze"),
        CommandName::RemindersComplete => Some("mark as complete"),
        _ => None,
    }
}

fn events_payload(events: Vec<Event>) -> Result<Value> {
    Ok(json!({ "count": events.len(), "events": events }))
}

fn parse_payload<T: DeserializeOwned>(payload: &Value, command: CommandName) -> Result<T> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        CarebellError::InvalidInput(format!("{} payload is invalid: {e}", command.as_str()))
    })
}

fn parse_payload_or_default<T: DeserializeOwned + Default>(
    payload: &Value,
    command: CommandName,
) -> Result<T> {
    if payload.is_null() {
        return Ok(T::default());
    }
    parse_payload(payload, command)
}

fn parse_id(payload: &Value, command: CommandName) -> Result<String> {
    parse_non_empty_field(payload, "id", command)
}

fn parse_non_empty_field(payload: &Value, field: &str, command: CommandName) -> Result<String> {
    let value = payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if value.is_empty() {
        return Err(CarebellError::InvalidInput(format!(
            "{} requires a non-empty `{field}`",
            command.as_str()
        )));
    }
    Ok(value.to_owned())
}

fn parse_optional_u32(payload: &Value, field: &str, command: CommandName) -> Result<Option<u32>> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => raw
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                CarebellError::InvalidInput(format!(
                    "{} `{field}` must be a non-negative integer",
                    command.as_str()
                ))
            }),
    }
}

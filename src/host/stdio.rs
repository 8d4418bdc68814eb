//! JSON-lines transport for the host command channel.
//!
//! One `CommandEnvelope` per input line; replies and broadcast events go
//! out one JSON object per line. Stdout carries nothing else, so tracing
//! must be configured to write to stderr or a file.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast};

use crate::error::{CarebellError, Result};
use crate::host::channel::{HostCommandClient, ReminderHostHandler, command_channel_with_events};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};

/// Default request channel capacity for the stdio bridge.
const REQUEST_CAPACITY: usize = 64;

/// Run the stdin/stdout JSON bridge until stdin closes or a `host.stop`
/// command is received.
///
/// `event_tx` is the broadcast channel the handler already publishes on;
/// everything sent to it is forwarded to stdout.
pub async fn run_stdio_bridge<H: ReminderHostHandler>(
    handler: H,
    event_tx: broadcast::Sender<EventEnvelope>,
) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = BufWriter::new(tokio::io::stdout());
    run_bridge(handler, event_tx, reader, writer).await
}

/// Bridge over arbitrary line streams.
///
/// The reader runs on the calling task and answers each command line in
/// order. A spawned forwarder copies broadcast events onto the same writer
/// and the router runs as its own task. The bridge returns once the reader
/// stops; dropping the client lets the router drain.
pub async fn run_bridge<H, R, W>(
    handler: H,
    event_tx: broadcast::Sender<EventEnvelope>,
    reader: R,
    writer: W,
) -> Result<()>
where
    H: ReminderHostHandler,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (client, server) = command_channel_with_events(REQUEST_CAPACITY, event_tx, handler);
    let out: SharedWriter<W> = Arc::new(Mutex::new(writer));

    let server_handle = tokio::spawn(server.run());
    let forwarder = tokio::spawn(forward_events(client.subscribe_events(), Arc::clone(&out)));

    let result = serve_lines(client, reader, &out).await;

    forwarder.abort();
    let _ = forwarder.await;
    let _ = server_handle.await;
    result
}

type SharedWriter<W> = Arc<Mutex<W>>;

async fn forward_events<W>(mut events: broadcast::Receiver<EventEnvelope>, out: SharedWriter<W>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let envelope = match events.recv().await {
            Ok(envelope) => envelope,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event forwarder fell behind, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("event channel closed, forwarder exiting");
                return;
            }
        };
        if let Err(e) = emit(&out, &envelope).await {
            tracing::warn!(event = %envelope.event, error = %e, "stopping event forwarder");
            return;
        }
    }
}

async fn serve_lines<R, W>(client: HostCommandClient, mut reader: R, out: &SharedWriter<W>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| CarebellError::Channel(format!("failed to read command line: {e}")))?;
        if read == 0 {
            tracing::info!("input closed, stdio bridge exiting");
            return Ok(());
        }

        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        let envelope = match serde_json::from_str::<CommandEnvelope>(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, line = %raw, "unparseable command line");
                let reply = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                emit(out, &reply).await?;
                continue;
            }
        };

        let stopping = envelope.command == CommandName::HostStop;
        let request_id = envelope.request_id.clone();
        let reply = client.send(envelope).await.unwrap_or_else(|e| {
            tracing::error!(%request_id, error = %e, "host command dispatch failed");
            ResponseEnvelope::error(request_id, format!("dispatch failed: {e}"))
        });
        emit(out, &reply).await?;

        if stopping {
            tracing::info!("host.stop received, stdio bridge exiting");
            return Ok(());
        }
    }
}

/// Serialize `message` as one JSON line and flush it.
async fn emit<W, T>(out: &SharedWriter<W>, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    let mut writer = out.lock().await;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| CarebellError::Channel(format!("failed to write output line: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| CarebellError::Channel(format!("failed to flush output: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use tokio::io::{AsyncReadExt, duplex};

    use super::*;
    use crate::host::channel::NoopReminderHandler;

    async fn run_lines(input: &str) -> Vec<serde_json::Value> {
        let (event_tx, _) = broadcast::channel(8);
        let (out_writer, mut out_reader) = duplex(64 * 1024);
        run_bridge(
            NoopReminderHandler,
            event_tx,
            BufReader::new(input.as_bytes()),
            out_writer,
        )
        .await
        .unwrap();

        let mut output = String::new();
        out_reader.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    #[tokio::test]
    async fn answers_each_command_line() {
        let lines = run_lines(
            "{\"v\":1,\"request_id\":\"a\",\"command\":\"host.ping\"}\n\n\
             {\"v\":1,\"request_id\":\"b\",\"command\":\"host.version\",\"payload\":{}}\n",
        )
        .await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["request_id"], "a");
        assert_eq!(lines[0]["payload"]["pong"], true);
        assert_eq!(lines[1]["request_id"], "b");
    }

    #[tokio::test]
    async fn malformed_line_yields_parse_error_and_continues() {
        let lines = run_lines(
            "not json\n{\"v\":1,\"request_id\":\"a\",\"command\":\"host.ping\"}\n",
        )
        .await;
        assert_eq!(lines[0]["request_id"], "parse-error");
        assert_eq!(lines[0]["ok"], false);
        assert_eq!(lines[1]["ok"], true);
    }

    #[tokio::test]
    async fn invalid_envelope_keeps_request_id() {
        let lines = run_lines("{\"v\":9,\"request_id\":\"a\",\"command\":\"host.ping\"}\n").await;
        assert_eq!(lines[0]["request_id"], "a");
        assert_eq!(lines[0]["ok"], false);
    }

    #[tokio::test]
    async fn stop_ends_the_bridge_before_later_lines() {
        let lines = run_lines(
            "{\"v\":1,\"request_id\":\"s\",\"command\":\"host.stop\"}\n\
             {\"v\":1,\"request_id\":\"late\",\"command\":\"host.ping\"}\n",
        )
        .await;
        assert!(lines.iter().all(|line| line["request_id"] != "late"));
        assert!(lines.iter().any(|line| line["request_id"] == "s" && line["ok"] == true));
    }
}

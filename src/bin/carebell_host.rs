//! Headless reminder host for stdin/stdout JSON communication.
//!
//! Opens the event store, restores queued notifications, runs the
//! background coordinator, and serves `CommandEnvelope` lines from stdin
//! until EOF or `host.stop`.
//!
//! All tracing output goes to stderr and a daily log file so that stdout
//! remains a clean JSON protocol channel.
//!
//! Usage: `carebell-host [CONFIG_PATH]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use carebell::background::{BackgroundCoordinator, ForegroundClient};
use carebell::config::CarebellConfig;
use carebell::events::EventScheduler;
use carebell::host::{CarebellHostHandler, run_stdio_bridge};
use carebell::notify::{
    DeliveryQueueStore, NotificationDispatcher, NotificationSettings, SettingsStore,
};
use carebell::platform::{NotificationSurface, Platform};
use carebell::carebell_dirs;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const EVENT_CAPACITY: usize = 128;
const CLIENT_MESSAGE_CAPACITY: usize = 32;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(CarebellConfig::default_config_path, PathBuf::from);
    let config = CarebellConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(config = %config_path.display(), "carebell-host starting");

    let scheduler = Arc::new(EventScheduler::open(&config));
    tracing::info!(backend = ?scheduler.store_backend(), "event store ready");

    let platform = Platform::headless();
    let coordinator = Arc::new(
        BackgroundCoordinator::new(
            Arc::clone(&platform.notifications),
            DeliveryQueueStore::at(carebell_dirs::worker_queue_file()),
        )
        .with_check_interval(Duration::from_secs(config.background.check_interval_secs))
        .with_settings_store(
            SettingsStore::at(carebell_dirs::settings_file()),
            NotificationSettings::from_config(&config.notifications),
        ),
    );
    let dispatcher = Arc::new(NotificationDispatcher::from_config(
        &config,
        platform,
        Some(Arc::clone(&scheduler)),
    ));
    dispatcher.register_worker(Arc::clone(&coordinator) as Arc<dyn NotificationSurface>);

    dispatcher.restore_scheduled_notifications().await;

    let cancel = CancellationToken::new();
    let (client_tx, client_rx) = mpsc::channel(CLIENT_MESSAGE_CAPACITY);
    let coordinator_handle = Arc::clone(&coordinator).run(client_rx, cancel.clone());

    let (client_id, worker_rx) = coordinator.connect();
    let client_handle =
        ForegroundClient::new(Arc::clone(&scheduler), Arc::clone(&dispatcher)).spawn(worker_rx);
    tracing::debug!(%client_id, "foreground client connected");

    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let handler = CarebellHostHandler::new(
        Arc::clone(&scheduler),
        Arc::clone(&dispatcher),
        event_tx.clone(),
    );
    handler.start_event_bridge();

    let bridge_result = run_stdio_bridge(handler, event_tx).await;

    cancel.cancel();
    coordinator.disconnect(client_id);
    drop(client_tx);
    let _ = coordinator_handle.await;
    let _ = client_handle.await;

    bridge_result.map_err(|e| {
        tracing::error!(error = %e, "carebell-host exited with error");
        anyhow::anyhow!("carebell-host failed: {e}")
    })?;

    tracing::info!("carebell-host shut down cleanly");
    Ok(())
}

/// Stderr plus a daily rolling file under the logs directory. The returned
/// guard flushes the file writer on drop.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    let logs_dir = carebell_dirs::logs_dir();
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        registry.init();
        tracing::warn!(dir = %logs_dir.display(), error = %e, "file logging disabled");
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&logs_dir, "carebell-host.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    registry
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();
    Some(guard)
}

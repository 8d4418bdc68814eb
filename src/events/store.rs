//! Event persistence: the store trait, the in-memory fallback list and the
//! resilient wrapper that switches between them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::sqlite::SqliteEventStore;
use super::types::Event;
use crate::config::StorageConfig;
use crate::error::{CarebellError, Result};

/// Which backend is currently serving reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Indexed SQLite database.
    Durable,
    /// Flat list, optionally mirrored to a JSON file.
    Fallback,
}

/// Persistence seam used by the scheduler.
pub trait EventStore: Send + Sync {
    /// Backend serving this store.
    fn backend(&self) -> StoreBackend;

    /// Upsert by id and return the stored record.
    fn put(&self, event: &Event) -> Result<Event>;

    /// Fetch one event.
    fn get(&self, id: &str) -> Result<Option<Event>>;

    /// Every stored event.
    fn get_all(&self) -> Result<Vec<Event>>;

    /// Remove by id. Returns `false` if nothing was stored under `id`.
    fn delete(&self, id: &str) -> Result<bool>;
}

// ─── ListEventStore ───────────────────────────────────────────────────────────

/// Flat list store used when the durable database is unavailable.
///
/// When constructed with a file path every mutation rewrites the file
/// atomically; a write failure is logged and the in-memory list stays
/// authoritative.
pub struct ListEventStore {
    events: Mutex<Vec<Event>>,
    path: Option<PathBuf>,
}

impl ListEventStore {
    /// Purely in-memory list.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// List mirrored to `path`, loading any events already there.
    ///
    /// A missing or malformed file starts an empty list.
    #[must_use]
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let events = read_event_list(&path);
        Self {
            events: Mutex::new(events),
            path: Some(path),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Event>>> {
        self.events
            .lock()
            .map_err(|_| CarebellError::Storage("fallback list lock poisoned".to_owned()))
    }

    fn persist(&self, events: &[Event]) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_json_atomic(path, &events) {
            tracing::warn!("failed to mirror fallback events to {}: {e}", path.display());
        }
    }
}

impl EventStore for ListEventStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Fallback
    }

    fn put(&self, event: &Event) -> Result<Event> {
        let mut events = self.lock()?;
        match events.iter_mut().find(|e| e.id == event.id) {
            Some(slot) => *slot = event.clone(),
            None => events.push(event.clone()),
        }
        self.persist(&events);
        Ok(event.clone())
    }

    fn get(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.lock()?.iter().find(|e| e.id == id).cloned())
    }

    fn get_all(&self) -> Result<Vec<Event>> {
        Ok(self.lock()?.clone())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut events = self.lock()?;
        let before = events.len();
        events.retain(|e| e.id != id);
        let removed = events.len() != before;
        if removed {
            self.persist(&events);
        }
        Ok(removed)
    }
}

fn read_event_list(path: &Path) -> Vec<Event> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!("cannot read fallback events at {}: {e}", path.display());
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Vec<Event>>(&bytes) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(
                "ignoring malformed fallback events at {}: {e}",
                path.display()
            );
            Vec::new()
        }
    }
}

/// Write `value` as JSON to `path` via a temp file and rename.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

// ─── ResilientEventStore ──────────────────────────────────────────────────────

/// Durable store with a fallback chosen once, at open.
///
/// If the durable backend cannot be opened the store serves the fallback
/// list for the whole session. Once the durable backend is serving, it
/// stays the single source of truth: a later failure is logged and returned
/// to the caller as [`CarebellError::Storage`], and the next call tries the
/// database again.
pub struct ResilientEventStore {
    durable: Option<Arc<dyn EventStore>>,
    fallback: ListEventStore,
}

impl ResilientEventStore {
    /// Wrap an optional durable backend and a fallback list.
    #[must_use]
    pub fn new(durable: Option<Arc<dyn EventStore>>, fallback: ListEventStore) -> Self {
        Self { durable, fallback }
    }

    /// Open the configured backends.
    #[must_use]
    pub fn open(config: &StorageConfig) -> Self {
        let fallback = match &config.fallback_file {
            Some(path) => ListEventStore::with_file(path),
            None => ListEventStore::in_memory(),
        };
        if config.force_fallback {
            tracing::info!("event store forced into fallback mode");
            return Self::new(None, fallback);
        }

        let db_path = config.database_path();
        match SqliteEventStore::open(&db_path) {
            Ok(store) => {
                tracing::info!("event store opened at {}", db_path.display());
                Self::new(Some(Arc::new(store)), fallback)
            }
            Err(e) => {
                tracing::warn!("{e}; continuing with fallback event list");
                Self::new(None, fallback)
            }
        }
    }

    /// Returns `true` when the store is serving from the fallback list.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.durable.is_none()
    }

    fn run<T>(&self, op: &str, f: impl Fn(&dyn EventStore) -> Result<T>) -> Result<T> {
        match self.durable.as_deref() {
            Some(durable) => f(durable).map_err(|e| {
                tracing::error!(op, error = %e, "durable event store operation failed");
                match e {
                    CarebellError::Storage(_) => e,
                    other => CarebellError::Storage(format!("{op}: {other}")),
                }
            }),
            None => f(&self.fallback),
        }
    }
}

impl EventStore for ResilientEventStore {
    fn backend(&self) -> StoreBackend {
        if self.is_fallback() {
            StoreBackend::Fallback
        } else {
            StoreBackend::Durable
        }
    }

    fn put(&self, event: &Event) -> Result<Event> {
        self.run("put", |store| store.put(event))
    }

    fn get(&self, id: &str) -> Result<Option<Event>> {
        self.run("get", |store| store.get(id))
    }

    fn get_all(&self) -> Result<Vec<Event>> {
        self.run("get_all", |store| store.get_all())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.run("delete", |store| store.delete(id))
    }
}

//! SQLite-backed durable event store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{apply_schema, read_schema_version};
use super::store::{EventStore, StoreBackend};
use super::types::Event;
use crate::error::{CarebellError, Result};

/// Durable event store on a single SQLite database.
///
/// Thread-safe via an internal `Mutex<Connection>`.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`CarebellError::StorageUnavailable`] if the file cannot be
    /// opened or the schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CarebellError::StorageUnavailable(format!(
                    "cannot create {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CarebellError::StorageUnavailable(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests.
    ///
    /// # Errors
    ///
    /// Returns [`CarebellError::StorageUnavailable`] if SQLite cannot start.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CarebellError::StorageUnavailable(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        apply_schema(&conn).map_err(|e| CarebellError::StorageUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Recorded schema version.
    ///
    /// # Errors
    ///
    /// Returns [`CarebellError::Storage`] on query failure.
    pub fn schema_version(&self) -> Result<Option<u32>> {
        let conn = self.lock()?;
        read_schema_version(&conn).map_err(storage_err)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CarebellError::Storage(format!("lock poisoned: {e}")))
    }
}

impl EventStore for SqliteEventStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Durable
    }

    fn put(&self, event: &Event) -> Result<Event> {
        let record = serde_json::to_string(event)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO events (id, category, status, datetime, next_occurrence, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                category = excluded.category,
                status = excluded.status,
                datetime = excluded.datetime,
                next_occurrence = excluded.next_occurrence,
                record = excluded.record",
            params![
                event.id,
                event.category,
                event.status.as_str(),
                event.datetime.to_rfc3339(),
                event.next_occurrence.map(|t| t.to_rfc3339()),
                record,
            ],
        )
        .map_err(storage_err)?;
        Ok(event.clone())
    }

    fn get(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.lock()?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        record
            .map(|json| serde_json::from_str(&json).map_err(CarebellError::from))
            .transpose()
    }

    fn get_all(&self) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, record FROM events ORDER BY datetime ASC")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(storage_err)?;

        let mut events = Vec::new();
        for row in rows {
            let (id, json) = row.map_err(storage_err)?;
            match serde_json::from_str::<Event>(&json) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(event_id = %id, "skipping unreadable event row: {e}"),
            }
        }
        Ok(events)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM events WHERE id = ?1", params![id])
            .map_err(storage_err)?;
        Ok(changed > 0)
    }
}

fn storage_err(e: rusqlite::Error) -> CarebellError {
    CarebellError::Storage(e.to_string())
}

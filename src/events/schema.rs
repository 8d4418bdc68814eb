//! SQLite DDL for the durable event store.

use rusqlite::Connection;

/// Current on-disk schema version.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the event database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- One row per event. `record` holds the full JSON; the other columns are
-- denormalized for indexed lookups.
CREATE TABLE IF NOT EXISTS events (
    id              TEXT PRIMARY KEY,
    category        TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',
    datetime        TEXT NOT NULL,      -- RFC 3339, UTC
    next_occurrence TEXT,               -- NULL once a series has ended
    record          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_next_occurrence ON events(next_occurrence);
CREATE INDEX IF NOT EXISTS idx_events_category        ON events(category);
CREATE INDEX IF NOT EXISTS idx_events_status          ON events(status);
CREATE INDEX IF NOT EXISTS idx_events_datetime        ON events(datetime);
"#;

/// Apply the full schema to an open connection and seed the version row.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the schema version, if one has been recorded.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}

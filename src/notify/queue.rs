//! Persisted record of timed deliveries.
//!
//! Timers do not survive a restart; the record does. On startup the
//! dispatcher and the background coordinator reload it and re-arm future
//! deliveries or deliver overdue ones.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::store::write_json_atomic;
use crate::events::types::Event;

/// One pending timed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledDelivery {
    /// Snapshot of the event at scheduling time.
    pub event: Event,
    pub delivery_time: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
}

impl ScheduledDelivery {
    /// Returns `true` if this record is for the same event and instant.
    #[must_use]
    pub fn same_slot(&self, other: &Self) -> bool {
        self.event.id == other.event.id && self.delivery_time == other.delivery_time
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueSnapshot {
    version: u32,
    deliveries: Vec<ScheduledDelivery>,
}

const QUEUE_SNAPSHOT_VERSION: u32 = 1;

/// Where the delivery record lives. `None` keeps it in memory only.
#[derive(Debug, Clone, Default)]
pub struct DeliveryQueueStore {
    path: Option<PathBuf>,
}

impl DeliveryQueueStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load persisted deliveries. Missing or malformed files load as empty.
    #[must_use]
    pub fn load(&self) -> Vec<ScheduledDelivery> {
        let Some(path) = &self.path else {
            return Vec::new();
        };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("cannot read delivery queue at {}: {e}", path.display());
                return Vec::new();
            }
        };
        match serde_json::from_slice::<QueueSnapshot>(&bytes) {
            Ok(snapshot) => {
                if snapshot.version != QUEUE_SNAPSHOT_VERSION {
                    tracing::warn!(
                        version = snapshot.version,
                        "unexpected delivery queue version, loading anyway"
                    );
                }
                snapshot.deliveries
            }
            Err(e) => {
                tracing::warn!("ignoring malformed delivery queue at {}: {e}", path.display());
                Vec::new()
            }
        }
    }

    /// Replace the persisted record with `deliveries`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, deliveries: &[ScheduledDelivery]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = QueueSnapshot {
            version: QUEUE_SNAPSHOT_VERSION,
            deliveries: deliveries.to_vec(),
        };
        write_json_atomic(path, &snapshot)
    }
}

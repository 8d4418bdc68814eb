//! Health event storage and lifecycle.
//!
//! - [`types`]: the [`Event`] record and request/query types
//! - [`recurrence`]: next-occurrence calculation
//! - [`store`]: the [`EventStore`] seam, fallback list and resilient wrapper
//! - [`sqlite`]: the durable SQLite backend
//! - [`listeners`]: lifecycle callbacks
//! - [`scheduler`]: the [`EventScheduler`] that owns lifecycle rules

pub mod listeners;
pub mod recurrence;
mod schema;
pub mod scheduler;
pub mod sqlite;
pub mod store;
pub mod types;

pub use listeners::{LifecycleEvent, LifecycleKind, ListenerId};
pub use scheduler::{EventScheduler, SchedulerPolicy};
pub use store::{EventStore, ListEventStore, ResilientEventStore, StoreBackend};
pub use types::{
    DeliveryMethod, Event, EventExport, EventInput, EventPatch, EventStatistics, EventStatus,
    Priority, Recurrence, RecurrenceKind, SearchCriteria,
};

//! Carebell: health reminder scheduling and multi-channel notification delivery.
//!
//! # Architecture
//!
//! - **Events**: persisted reminders with recurrence, kept in SQLite with a
//!   JSON-list fallback when the database cannot be opened
//! - **Scheduler**: create/update/complete/snooze/cancel/delete, queries,
//!   lifecycle listeners and retention cleanup
//! - **Notify**: the dispatcher fans a notification out over system,
//!   vibration, sound and visual channels with a blocking alert as the last
//!   resort, and persists timed deliveries so they survive a restart
//! - **Background**: a long-lived coordinator that owns the system surface
//!   and talks to foreground clients over typed channels
//! - **Commands** and **Host**: a plain-text command facade and a JSON-lines
//!   bridge for out-of-process callers

pub mod background;
pub mod carebell_dirs;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod notify;
pub mod platform;

pub use background::{BackgroundCoordinator, ForegroundClient};
pub use commands::ReminderCommands;
pub use config::CarebellConfig;
pub use error::{CarebellError, Result};
pub use events::{Event, EventScheduler};
pub use notify::NotificationDispatcher;

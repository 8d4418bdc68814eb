//! Background delivery: a long-lived coordinator and the foreground clients
//! it talks to over typed message channels.

pub mod client;
pub mod coordinator;
pub mod messages;

pub use client::{ClientReaction, ForegroundClient};
pub use coordinator::{BackgroundCoordinator, ClickRoute, ClientLauncher, DeliveryRoute, Dismissal};
pub use messages::{ClientId, ClientMessage, WorkerMessage};

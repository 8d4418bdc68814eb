//! Host-facing contract and stdio bridge for out-of-process callers.

pub mod channel;
pub mod contract;
pub mod handler;
pub mod stdio;

pub use channel::{
    HostCommandClient, HostCommandServer, NoopReminderHandler, ReminderHostHandler,
    command_channel, command_channel_with_events,
};
pub use contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
pub use handler::CarebellHostHandler;
pub use stdio::run_stdio_bridge;

//! Notification delivery.
//!
//! [`NotificationDispatcher`] turns an [`Event`](crate::events::Event) into
//! a [`Notification`] and delivers it over the requested
//! [`DeliveryChannel`]s, falling back to a blocking alert when every
//! channel fails.

pub mod channels;
pub mod delivery;
pub mod dispatcher;
pub mod queue;
pub mod settings;
pub mod types;

pub use channels::{AudioChannel, DeliveryChannel, SystemChannel, VibrationChannel, VisualChannel};
pub use dispatcher::{
    DispatchPolicy, DispatcherStatistics, NotificationDispatcher, PermissionReport, RestoreSummary,
};
pub use queue::{DeliveryQueueStore, ScheduledDelivery};
pub use settings::{NotificationSettings, SettingsPatch, SettingsStore};
pub use types::{
    ActionButton, ActionOutcome, ChannelError, ChannelFailure, DeliveryReport, DispatcherEvent,
    ModalRequest, Notification, NotificationAction, NotificationData, NotificationOptions,
    NotificationRequest, ScheduleHandle, ScheduleOutcome,
};

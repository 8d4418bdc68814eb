//! Device capability seams.
//!
//! Each delivery channel talks to the host environment through one of
//! these traits: the OS notification surface, the vibration motor, audio
//! output, an in-page modal presenter and a blocking alert. [`Platform`]
//! bundles one implementation of each.
//!
//! [`stub`] provides headless implementations for hosts without a UI.
//! [`recording`] provides configurable doubles that record every call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::notify::types::{ModalRequest, NotificationRequest};

pub mod recording;
pub mod stub;

/// OS notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet; a prompt is possible.
    #[default]
    Prompt,
}

/// OS-level notification surface.
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    /// Current permission without prompting.
    async fn permission(&self) -> PermissionState;

    /// Prompt for permission if undecided. May wait on the user.
    async fn request_permission(&self) -> PermissionState;

    /// Show a notification. A notification with the same tag replaces the
    /// previous one.
    async fn show(&self, request: &NotificationRequest) -> anyhow::Result<()>;

    /// Close every shown notification carrying `tag`. Returns how many.
    async fn close_tag(&self, tag: &str) -> anyhow::Result<usize>;
}

/// Vibration motor.
pub trait Vibrator: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Play an on/off pattern in milliseconds.
    fn vibrate(&self, pattern: &[u32]) -> anyhow::Result<()>;
}

/// Audio output.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play a named sound asset at `volume` (0.0 to 1.0).
    async fn play_asset(&self, name: &str, volume: f32) -> anyhow::Result<()>;

    /// Play raw mono samples.
    async fn play_samples(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<()>;
}

/// In-page modal presenter.
#[async_trait]
pub trait ModalPresenter: Send + Sync {
    async fn present(&self, modal: &ModalRequest) -> anyhow::Result<()>;

    /// Remove the modal for `notification_id`. Missing modals are not an error.
    async fn dismiss(&self, notification_id: &str) -> anyhow::Result<()>;
}

/// Last-resort synchronous alert. Blocks until acknowledged.
pub trait BlockingAlert: Send + Sync {
    fn alert(&self, message: &str) -> anyhow::Result<()>;
}

/// One implementation of every device seam.
#[derive(Clone)]
pub struct Platform {
    pub notifications: Arc<dyn NotificationSurface>,
    pub vibrator: Arc<dyn Vibrator>,
    pub audio: Arc<dyn AudioOutput>,
    pub modal: Arc<dyn ModalPresenter>,
    pub alert: Arc<dyn BlockingAlert>,
}

impl Platform {
    /// Platform for hosts with no UI: only the blocking alert works, and it
    /// writes to stderr.
    #[must_use]
    pub fn headless() -> Self {
        Self {
            notifications: Arc::new(stub::HeadlessNotifications),
            vibrator: Arc::new(stub::NoVibrator),
            audio: Arc::new(stub::SilentAudio),
            modal: Arc::new(stub::NoModal),
            alert: Arc::new(stub::StderrAlert),
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

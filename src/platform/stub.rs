//! Headless device implementations.

use std::io::Write;

use async_trait::async_trait;

use super::{
    AudioOutput, BlockingAlert, ModalPresenter, NotificationSurface, PermissionState, Vibrator,
};
use crate::notify::types::{ModalRequest, NotificationRequest};

/// No OS notification surface. Permission is always denied.
pub struct HeadlessNotifications;

#[async_trait]
impl NotificationSurface for HeadlessNotifications {
    async fn permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    async fn request_permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    async fn show(&self, _request: &NotificationRequest) -> anyhow::Result<()> {
        anyhow::bail!("system notifications are not available in headless mode")
    }

    async fn close_tag(&self, _tag: &str) -> anyhow::Result<usize> {
        Ok(0)
    }
}

/// Device without a vibration motor.
pub struct NoVibrator;

impl Vibrator for NoVibrator {
    fn is_supported(&self) -> bool {
        false
    }

    fn vibrate(&self, _pattern: &[u32]) -> anyhow::Result<()> {
        anyhow::bail!("vibration is not supported on this device")
    }
}

/// Device without audio output.
pub struct SilentAudio;

#[async_trait]
impl AudioOutput for SilentAudio {
    async fn play_asset(&self, name: &str, _volume: f32) -> anyhow::Result<()> {
        anyhow::bail!("no audio output for sound {name:?}")
    }

    async fn play_samples(&self, _samples: &[f32], _sample_rate: u32) -> anyhow::Result<()> {
        anyhow::bail!("no audio output")
    }
}

/// Host without an in-page surface.
pub struct NoModal;

#[async_trait]
impl ModalPresenter for NoModal {
    async fn present(&self, _modal: &ModalRequest) -> anyhow::Result<()> {
        anyhow::bail!("no in-page surface to present on")
    }

    async fn dismiss(&self, _notification_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes the alert to stderr. stdout belongs to the host protocol.
pub struct StderrAlert;

impl BlockingAlert for StderrAlert {
    fn alert(&self, message: &str) -> anyhow::Result<()> {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "\n=== REMINDER ===\n{message}\n================")?;
        stderr.flush()?;
        Ok(())
    }
}

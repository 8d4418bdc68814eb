//! Delivery channel adapters.
//!
//! One adapter per [`DeliveryMethod`]. The dispatcher runs every requested
//! adapter concurrently and only cares whether at least one succeeded.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::delivery::{TONE_SAMPLE_RATE, ToneSpec, audio_volume};
use super::types::{ChannelError, Notification};
use crate::events::types::DeliveryMethod;
use crate::platform::{
    AudioOutput, ModalPresenter, NotificationSurface, PermissionState, Vibrator,
};

/// Channel adapter contract.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Method this channel serves.
    fn method(&self) -> DeliveryMethod;

    /// Deliver `notification` once.
    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError>;
}

// ─── System ──────────────────────────────────────────────────────────────────

/// OS-level notifications. Routes through the background worker when one is
/// registered, otherwise calls the OS surface directly.
pub struct SystemChannel {
    direct: Arc<dyn NotificationSurface>,
    worker: RwLock<Option<Arc<dyn NotificationSurface>>>,
}

impl SystemChannel {
    pub fn new(direct: Arc<dyn NotificationSurface>) -> Self {
        Self {
            direct,
            worker: RwLock::new(None),
        }
    }

    /// Route future deliveries through `worker`.
    pub fn register_worker(&self, worker: Arc<dyn NotificationSurface>) {
        match self.worker.write() {
            Ok(mut slot) => *slot = Some(worker),
            Err(_) => tracing::error!("system channel worker slot poisoned"),
        }
    }

    #[must_use]
    pub fn has_worker(&self) -> bool {
        self.worker.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    fn route(&self) -> Arc<dyn NotificationSurface> {
        self.worker
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| Arc::clone(&self.direct))
    }
}

#[async_trait]
impl DeliveryChannel for SystemChannel {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::System
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        let surface = self.route();
        match surface.permission().await {
            PermissionState::Granted => {}
            other => {
                return Err(ChannelError::PermissionDenied(format!(
                    "notification permission is {other:?}"
                )));
            }
        }
        surface
            .show(&notification.to_request())
            .await
            .map_err(|e| ChannelError::Failed(format!("{e:#}")))
    }
}

// ─── Vibration ───────────────────────────────────────────────────────────────

pub struct VibrationChannel {
    motor: Arc<dyn Vibrator>,
}

impl VibrationChannel {
    pub fn new(motor: Arc<dyn Vibrator>) -> Self {
        Self { motor }
    }
}

#[async_trait]
impl DeliveryChannel for VibrationChannel {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Vibration
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        if !self.motor.is_supported() {
            return Err(ChannelError::Unsupported("device cannot vibrate".to_owned()));
        }
        self.motor
            .vibrate(&notification.vibrate)
            .map_err(|e| ChannelError::Failed(format!("{e:#}")))
    }
}

// ─── Audio ───────────────────────────────────────────────────────────────────

/// Plays the notification's sound asset, falling back to a synthesized
/// beep if the asset cannot play.
pub struct AudioChannel {
    output: Arc<dyn AudioOutput>,
}

impl AudioChannel {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self { output }
    }
}

#[async_trait]
impl DeliveryChannel for AudioChannel {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Sound
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        let volume = audio_volume(notification.priority);
        let asset_err = match self.output.play_asset(&notification.sound, volume).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        tracing::debug!(
            sound = %notification.sound,
            "sound asset failed ({asset_err:#}), synthesizing tone"
        );

        let samples = ToneSpec::for_priority(notification.priority).render(TONE_SAMPLE_RATE);
        self.output
            .play_samples(&samples, TONE_SAMPLE_RATE)
            .await
            .map_err(|e| ChannelError::Failed(format!("asset: {asset_err:#}; tone: {e:#}")))
    }
}

// ─── Visual ──────────────────────────────────────────────────────────────────

/// In-page modal. Non-high-priority modals dismiss themselves after
/// `timeout`.
pub struct VisualChannel {
    presenter: Arc<dyn ModalPresenter>,
    timeout: Duration,
}

impl VisualChannel {
    pub fn new(presenter: Arc<dyn ModalPresenter>, timeout: Duration) -> Self {
        Self { presenter, timeout }
    }
}

#[async_trait]
impl DeliveryChannel for VisualChannel {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Visual
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        let modal = notification.to_modal(self.timeout);
        self.presenter
            .present(&modal)
            .await
            .map_err(|e| ChannelError::Failed(format!("{e:#}")))?;

        if let Some(after) = modal.auto_dismiss {
            let presenter = Arc::clone(&self.presenter);
            let id = modal.notification_id;
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Err(e) = presenter.dismiss(&id).await {
                    tracing::debug!(notification_id = %id, "modal auto-dismiss failed: {e:#}");
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::events::types::{Priority, test_event};
    use crate::notify::delivery::build_notification;
    use crate::notify::settings::NotificationSettings;
    use crate::notify::types::NotificationOptions;
    use crate::platform::recording::{Device, PlatformCall, RecordingPlatform};

    fn notification(priority: Priority) -> Notification {
        let event = test_event("event_1", "Take Aspirin");
        let options = NotificationOptions {
            priority: Some(priority),
            ..NotificationOptions::default()
        };
        build_notification(&event, &options, &NotificationSettings::default(), event.datetime)
    }

    #[tokio::test]
    async fn system_requires_permission() {
        let rec = RecordingPlatform::new();
        rec.set_permission(PermissionState::Denied);
        let channel = SystemChannel::new(rec.platform().notifications);
        let err = channel.deliver(&notification(Priority::Normal)).await.unwrap_err();
        assert!(matches!(err, ChannelError::PermissionDenied(_)));
        assert!(rec.shown().is_empty());
    }

    #[tokio::test]
    async fn system_prefers_registered_worker() {
        let direct = RecordingPlatform::new();
        let worker = RecordingPlatform::new();
        let channel = SystemChannel::new(direct.platform().notifications);
        channel.register_worker(worker.platform().notifications);
        assert!(channel.has_worker());

        channel.deliver(&notification(Priority::Normal)).await.unwrap();
        assert!(direct.shown().is_empty());
        assert_eq!(worker.shown().len(), 1);
        assert_eq!(worker.shown()[0].tag, "event_event_1");
    }

    #[tokio::test]
    async fn vibration_unsupported_is_reported() {
        let rec = RecordingPlatform::new();
        rec.set_vibration_supported(false);
        let channel = VibrationChannel::new(rec.platform().vibrator);
        let err = channel.deliver(&notification(Priority::High)).await.unwrap_err();
        assert!(matches!(err, ChannelError::Unsupported(_)));
    }

    #[tokio::test]
    async fn audio_falls_back_to_tone() {
        let rec = RecordingPlatform::new();
        rec.fail(Device::AudioAsset);
        let channel = AudioChannel::new(rec.platform().audio);
        channel.deliver(&notification(Priority::High)).await.unwrap();
        assert!(rec.calls().iter().any(|call| matches!(
            call,
            PlatformCall::PlayedSamples { sample_rate: TONE_SAMPLE_RATE, .. }
        )));
    }

    #[tokio::test]
    async fn audio_uses_priority_volume() {
        let rec = RecordingPlatform::new();
        let channel = AudioChannel::new(rec.platform().audio);
        channel.deliver(&notification(Priority::Low)).await.unwrap();
        assert!(rec.calls().iter().any(|call| matches!(
            call,
            PlatformCall::PlayedAsset { volume, .. } if (*volume - 0.3).abs() < f32::EPSILON
        )));
    }

    #[tokio::test]
    async fn audio_fails_when_tone_also_fails() {
        let rec = RecordingPlatform::new();
        rec.fail(Device::AudioAsset);
        rec.fail(Device::AudioSamples);
        let channel = AudioChannel::new(rec.platform().audio);
        assert!(channel.deliver(&notification(Priority::Normal)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn visual_auto_dismisses_unless_high_priority() {
        let rec = RecordingPlatform::new();
        let channel = VisualChannel::new(rec.platform().modal, Duration::from_secs(10));

        let normal = notification(Priority::Normal);
        let high = notification(Priority::High);
        channel.deliver(&normal).await.unwrap();
        channel.deliver(&high).await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rec.dismissed(), vec![normal.id.clone()]);
    }
}

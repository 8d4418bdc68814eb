//! Recording device doubles.
//!
//! [`RecordingPlatform`] implements every device seam, records each call
//! and can be told to fail or hang per device. Used by unit and
//! integration tests and by hosts that want a dry run.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
    AudioOutput, BlockingAlert, ModalPresenter, NotificationSurface, PermissionState, Platform,
    Vibrator,
};
use crate::notify::types::{ModalRequest, NotificationRequest};

/// A device that can be made to misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Notifications,
    Vibration,
    AudioAsset,
    AudioSamples,
    Modal,
    Alert,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    PermissionRequested,
    Shown(NotificationRequest),
    ClosedTag(String),
    Vibrated(Vec<u32>),
    PlayedAsset { name: String, volume: f32 },
    PlayedSamples { len: usize, sample_rate: u32 },
    Presented(ModalRequest),
    Dismissed(String),
    Alert(String),
}

#[derive(Default)]
struct State {
    calls: Vec<PlatformCall>,
    failing: HashSet<Device>,
    hanging: HashSet<Device>,
    permission: PermissionState,
    permission_on_request: PermissionState,
    vibration_unsupported: bool,
}

/// Cloneable handle; every clone shares the same record.
#[derive(Clone, Default)]
pub struct RecordingPlatform {
    state: Arc<Mutex<State>>,
}

impl RecordingPlatform {
    /// Every device works and notification permission is granted.
    #[must_use]
    pub fn new() -> Self {
        let platform = Self::default();
        platform.set_permission(PermissionState::Granted);
        platform
    }

    /// Bundle this recorder as a [`Platform`].
    #[must_use]
    pub fn platform(&self) -> Platform {
        Platform {
            notifications: Arc::new(self.clone()),
            vibrator: Arc::new(self.clone()),
            audio: Arc::new(self.clone()),
            modal: Arc::new(self.clone()),
            alert: Arc::new(self.clone()),
        }
    }

    /// Make `device` return errors.
    pub fn fail(&self, device: Device) {
        self.lock().failing.insert(device);
    }

    /// Make every device except the blocking alert fail.
    pub fn fail_all_channels(&self) {
        let mut state = self.lock();
        for device in [
            Device::Notifications,
            Device::Vibration,
            Device::AudioAsset,
            Device::AudioSamples,
            Device::Modal,
        ] {
            state.failing.insert(device);
        }
    }

    /// Make `device` never complete.
    pub fn hang(&self, device: Device) {
        self.lock().hanging.insert(device);
    }

    /// Undo [`Self::fail`] and [`Self::hang`] for `device`.
    pub fn recover(&self, device: Device) {
        let mut state = self.lock();
        state.failing.remove(&device);
        state.hanging.remove(&device);
    }

    /// Set both the current permission and the answer to a prompt.
    pub fn set_permission(&self, permission: PermissionState) {
        let mut state = self.lock();
        state.permission = permission;
        state.permission_on_request = permission;
    }

    /// Current permission stays `Prompt`; a prompt resolves to `answer`.
    pub fn prompt_resolves_to(&self, answer: PermissionState) {
        let mut state = self.lock();
        state.permission = PermissionState::Prompt;
        state.permission_on_request = answer;
    }

    pub fn set_vibration_supported(&self, supported: bool) {
        self.lock().vibration_unsupported = !supported;
    }

    /// Every recorded call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock().calls.clone()
    }

    /// Shown OS notifications.
    #[must_use]
    pub fn shown(&self) -> Vec<NotificationRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Shown(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Blocking alert messages.
    #[must_use]
    pub fn alerts(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Alert(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Vibration patterns played.
    #[must_use]
    pub fn vibrations(&self) -> Vec<Vec<u32>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Vibrated(pattern) => Some(pattern.clone()),
                _ => None,
            })
            .collect()
    }

    /// Modal ids dismissed.
    #[must_use]
    pub fn dismissed(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Dismissed(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls, keeping failure settings.
    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock only happens in a failing test;
        // keep recording anyway.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, call: PlatformCall) {
        self.lock().calls.push(call);
    }

    /// Record `call`, then honour failure and hang settings for `device`.
    async fn attempt(&self, device: Device, call: PlatformCall) -> anyhow::Result<()> {
        let (failing, hanging) = {
            let state = self.lock();
            (state.failing.contains(&device), state.hanging.contains(&device))
        };
        if hanging {
            std::future::pending::<()>().await;
        }
        if failing {
            anyhow::bail!("{device:?} failed");
        }
        self.record(call);
        Ok(())
    }
}

#[async_trait]
impl NotificationSurface for RecordingPlatform {
    async fn permission(&self) -> PermissionState {
        self.lock().permission
    }

    async fn request_permission(&self) -> PermissionState {
        self.record(PlatformCall::PermissionRequested);
        let hanging = self.lock().hanging.contains(&Device::Notifications);
        if hanging {
            std::future::pending::<()>().await;
        }
        let mut state = self.lock();
        state.permission = state.permission_on_request;
        state.permission
    }

    async fn show(&self, request: &NotificationRequest) -> anyhow::Result<()> {
        self.attempt(Device::Notifications, PlatformCall::Shown(request.clone()))
            .await
    }

    async fn close_tag(&self, tag: &str) -> anyhow::Result<usize> {
        let mut state = self.lock();
        let shown = state
            .calls
            .iter()
            .filter(|call| matches!(call, PlatformCall::Shown(r) if r.tag == tag))
            .count();
        state.calls.push(PlatformCall::ClosedTag(tag.to_owned()));
        Ok(shown)
    }
}

impl Vibrator for RecordingPlatform {
    fn is_supported(&self) -> bool {
        !self.lock().vibration_unsupported
    }

    fn vibrate(&self, pattern: &[u32]) -> anyhow::Result<()> {
        if self.lock().failing.contains(&Device::Vibration) {
            anyhow::bail!("vibration motor failed");
        }
        self.record(PlatformCall::Vibrated(pattern.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl AudioOutput for RecordingPlatform {
    async fn play_asset(&self, name: &str, volume: f32) -> anyhow::Result<()> {
        self.attempt(
            Device::AudioAsset,
            PlatformCall::PlayedAsset {
                name: name.to_owned(),
                volume,
            },
        )
        .await
    }

    async fn play_samples(&self, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
        self.attempt(
            Device::AudioSamples,
            PlatformCall::PlayedSamples {
                len: samples.len(),
                sample_rate,
            },
        )
        .await
    }
}

#[async_trait]
impl ModalPresenter for RecordingPlatform {
    async fn present(&self, modal: &ModalRequest) -> anyhow::Result<()> {
        self.attempt(Device::Modal, PlatformCall::Presented(modal.clone()))
            .await
    }

    async fn dismiss(&self, notification_id: &str) -> anyhow::Result<()> {
        if self.lock().failing.contains(&Device::Modal) {
            anyhow::bail!("modal {notification_id} could not be dismissed");
        }
        self.record(PlatformCall::Dismissed(notification_id.to_owned()));
        Ok(())
    }
}

impl BlockingAlert for RecordingPlatform {
    fn alert(&self, message: &str) -> anyhow::Result<()> {
        if self.lock().failing.contains(&Device::Alert) {
            anyhow::bail!("alert could not be shown");
        }
        self.record(PlatformCall::Alert(message.to_owned()));
        Ok(())
    }
}

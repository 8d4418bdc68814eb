//! Pure delivery helpers: notification assembly, vibration patterns,
//! volume and the synthesized fallback tone.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::settings::NotificationSettings;
use super::types::{Notification, NotificationOptions, default_actions};
use crate::events::types::{DeliveryMethod, Event, Priority};

/// Sample rate of the synthesized tone.
pub const TONE_SAMPLE_RATE: u32 = 22_050;

/// Build the notification for `event`.
///
/// Each field takes the first present value of the explicit `options`,
/// the event's own preferences and the global `settings`. Global sound and
/// vibration switches remove those methods.
#[must_use]
pub fn build_notification(
    event: &Event,
    options: &NotificationOptions,
    settings: &NotificationSettings,
    now: DateTime<Utc>,
) -> Notification {
    let priority = options.priority.unwrap_or(event.notifications.priority);

    let mut methods: BTreeSet<DeliveryMethod> = match &options.methods {
        Some(methods) => methods.clone(),
        None if !event.notifications.methods.is_empty() => event.notifications.methods.clone(),
        None => settings.default_methods.clone(),
    };
    if !settings.sound_enabled {
        methods.remove(&DeliveryMethod::Sound);
    }
    if !settings.vibration_enabled {
        methods.remove(&DeliveryMethod::Vibration);
    }

    let body = options.body.clone().unwrap_or_else(|| {
        if event.description.trim().is_empty() {
            format!("Time for your {} reminder", event.category)
        } else {
            event.description.clone()
        }
    });

    Notification {
        id: Notification::new_id(),
        event_id: event.id.clone(),
        category: event.category.clone(),
        created_at: now,
        title: options.title.clone().unwrap_or_else(|| event.title.clone()),
        body,
        icon: options.icon.clone().or_else(|| settings.icon.clone()),
        badge: options.badge.clone().or_else(|| settings.badge.clone()),
        tag: options
            .tag
            .clone()
            .unwrap_or_else(|| Notification::default_tag(event)),
        priority,
        methods,
        require_interaction: options
            .require_interaction
            .unwrap_or(priority == Priority::High),
        vibrate: options
            .vibrate
            .clone()
            .unwrap_or_else(|| vibration_pattern(priority, &settings.vibration_pattern)),
        sound: options
            .sound
            .clone()
            .or_else(|| event.notifications.sound.clone())
            .unwrap_or_else(|| settings.sound.clone()),
        actions: options
            .actions
            .clone()
            .unwrap_or_else(|| default_actions(&event.category)),
    }
}

/// Vibration pattern for `priority`; normal priority uses `base`.
#[must_use]
pub fn vibration_pattern(priority: Priority, base: &[u32]) -> Vec<u32> {
    match priority {
        Priority::High => vec![500, 200, 500, 200, 500],
        Priority::Low => vec![100, 100, 100],
        Priority::Normal => base.to_vec(),
    }
}

/// Playback volume for `priority`.
#[must_use]
pub fn audio_volume(priority: Priority) -> f32 {
    match priority {
        Priority::High => 1.0,
        Priority::Normal => 0.7,
        Priority::Low => 0.3,
    }
}

/// Parameters of the synthesized beep used when no sound asset plays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSpec {
    pub frequency_hz: f32,
    pub duration_ms: u32,
    pub gain: f32,
}

impl ToneSpec {
    #[must_use]
    pub fn for_priority(priority: Priority) -> Self {
        let (frequency_hz, duration_ms) = match priority {
            Priority::High => (800.0, 800),
            Priority::Normal => (600.0, 400),
            Priority::Low => (400.0, 400),
        };
        Self {
            frequency_hz,
            duration_ms,
            gain: 0.3,
        }
    }

    /// Sine samples with an exponential decay to 1% of `gain`.
    #[must_use]
    pub fn render(&self, sample_rate: u32) -> Vec<f32> {
        let len = (u64::from(sample_rate) * u64::from(self.duration_ms) / 1000) as usize;
        if len == 0 {
            return Vec::new();
        }
        let duration_s = self.duration_ms as f32 / 1000.0;
        // gain * e^(-k t) reaches 0.01 * gain at t = duration.
        let decay = (100.0_f32).ln() / duration_s;
        let step = std::f32::consts::TAU * self.frequency_hz / sample_rate as f32;
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (step * i as f32).sin() * self.gain * (-decay * t).exp()
            })
            .collect()
    }
}

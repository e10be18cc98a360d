//! Shake gesture detection on raw accelerometer samples.
//!
//! Each sample's magnitude is fed through a leaky high-pass filter
//! (`accel = accel * 0.9 + (magnitude - last_magnitude)`). A shake fires when
//! the filtered value crosses the sensitivity threshold and the cooldown since
//! the previous shake has elapsed. What a shake *does* is a [`ShakeBehavior`],
//! carried out through a [`ShakeTarget`].
//!
//! ## Rust concepts
//! - Internally tagged serde enums (`#[serde(tag = "behavior")]`) so the
//!   persisted form records which variant it is
//! - A small trait as the seam between detection and side effects

use crate::auto_start::AutoStartCommand;
use crate::media_session::{MediaSessionObserver, TransportCommand, send_transport_off_runtime};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Standard gravity in m/s², the magnitude of a device at rest.
pub const GRAVITY: f32 = 9.80665;
const FILTER_DECAY: f32 = 0.9;
pub const DEFAULT_COOLDOWN_MS: u64 = 1_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    High,
    #[default]
    Medium,
    Low,
}

impl Sensitivity {
    /// Filtered acceleration (m/s²) needed to count as a shake. Higher
    /// sensitivity means a lower threshold.
    pub fn threshold(self) -> f32 {
        match self {
            Sensitivity::High => 8.0,
            Sensitivity::Medium => 12.0,
            Sensitivity::Low => 18.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipDirection {
    #[default]
    Next,
    Previous,
}

/// What a shake does. Each variant carries only the settings it needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum ShakeBehavior {
    Skip { direction: SkipDirection },
    PlayPause,
    ToggleAutoStart,
}

impl Default for ShakeBehavior {
    fn default() -> Self {
        ShakeBehavior::Skip {
            direction: SkipDirection::Next,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ShakeSettings {
    pub enabled: bool,
    pub sensitivity: Sensitivity,
    pub cooldown_ms: u64,
    pub behavior: ShakeBehavior,
}

impl Default for ShakeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sensitivity: Sensitivity::default(),
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            behavior: ShakeBehavior::default(),
        }
    }
}

/// One raw accelerometer reading, m/s² per axis.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, utoipa::ToSchema)]
pub struct AccelSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub timestamp_ms: u64,
}

impl AccelSample {
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShakeEvent {
    pub force_magnitude: f32,
    pub timestamp: u64,
}

pub struct ShakeDetector {
    threshold: f32,
    cooldown_ms: u64,
    acceleration: f32,
    last_magnitude: f32,
    last_shake_ms: Option<u64>,
}

impl ShakeDetector {
    pub fn new(sensitivity: Sensitivity, cooldown_ms: u64) -> Self {
        Self {
            threshold: sensitivity.threshold(),
            cooldown_ms,
            acceleration: 0.0,
            last_magnitude: GRAVITY,
            last_shake_ms: None,
        }
    }

    pub fn from_settings(settings: &ShakeSettings) -> Self {
        Self::new(settings.sensitivity, settings.cooldown_ms)
    }

    /// Feed one sample. Returns an event at most once per cooldown window.
    pub fn on_sample(&mut self, sample: AccelSample) -> Option<ShakeEvent> {
        let magnitude = sample.magnitude();
        self.acceleration = self.acceleration * FILTER_DECAY + (magnitude - self.last_magnitude);
        self.last_magnitude = magnitude;

        if self.acceleration <= self.threshold {
            return None;
        }
        let cooled_down = self
            .last_shake_ms
            .is_none_or(|last| sample.timestamp_ms.saturating_sub(last) > self.cooldown_ms);
        if !cooled_down {
            return None;
        }

        self.last_shake_ms = Some(sample.timestamp_ms);
        Some(ShakeEvent {
            force_magnitude: self.acceleration,
            timestamp: sample.timestamp_ms,
        })
    }
}

/// Where shake behaviors land.
pub trait ShakeTarget: Send {
    fn transport(&mut self, command: TransportCommand);
    fn toggle_auto_start(&mut self);
}

impl ShakeBehavior {
    pub fn dispatch(&self, target: &mut dyn ShakeTarget) {
        match self {
            ShakeBehavior::Skip {
                direction: SkipDirection::Next,
            } => target.transport(TransportCommand::Next),
            ShakeBehavior::Skip {
                direction: SkipDirection::Previous,
            } => target.transport(TransportCommand::Previous),
            ShakeBehavior::PlayPause => target.transport(TransportCommand::PlayPause),
            ShakeBehavior::ToggleAutoStart => target.toggle_auto_start(),
        }
    }
}

/// Shake behaviors wired to the engine: transport commands go to the
/// followed media session, the auto-start toggle goes to the orchestrator.
pub struct EngineShakeTarget {
    pub observer: Arc<Mutex<MediaSessionObserver>>,
    pub auto_start: mpsc::Sender<AutoStartCommand>,
}

impl ShakeTarget for EngineShakeTarget {
    fn transport(&mut self, command: TransportCommand) {
        let observer = self.observer.clone();
        tokio::spawn(async move {
            if let Err(e) = send_transport_off_runtime(&observer, command).await {
                tracing::warn!("Shake {:?} not delivered: {}", command, e);
            }
        });
    }

    fn toggle_auto_start(&mut self) {
        if let Err(e) = self.auto_start.try_send(AutoStartCommand::Toggle) {
            tracing::warn!("Shake auto-start toggle dropped: {}", e);
        }
    }
}

fn log_settings(settings: &ShakeSettings) {
    if settings.enabled {
        tracing::info!(
            "Shake detection on ({:?}, cooldown {}ms, {:?})",
            settings.sensitivity,
            settings.cooldown_ms,
            settings.behavior
        );
    } else {
        tracing::info!("Shake gestures disabled");
    }
}

/// Consume samples until the channel closes or `token` is cancelled.
///
/// Settings are re-read whenever `settings` changes; a change resets the
/// detector. Samples arriving while disabled are dropped.
pub async fn run_shake_loop(
    mut settings: watch::Receiver<ShakeSettings>,
    mut samples: mpsc::Receiver<AccelSample>,
    mut target: Box<dyn ShakeTarget>,
    token: CancellationToken,
) {
    let mut current = settings.borrow_and_update().clone();
    let mut detector = ShakeDetector::from_settings(&current);
    let mut settings_open = true;
    log_settings(&current);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            changed = settings.changed(), if settings_open => {
                if changed.is_err() {
                    settings_open = false;
                    continue;
                }
                current = settings.borrow_and_update().clone();
                detector = ShakeDetector::from_settings(&current);
                log_settings(&current);
            }
            sample = samples.recv() => {
                let Some(sample) = sample else { break };
                if !current.enabled {
                    continue;
                }
                if let Some(event) = detector.on_sample(sample) {
                    tracing::info!("Shake detected (force {:.1})", event.force_magnitude);
                    current.behavior.dispatch(target.as_mut());
                }
            }
        }
    }
    tracing::info!("Shake detection stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn rest(t: u64) -> AccelSample {
        AccelSample {
            x: 0.0,
            y: 0.0,
            z: GRAVITY,
            timestamp_ms: t,
        }
    }

    fn spike(t: u64) -> AccelSample {
        AccelSample {
            x: 30.0,
            y: 0.0,
            z: GRAVITY,
            timestamp_ms: t,
        }
    }

    /// A spike followed by enough rest samples for the filter to settle.
    fn feed_spike(detector: &mut ShakeDetector, t: u64) -> Vec<ShakeEvent> {
        let mut events = Vec::new();
        events.extend(detector.on_sample(spike(t)));
        for i in 1..=40 {
            events.extend(detector.on_sample(rest(t + i)));
        }
        events
    }

    #[test]
    fn thresholds_are_ordered_by_sensitivity() {
        assert!(Sensitivity::High.threshold() < Sensitivity::Medium.threshold());
        assert!(Sensitivity::Medium.threshold() < Sensitivity::Low.threshold());
    }

    #[test]
    fn device_at_rest_never_fires() {
        let mut detector = ShakeDetector::new(Sensitivity::High, DEFAULT_COOLDOWN_MS);
        for t in 0..500 {
            assert_eq!(detector.on_sample(rest(t)), None);
        }
    }

    #[rstest]
    #[case(100, 1)]
    #[case(1_100, 2)]
    fn cooldown_limits_events(#[case] gap_ms: u64, #[case] expected: usize) {
        let mut detector = ShakeDetector::new(Sensitivity::Medium, 1_000);
        let mut events = feed_spike(&mut detector, 0);
        events.extend(feed_spike(&mut detector, gap_ms));
        assert_eq!(events.len(), expected);
    }

    #[test]
    fn single_fire_while_above_threshold() {
        let mut detector = ShakeDetector::new(Sensitivity::High, 1_000);
        let events: Vec<_> = (0..20)
            .filter_map(|i| {
                // Alternating spikes keep the filter well above threshold
                let sample = if i % 2 == 0 { spike(i * 10) } else { rest(i * 10) };
                detector.on_sample(sample)
            })
            .collect();
        assert_eq!(events.len(), 1);
        assert!(events[0].force_magnitude > Sensitivity::High.threshold());
    }

    #[test]
    fn low_sensitivity_ignores_a_moderate_jolt() {
        let jolt = AccelSample {
            x: 16.0,
            y: 0.0,
            z: GRAVITY,
            timestamp_ms: 0,
        };
        let mut high = ShakeDetector::new(Sensitivity::High, 1_000);
        let mut low = ShakeDetector::new(Sensitivity::Low, 1_000);
        assert!(high.on_sample(jolt).is_some());
        assert!(low.on_sample(jolt).is_none());
    }

    #[test]
    fn behavior_round_trips_with_tag() {
        let settings = ShakeSettings {
            behavior: ShakeBehavior::Skip {
                direction: SkipDirection::Previous,
            },
            ..ShakeSettings::default()
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["behavior"]["behavior"], "skip");
        assert_eq!(json["behavior"]["direction"], "previous");
        let back: ShakeSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, settings);
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl ShakeTarget for Recorder {
        fn transport(&mut self, command: TransportCommand) {
            self.0.lock().unwrap().push(format!("{command:?}"));
        }

        fn toggle_auto_start(&mut self) {
            self.0.lock().unwrap().push("toggle".into());
        }
    }

    #[rstest]
    #[case(ShakeBehavior::Skip { direction: SkipDirection::Next }, "Next")]
    #[case(ShakeBehavior::Skip { direction: SkipDirection::Previous }, "Previous")]
    #[case(ShakeBehavior::PlayPause, "PlayPause")]
    #[case(ShakeBehavior::ToggleAutoStart, "toggle")]
    fn behaviors_dispatch(#[case] behavior: ShakeBehavior, #[case] expected: &str) {
        let mut recorder = Recorder::default();
        behavior.dispatch(&mut recorder);
        assert_eq!(*recorder.0.lock().unwrap(), vec![expected.to_string()]);
    }

    #[tokio::test]
    async fn loop_dispatches_detected_shakes() {
        let recorder = Recorder::default();
        let settings = ShakeSettings {
            enabled: true,
            behavior: ShakeBehavior::PlayPause,
            ..ShakeSettings::default()
        };
        let (tx, rx) = mpsc::channel(64);
        let (_settings_tx, settings_rx) = watch::channel(settings);
        let handle = tokio::spawn(run_shake_loop(
            settings_rx,
            rx,
            Box::new(recorder.clone()),
            CancellationToken::new(),
        ));

        tx.send(spike(0)).await.unwrap();
        tx.send(rest(10)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*recorder.0.lock().unwrap(), vec!["PlayPause".to_string()]);
    }

    #[tokio::test]
    async fn loop_follows_settings_changes() {
        let recorder = Recorder::default();
        let (settings_tx, settings_rx) = watch::channel(ShakeSettings::default());
        let (tx, rx) = mpsc::channel(64);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_shake_loop(
            settings_rx,
            rx,
            Box::new(recorder.clone()),
            token.clone(),
        ));

        // Disabled by default: the spike is ignored
        tx.send(spike(0)).await.unwrap();
        tx.send(rest(10)).await.unwrap();
        tokio::task::yield_now().await;

        settings_tx.send_replace(ShakeSettings {
            enabled: true,
            behavior: ShakeBehavior::ToggleAutoStart,
            ..ShakeSettings::default()
        });
        tokio::task::yield_now().await;
        tx.send(spike(5_000)).await.unwrap();
        tx.send(rest(5_010)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*recorder.0.lock().unwrap(), vec!["toggle".to_string()]);
    }

    #[tokio::test]
    async fn engine_target_forwards_toggle() {
        use crate::media_session::{IdleSessionManager, NowPlaying};

        let observer = Arc::new(Mutex::new(MediaSessionObserver::new(
            Arc::new(IdleSessionManager),
            NowPlaying::default(),
        )));
        let (tx, mut rx) = mpsc::channel(4);
        let mut target = EngineShakeTarget {
            observer,
            auto_start: tx,
        };
        target.toggle_auto_start();
        // No session to control: logged and dropped
        target.transport(TransportCommand::Next);
        assert_eq!(rx.try_recv().ok(), Some(AutoStartCommand::Toggle));
    }
}

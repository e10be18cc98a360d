//! Pulse theme: a ring that swells on every beat around a bass-lit core.
//!
//! Reads the latest [`AudioSignal`] at frame time. When nothing is playing
//! it falls back to a slow breathing ring driven only by the frame index.

use super::settings::{ResolvedSettings, SettingDecl, SettingValues, SettingsSchema};
use super::{AudioReactive, SettingsCell, SettingsProvider, Theme, check_index};
use crate::audio::AudioSignal;
use crate::error::FrameError;
use crate::geometry::{MASK_RADIUS, PixelFrame, clamp_intensity, distance_from_center};
use arc_swap::ArcSwap;
use std::f64::consts::TAU;
use std::sync::Arc;

pub const ID: &str = "pulse";
const FRAME_COUNT: usize = 30;
const RING_WIDTH: f64 = 1.5;

pub struct PulseTheme {
    settings: SettingsCell,
    signal: ArcSwap<AudioSignal>,
}

impl Default for PulseTheme {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseTheme {
    pub fn new() -> Self {
        Self {
            settings: SettingsCell::new(SettingsSchema::new(vec![
                SettingDecl::slider("brightness", "Brightness", 10.0, 255.0, 5.0, 255.0),
                SettingDecl::slider("sensitivity", "Sensitivity", 0.5, 2.0, 0.1, 1.0).with_unit("×"),
                SettingDecl::toggle("bass_core", "Light the center on bass", true),
            ])),
            signal: ArcSwap::from_pointee(AudioSignal::silent()),
        }
    }
}

/// Intensity of a soft ring of `radius` at distance `d`.
fn ring(d: f64, radius: f64) -> f64 {
    (1.0 - (d - radius).abs() / RING_WIDTH).max(0.0) * 255.0
}

fn breathing_frame(index: usize) -> PixelFrame {
    let phase = index as f64 / FRAME_COUNT as f64;
    let radius = 4.0 + 3.0 * (0.5 - 0.5 * (TAU * phase).cos());
    PixelFrame::from_fn(|row, col| clamp_intensity(ring(distance_from_center(row, col), radius) * 0.5))
}

fn beat_frame(index: usize, signal: &AudioSignal, settings: &ResolvedSettings) -> PixelFrame {
    let gain = settings.number("sensitivity");
    let beat = (signal.beat_intensity * gain).clamp(0.0, 1.0);
    let bass = (signal.bass_level * gain).clamp(0.0, 1.0);
    // A faint ripple keeps the ring moving between beats.
    let wobble = 0.5 * (TAU * index as f64 / FRAME_COUNT as f64).sin();
    let radius = (3.0 + beat * (MASK_RADIUS - 4.0) + wobble).max(0.0);
    let core_radius = 1.0 + bass * 3.0;
    let bass_core = settings.toggle("bass_core");

    PixelFrame::from_fn(|row, col| {
        let d = distance_from_center(row, col);
        let mut level = ring(d, radius) * (0.4 + 0.6 * beat);
        if bass_core && d <= core_radius {
            level = level.max(255.0 * bass);
        }
        clamp_intensity(level)
    })
}

impl Theme for PulseTheme {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "Pulse"
    }

    fn frame_count(&self) -> usize {
        FRAME_COUNT
    }

    fn generate_frame(&self, index: i64) -> Result<PixelFrame, FrameError> {
        let index = check_index(index, FRAME_COUNT)?;
        let signal = self.signal.load();
        if !signal.is_playing {
            return Ok(breathing_frame(index));
        }
        Ok(beat_frame(index, &signal, &self.settings.load()))
    }

    fn brightness(&self) -> i32 {
        self.settings.load().number("brightness").round() as i32
    }

    fn settings_provider(&self) -> Option<&dyn SettingsProvider> {
        Some(self)
    }

    fn audio_reactive(&self) -> Option<&dyn AudioReactive> {
        Some(self)
    }
}

impl SettingsProvider for PulseTheme {
    fn schema(&self) -> &SettingsSchema {
        self.settings.schema()
    }

    fn current(&self) -> Arc<ResolvedSettings> {
        self.settings.load()
    }

    fn apply(&self, values: &SettingValues) -> Arc<ResolvedSettings> {
        self.settings.apply(values).1
    }
}

impl AudioReactive for PulseTheme {
    fn update_audio(&self, signal: AudioSignal) {
        self.signal.store(Arc::new(signal));
    }
}

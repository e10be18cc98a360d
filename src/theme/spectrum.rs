//! Spectrum theme: vertical bars, bass on the left and treble on the right.
//!
//! Only three band levels exist, so the columns in between are linear
//! blends of their neighbours with a little per-column shimmer. With no
//! audio the theme shows an idle scanner line.

use super::settings::{ResolvedSettings, SettingDecl, SettingValues, SettingsSchema};
use super::{AudioReactive, SettingsCell, SettingsProvider, Theme, check_index};
use crate::audio::AudioSignal;
use crate::error::FrameError;
use crate::geometry::{CENTER, GRID_SIZE, PixelFrame, clamp_intensity};
use arc_swap::ArcSwap;
use std::f64::consts::TAU;
use std::sync::Arc;

pub const ID: &str = "spectrum";
const FRAME_COUNT: usize = 24;

pub struct SpectrumTheme {
    settings: SettingsCell,
    signal: ArcSwap<AudioSignal>,
}

impl Default for SpectrumTheme {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumTheme {
    pub fn new() -> Self {
        Self {
            settings: SettingsCell::new(SettingsSchema::new(vec![
                SettingDecl::slider("brightness", "Brightness", 10.0, 255.0, 5.0, 255.0),
                SettingDecl::dropdown(
                    "style",
                    "Style",
                    &[("bars", "Bars"), ("mirror", "Mirrored")],
                    "bars",
                ),
            ])),
            signal: ArcSwap::from_pointee(AudioSignal::silent()),
        }
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Level of column `col`, blending bass → mid → treble across the width.
fn column_level(signal: &AudioSignal, col: usize) -> f64 {
    let f = col as f64 / (GRID_SIZE - 1) as f64;
    if f < 0.5 {
        lerp(signal.bass_level, signal.mid_level, f * 2.0)
    } else {
        lerp(signal.mid_level, signal.treble_level, (f - 0.5) * 2.0)
    }
}

fn idle_frame(index: usize) -> PixelFrame {
    let mid = CENTER as usize;
    let dot = index * GRID_SIZE / FRAME_COUNT;
    PixelFrame::from_fn(|row, col| match (row == mid, col == dot) {
        (true, true) => 255,
        (true, false) => 40,
        _ => 0,
    })
}

fn bars_frame(index: usize, signal: &AudioSignal, settings: &ResolvedSettings) -> PixelFrame {
    let mirror = settings.choice("style") == "mirror";
    let t = index as f64 / FRAME_COUNT as f64;
    let heights: Vec<f64> = (0..GRID_SIZE)
        .map(|col| {
            let shimmer = 0.85 + 0.15 * (TAU * (t + col as f64 * 0.37)).sin();
            (column_level(signal, col) * shimmer).clamp(0.0, 1.0)
        })
        .collect();

    PixelFrame::from_fn(|row, col| {
        let level = heights[col];
        let lit = level > 0.0
            && if mirror {
                (row as f64 - CENTER).abs() <= level * CENTER
            } else {
                (GRID_SIZE - 1 - row) as f64 <= level * (GRID_SIZE - 1) as f64
            };
        if lit {
            clamp_intensity(96.0 + 159.0 * level)
        } else {
            0
        }
    })
}

impl Theme for SpectrumTheme {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "Spectrum"
    }

    fn frame_count(&self) -> usize {
        FRAME_COUNT
    }

    fn generate_frame(&self, index: i64) -> Result<PixelFrame, FrameError> {
        let index = check_index(index, FRAME_COUNT)?;
        let signal = self.signal.load();
        if !signal.is_playing {
            return Ok(idle_frame(index));
        }
        Ok(bars_frame(index, &signal, &self.settings.load()))
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

impl SettingsProvider for SpectrumTheme {
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

impl AudioReactive for SpectrumTheme {
    fn update_audio(&self, signal: AudioSignal) {
        self.signal.store(Arc::new(signal));
    }
}

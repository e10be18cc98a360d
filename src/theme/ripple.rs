//! Ripple theme: concentric waves travelling outward from the center.
//!
//! Purely procedural, so frames depend only on the index and settings. The
//! speed setting changes the cycle length rather than the tick rate.

use super::settings::{ResolvedSettings, SettingDecl, SettingValues, SettingsSchema};
use super::{SettingsCell, SettingsProvider, Theme, check_index, frames_for_choice};
use crate::error::FrameError;
use crate::geometry::{MASK_RADIUS, PixelFrame, clamp_intensity, distance_from_center};
use std::f64::consts::TAU;
use std::sync::Arc;

pub const ID: &str = "ripple";
const SPEEDS: &[(&str, usize)] = &[("slow", 60), ("normal", 40), ("fast", 20)];
const DEFAULT_FRAMES: usize = 40;

pub struct RippleTheme {
    settings: SettingsCell,
}

impl Default for RippleTheme {
    fn default() -> Self {
        Self::new()
    }
}

impl RippleTheme {
    pub fn new() -> Self {
        Self {
            settings: SettingsCell::new(SettingsSchema::new(vec![
                SettingDecl::slider("brightness", "Brightness", 10.0, 255.0, 5.0, 200.0),
                SettingDecl::slider("waves", "Waves", 1.0, 6.0, 1.0, 3.0),
                SettingDecl::dropdown(
                    "speed",
                    "Speed",
                    &[("slow", "Slow"), ("normal", "Normal"), ("fast", "Fast")],
                    "normal",
                ),
                SettingDecl::toggle("fade_edge", "Fade toward the edge", true),
            ])),
        }
    }

    fn frames(settings: &ResolvedSettings) -> usize {
        frames_for_choice(settings.choice("speed"), SPEEDS, DEFAULT_FRAMES)
    }
}

fn ripple_frame(index: usize, frame_count: usize, settings: &ResolvedSettings) -> PixelFrame {
    let waves = settings.number("waves").round().max(1.0);
    let fade_edge = settings.toggle("fade_edge");
    let phase = index as f64 / frame_count as f64;

    PixelFrame::from_fn(|row, col| {
        let d = distance_from_center(row, col) / MASK_RADIUS;
        // Crests move outward as the phase advances.
        let wave = 0.5 + 0.5 * (TAU * (d * waves - phase)).cos();
        let falloff = if fade_edge { 1.0 - 0.6 * d } else { 1.0 };
        clamp_intensity(wave * wave * falloff * 255.0)
    })
}

impl Theme for RippleTheme {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "Ripple"
    }

    fn frame_count(&self) -> usize {
        Self::frames(&self.settings.load())
    }

    fn generate_frame(&self, index: i64) -> Result<PixelFrame, FrameError> {
        let settings = self.settings.load();
        let frame_count = Self::frames(&settings);
        let index = check_index(index, frame_count)?;
        Ok(ripple_frame(index, frame_count, &settings))
    }

    fn brightness(&self) -> i32 {
        self.settings.load().number("brightness").round() as i32
    }

    fn preview_frame_index(&self) -> usize {
        self.frame_count() / 4
    }

    fn settings_provider(&self) -> Option<&dyn SettingsProvider> {
        Some(self)
    }
}

impl SettingsProvider for RippleTheme {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::settings::SettingValue;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn with_speed(speed: &str) -> RippleTheme {
        let theme = RippleTheme::new();
        let mut values = SettingValues::new();
        values.insert("speed".into(), SettingValue::Choice(speed.into()));
        theme.apply(&values);
        theme
    }

    #[rstest]
    #[case("slow", 60)]
    #[case("normal", 40)]
    #[case("fast", 20)]
    fn speed_sets_frame_count(#[case] speed: &str, #[case] frames: usize) {
        let theme = with_speed(speed);
        assert_eq!(theme.frame_count(), frames);
        assert!(theme.generate_frame(frames as i64 - 1).is_ok());
        assert!(theme.generate_frame(frames as i64).is_err());
    }

    #[test]
    fn frames_are_a_pure_function_of_index() {
        let theme = RippleTheme::new();
        assert_eq!(theme.generate_frame(7).unwrap(), theme.generate_frame(7).unwrap());
        assert_ne!(theme.generate_frame(0).unwrap(), theme.generate_frame(10).unwrap());
    }

    #[test]
    fn center_is_a_crest_at_phase_zero() {
        let theme = RippleTheme::new();
        assert_eq!(theme.generate_frame(0).unwrap().get(12, 12), 255);
    }

    #[test]
    fn waves_are_clamped_to_range() {
        let theme = RippleTheme::new();
        let mut values = SettingValues::new();
        values.insert("waves".into(), SettingValue::Number(40.0));
        assert_eq!(theme.apply(&values).number("waves"), 6.0);
    }

    #[test]
    fn preview_frame_is_inside_the_cycle() {
        let theme = with_speed("fast");
        assert_eq!(theme.preview_frame_index(), 5);
        assert!(theme.generate_frame(theme.preview_frame_index() as i64).is_ok());
    }
}

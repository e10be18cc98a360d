//! Album art theme: the current track's cover, downscaled to the matrix.
//!
//! Pipeline for a cover image:
//!
//! 1. resize to 25×25
//! 2. luminance `0.299 R + 0.587 G + 0.114 B`
//! 3. optional contrast: histogram stretch, S-curve (`c = 1.5`), then a
//!    three-segment remap of shadows, midtones and highlights
//! 4. brightness multiplier, clamp to `[0, 255]`
//!
//! The processed frame is cached per cover and dropped when brightness or
//! contrast change. With rotation on, the frame spins at an angle taken from
//! a [`RotationPhase`] that pauses with playback and is persisted so the
//! cover resumes where it stopped after a restart.
//!
//! Frames read live state (cover, clock), so the same index can produce a
//! different frame from one call to the next. Without a cover the theme shows
//! the music-note pattern at medium brightness.

use super::rotation::{RotationPhase, RotationSnapshot, angular_velocity};
use super::settings::{ResolvedSettings, SettingDecl, SettingValues, SettingsSchema};
use super::{SettingsCell, SettingsProvider, Theme, check_index, frames_for_choice};
use crate::brightness::apply_to_frame;
use crate::clock::SharedClock;
use crate::error::FrameError;
use crate::geometry::{CENTER, GRID_SIZE, PixelFrame, clamp_intensity};
use crate::media_session::NowPlaying;
use crate::patterns::music_note;
use crate::store::StateStore;
use image::RgbImage;
use image::imageops::{self, FilterType};
use std::sync::{Arc, Mutex, MutexGuard};

pub const ID: &str = "album_art";

/// Theme brightness of the no-cover fallback.
pub const FALLBACK_BRIGHTNESS: i32 = 128;

const CONTRAST_CURVE: f64 = 1.5;
const SMOOTHNESS: &[(&str, usize)] = &[("low", 24), ("medium", 36), ("high", 72)];
const DEFAULT_FRAMES: usize = 36;

// ── Pipeline ─────────────────────────────────────────────────────────

pub fn luminance(r: u8, g: u8, b: u8) -> f64 {
    0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64
}

/// `x < 0.5: (2x)^c / 2`, else `1 - (2(1 - x))^c / 2`.
fn s_curve(x: f64) -> f64 {
    if x < 0.5 {
        (2.0 * x).powf(CONTRAST_CURVE) / 2.0
    } else {
        1.0 - (2.0 * (1.0 - x)).powf(CONTRAST_CURVE) / 2.0
    }
}

/// Shadows are darkened, highlights expanded, midtones kept.
fn tone_map(x: f64) -> f64 {
    if x < 0.3 {
        x * 0.7
    } else if x > 0.7 {
        0.3 + (x - 0.7) * 2.33
    } else {
        0.3 + (x - 0.3) * 1.0
    }
}

/// Turn a cover image into a masked frame. Pure: the same inputs always give
/// the same bytes.
pub fn process_album_art(image: &RgbImage, brightness: f64, contrast: bool) -> PixelFrame {
    let size = GRID_SIZE as u32;
    let scaled;
    let image = if image.dimensions() == (size, size) {
        image
    } else {
        scaled = imageops::resize(image, size, size, FilterType::Triangle);
        &scaled
    };

    let mut levels = [0.0f64; GRID_SIZE * GRID_SIZE];
    for (x, y, pixel) in image.enumerate_pixels() {
        levels[y as usize * GRID_SIZE + x as usize] = luminance(pixel[0], pixel[1], pixel[2]);
    }

    if contrast {
        let (min, max) = levels
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), &l| (lo.min(l), hi.max(l)));
        let range = (max - min).max(1.0);
        for level in &mut levels {
            let stretched = (*level - min) * 255.0 / range;
            *level = tone_map(s_curve(stretched / 255.0)) * 255.0;
        }
    }

    PixelFrame::from_fn(|row, col| clamp_intensity(levels[row * GRID_SIZE + col] * brightness))
}

/// Rotate a frame clockwise by `degrees` about the grid center.
pub fn rotate(frame: &PixelFrame, degrees: f64) -> PixelFrame {
    if degrees == 0.0 {
        return frame.clone();
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    PixelFrame::from_fn(|row, col| {
        let dx = col as f64 - CENTER;
        let dy = row as f64 - CENTER;
        let src_col = (dx * cos + dy * sin + CENTER).round();
        let src_row = (-dx * sin + dy * cos + CENTER).round();
        if src_col < 0.0 || src_row < 0.0 {
            return 0;
        }
        frame.get(src_row as usize, src_col as usize)
    })
}

// ── Theme ────────────────────────────────────────────────────────────

struct CachedArt {
    art: Arc<RgbImage>,
    frame: PixelFrame,
}

pub struct AlbumArtTheme {
    settings: SettingsCell,
    now_playing: NowPlaying,
    clock: SharedClock,
    store: Arc<StateStore>,
    rotation: Mutex<RotationPhase>,
    cache: Mutex<Option<CachedArt>>,
}

fn schema() -> SettingsSchema {
    SettingsSchema::new(vec![
        SettingDecl::slider("brightness", "Brightness", 0.1, 2.0, 0.1, 1.0).with_unit("×"),
        SettingDecl::toggle("contrast", "Enhance contrast", false),
        SettingDecl::toggle("rotation", "Rotate", false),
        SettingDecl::slider("rotation_speed_ms", "Rotation speed", 20.0, 500.0, 10.0, 100.0)
            .with_unit("ms/frame"),
        SettingDecl::dropdown(
            "rotation_smoothness",
            "Rotation smoothness",
            &[("low", "Low"), ("medium", "Medium"), ("high", "High")],
            "medium",
        ),
    ])
}

fn rotation_frames(settings: &ResolvedSettings) -> usize {
    frames_for_choice(settings.choice("rotation_smoothness"), SMOOTHNESS, DEFAULT_FRAMES)
}

fn rotation_velocity(settings: &ResolvedSettings) -> f64 {
    angular_velocity(settings.number("rotation_speed_ms"), rotation_frames(settings))
}

impl AlbumArtTheme {
    pub fn new(now_playing: NowPlaying, clock: SharedClock, store: Arc<StateStore>) -> Self {
        let settings = SettingsCell::new(schema());
        let velocity = rotation_velocity(&settings.load());
        Self {
            settings,
            now_playing,
            clock,
            store,
            rotation: Mutex::new(RotationPhase::stopped(velocity)),
            cache: Mutex::new(None),
        }
    }

    fn rotation(&self) -> MutexGuard<'_, RotationPhase> {
        self.rotation.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn rotation_snapshot(&self) -> RotationSnapshot {
        self.rotation().snapshot(self.clock.now_ms())
    }

    fn persist_rotation(&self, phase: &RotationPhase, now_ms: u64) {
        self.store.save_rotation(phase.snapshot(now_ms));
    }

    /// Processed cover for the current track, from cache when possible.
    fn art_frame(&self, settings: &ResolvedSettings) -> Option<PixelFrame> {
        let art = self.now_playing.get().album_art.clone()?;
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.as_ref().filter(|c| Arc::ptr_eq(&c.art, &art)) {
            return Some(cached.frame.clone());
        }
        let frame = process_album_art(&art, settings.number("brightness"), settings.toggle("contrast"));
        *cache = Some(CachedArt {
            art,
            frame: frame.clone(),
        });
        Some(frame)
    }

    /// Rotation switched on: pick up the persisted phase, then follow
    /// playback.
    fn start_rotation(&self, settings: &ResolvedSettings, now_ms: u64) {
        let velocity = rotation_velocity(settings);
        let mut phase = match self.store.rotation() {
            Some(snapshot) => RotationPhase::restore(snapshot, velocity, now_ms),
            None => {
                let mut phase = RotationPhase::stopped(velocity);
                phase.start(now_ms);
                phase
            }
        };
        if self.now_playing.get().is_playing {
            phase.resume(now_ms);
        } else {
            phase.pause(now_ms);
        }
        tracing::debug!("Album art rotation on at {:.1}°", phase.current_angle(now_ms));
        self.persist_rotation(&phase, now_ms);
        *self.rotation() = phase;
    }
}

impl Theme for AlbumArtTheme {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "Album Art"
    }

    fn frame_count(&self) -> usize {
        let settings = self.settings.load();
        if settings.toggle("rotation") {
            rotation_frames(&settings)
        } else {
            1
        }
    }

    fn generate_frame(&self, index: i64) -> Result<PixelFrame, FrameError> {
        let settings = self.settings.load();
        let frame_count = if settings.toggle("rotation") {
            rotation_frames(&settings)
        } else {
            1
        };
        check_index(index, frame_count)?;

        let Some(frame) = self.art_frame(&settings) else {
            return Ok(apply_to_frame(music_note(), FALLBACK_BRIGHTNESS));
        };
        if !settings.toggle("rotation") {
            return Ok(frame);
        }
        let angle = self.rotation().current_angle(self.clock.now_ms());
        Ok(rotate(&frame, angle))
    }

    fn frame_interval_ms(&self) -> Option<u64> {
        let settings = self.settings.load();
        settings
            .toggle("rotation")
            .then(|| settings.number("rotation_speed_ms").round() as u64)
    }

    fn on_playback_changed(&self, is_playing: bool) {
        if !self.settings.load().toggle("rotation") {
            return;
        }
        let now = self.clock.now_ms();
        let mut phase = self.rotation();
        let changed = if is_playing {
            phase.resume(now)
        } else {
            phase.pause(now)
        };
        if changed {
            self.persist_rotation(&phase, now);
        }
    }

    fn settings_provider(&self) -> Option<&dyn SettingsProvider> {
        Some(self)
    }
}

impl SettingsProvider for AlbumArtTheme {
    fn schema(&self) -> &SettingsSchema {
        self.settings.schema()
    }

    fn current(&self) -> Arc<ResolvedSettings> {
        self.settings.load()
    }

    fn apply(&self, values: &SettingValues) -> Arc<ResolvedSettings> {
        let (previous, next) = self.settings.apply(values);
        let changed = next.changed_keys(&previous);

        if changed.iter().any(|k| *k == "brightness" || *k == "contrast") {
            *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
        }

        let now = self.clock.now_ms();
        if changed.contains(&"rotation") {
            if next.toggle("rotation") {
                self.start_rotation(&next, now);
            } else {
                let mut phase = self.rotation();
                phase.stop();
                self.persist_rotation(&phase, now);
            }
        } else if changed
            .iter()
            .any(|k| *k == "rotation_speed_ms" || *k == "rotation_smoothness")
        {
            self.rotation().set_velocity(rotation_velocity(&next), now);
        }

        next
    }
}

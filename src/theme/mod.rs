//! Theme engine: the animations a Glyph Matrix can cycle through.
//!
//! Every theme implements [`Theme`], a frame cycle of `frame_count()` frames.
//! Two optional capabilities sit on top and are discovered at runtime:
//!
//! - [`SettingsProvider`]: publishes a [`SettingsSchema`] and accepts values
//! - [`AudioReactive`]: consumes one [`AudioSignal`] per tick
//!
//! Themes are shared between the render loop and the HTTP surface, so every
//! method takes `&self`. Settings are held as whole immutable values that
//! are swapped on apply (see [`SettingsCell`]); a frame tick racing an apply
//! sees either the old settings or the new ones, never a mix.
//!
//! ## Rust concepts
//! - Trait objects with optional capability accessors
//!   (`fn settings_provider(&self) -> Option<&dyn SettingsProvider>`)
//! - Default trait methods for behavior most themes share
//! - `arc_swap::ArcSwap` for replace-whole-value settings

pub mod album_art;
pub mod pulse;
pub mod ripple;
pub mod rotation;
pub mod settings;
pub mod spectrum;

use crate::audio::AudioSignal;
use crate::brightness::FULL;
use crate::clock::SharedClock;
use crate::error::FrameError;
use crate::geometry::PixelFrame;
use crate::media_session::NowPlaying;
use crate::patterns::{StateFrame, state_pattern};
use crate::store::StateStore;
use arc_swap::ArcSwap;
use serde::Serialize;
use settings::{ResolvedSettings, SettingValues, SettingsSchema};
use std::sync::{Arc, Mutex};

// ── Traits ───────────────────────────────────────────────────────────

pub trait Theme: Send + Sync {
    /// Stable identifier, used as the persistence key.
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// Frames in one cycle. May change when settings change.
    fn frame_count(&self) -> usize;

    /// Frame `index` of the cycle. Fails unless `0 <= index < frame_count()`.
    fn generate_frame(&self, index: i64) -> Result<PixelFrame, FrameError>;

    /// Brightness level (0-255) the render path applies to every frame
    /// through [`crate::brightness::final_brightness`].
    fn brightness(&self) -> i32 {
        FULL
    }

    /// Preferred delay between frames, if the theme has one.
    fn frame_interval_ms(&self) -> Option<u64> {
        None
    }

    fn state_frame(&self, state: StateFrame) -> PixelFrame {
        state_pattern(state).clone()
    }

    /// The frame a static preview should show.
    fn preview_frame_index(&self) -> usize {
        0
    }

    fn on_playback_changed(&self, _is_playing: bool) {}

    fn settings_provider(&self) -> Option<&dyn SettingsProvider> {
        None
    }

    fn audio_reactive(&self) -> Option<&dyn AudioReactive> {
        None
    }
}

pub trait SettingsProvider: Send + Sync {
    fn schema(&self) -> &SettingsSchema;

    fn current(&self) -> Arc<ResolvedSettings>;

    /// Merge `values` into the current settings and return the result.
    /// Numbers are clamped and unknown keys ignored.
    fn apply(&self, values: &SettingValues) -> Arc<ResolvedSettings>;
}

pub trait AudioReactive: Send + Sync {
    fn update_audio(&self, signal: AudioSignal);
}

/// Validate a frame index against a frame count.
pub fn check_index(index: i64, frame_count: usize) -> Result<usize, FrameError> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < frame_count)
        .ok_or(FrameError::IndexOutOfRange { index, frame_count })
}

// ── Settings storage ─────────────────────────────────────────────────

/// A schema plus its current values, replaced whole on every apply.
pub struct SettingsCell {
    schema: SettingsSchema,
    current: ArcSwap<ResolvedSettings>,
}

impl SettingsCell {
    pub fn new(schema: SettingsSchema) -> Self {
        let current = ArcSwap::from_pointee(schema.defaults());
        Self { schema, current }
    }

    pub fn schema(&self) -> &SettingsSchema {
        &self.schema
    }

    pub fn load(&self) -> Arc<ResolvedSettings> {
        self.current.load_full()
    }

    /// Apply a patch. Returns `(previous, next)`.
    pub fn apply(&self, patch: &SettingValues) -> (Arc<ResolvedSettings>, Arc<ResolvedSettings>) {
        let previous = self.current.load_full();
        let next = Arc::new(self.schema.apply(&previous, patch));
        self.current.store(next.clone());
        (previous, next)
    }
}

/// Dropdown choice → frame count, shared by themes whose cycle length is a
/// setting.
pub(crate) fn frames_for_choice(choice: &str, table: &[(&str, usize)], fallback: usize) -> usize {
    table
        .iter()
        .find(|(name, _)| *name == choice)
        .map(|(_, frames)| *frames)
        .unwrap_or(fallback)
}

// ── Repository ───────────────────────────────────────────────────────

/// What the theme list endpoint reports for each theme.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct ThemeSummary {
    pub id: String,
    pub name: String,
    pub frame_count: usize,
    pub has_settings: bool,
    pub audio_reactive: bool,
    pub selected: bool,
}

/// The installed themes and which one is selected.
///
/// One instance is built at startup and shared by `Arc`. Settings and the
/// selection are written through to the [`StateStore`].
pub struct ThemeRepository {
    themes: Vec<Arc<dyn Theme>>,
    selected: Mutex<String>,
    store: Arc<StateStore>,
}

impl ThemeRepository {
    /// Register `themes` in display order and restore persisted settings.
    pub fn new(themes: Vec<Arc<dyn Theme>>, store: Arc<StateStore>) -> Self {
        for theme in &themes {
            let Some(provider) = theme.settings_provider() else {
                continue;
            };
            if let Some(saved) = store.theme_settings(theme.id()) {
                provider.apply(&saved);
                tracing::debug!("Restored settings for theme {}", theme.id());
            }
        }

        let selected = store
            .selected_theme()
            .filter(|id| themes.iter().any(|t| t.id() == id))
            .or_else(|| themes.first().map(|t| t.id().to_string()))
            .unwrap_or_default();

        Self {
            themes,
            selected: Mutex::new(selected),
            store,
        }
    }

    /// The built-in themes, album art first.
    pub fn with_builtin_themes(now_playing: NowPlaying, clock: SharedClock, store: Arc<StateStore>) -> Self {
        let themes: Vec<Arc<dyn Theme>> = vec![
            Arc::new(album_art::AlbumArtTheme::new(now_playing, clock.clone(), store.clone())),
            Arc::new(pulse::PulseTheme::new()),
            Arc::new(spectrum::SpectrumTheme::new()),
            Arc::new(ripple::RippleTheme::new()),
        ];
        Self::new(themes, store)
    }

    pub fn themes(&self) -> &[Arc<dyn Theme>] {
        &self.themes
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Theme>> {
        self.themes.iter().find(|t| t.id() == id).cloned()
    }

    pub fn selected_id(&self) -> String {
        self.selected.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn selected(&self) -> Option<Arc<dyn Theme>> {
        self.get(&self.selected_id())
    }

    /// Select a theme by id. Returns `false` for unknown ids.
    pub fn select(&self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        *self.selected.lock().unwrap_or_else(|e| e.into_inner()) = id.to_string();
        self.store.save_selected_theme(id);
        tracing::info!("Selected theme {}", id);
        true
    }

    /// Apply and persist settings for a theme. `None` if the theme is
    /// unknown or has no settings.
    pub fn apply_settings(&self, id: &str, values: &SettingValues) -> Option<Arc<ResolvedSettings>> {
        let theme = self.get(id)?;
        let resolved = theme.settings_provider()?.apply(values);
        self.store.save_theme_settings(id, resolved.values().clone());
        Some(resolved)
    }

    pub fn summaries(&self) -> Vec<ThemeSummary> {
        let selected = self.selected_id();
        self.themes
            .iter()
            .map(|t| ThemeSummary {
                id: t.id().to_string(),
                name: t.name().to_string(),
                frame_count: t.frame_count(),
                has_settings: t.settings_provider().is_some(),
                audio_reactive: t.audio_reactive().is_some(),
                selected: t.id() == selected,
            })
            .collect()
    }
}

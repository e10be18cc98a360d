//! Render loop: ticks the selected theme and hands frames to the display.
//!
//! One [`Renderer`] runs for the whole process on a tokio task. Every tick it
//! reads the selected theme and the latest media snapshot, feeds the audio
//! signal to audio-reactive themes, picks a frame, applies the theme's
//! brightness, and then:
//!
//! - publishes it on a `watch` channel for previews (always)
//! - pushes it to the hardware [`GlyphSink`] (only while one is attached)
//!
//! The hardware sink comes and goes with the auto-start orchestrator through
//! [`RenderService`], which implements [`DisplayService`] by sending
//! [`RenderCommand`]s to the loop.
//!
//! ## Rust concepts
//! - `tokio::sync::mpsc` for commands, `tokio::sync::watch` for "latest frame"
//! - `tokio::select!` over commands, cancellation and the frame timer
//! - `enum` variants that carry owned trait objects (`Box<dyn GlyphSink>`)
//! - `Arc<Mutex<T>>` for status shared with the HTTP handlers

use crate::audio::{AudioSignalGenerator, SignalSource};
use crate::auto_start::DisplayService;
use crate::brightness::apply_to_frame;
use crate::clock::SharedClock;
use crate::error::{ServiceError, SinkError};
use crate::geometry::PixelFrame;
use crate::media_session::NowPlaying;
use crate::patterns::{StateFrame, state_pattern};
use crate::theme::ThemeRepository;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 100;

// ── Sinks ────────────────────────────────────────────────────────────

/// The hardware side: accepts one 625-value intensity array per update.
pub trait GlyphSink: Send {
    fn push(&mut self, intensities: &[i32]) -> Result<(), SinkError>;
}

/// Keeps every pushed frame. Used by tests and the preview demo.
#[derive(Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<Vec<i32>>>>,
}

impl MemorySink {
    pub fn frames(&self) -> Vec<Vec<i32>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl GlyphSink for MemorySink {
    fn push(&mut self, intensities: &[i32]) -> Result<(), SinkError> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(intensities.to_vec());
        Ok(())
    }
}

/// Stand-in for real hardware on hosts without a Glyph Matrix: logs a
/// summary of each frame at `trace` level.
#[derive(Debug, Default)]
pub struct TracingSink {
    pushed: u64,
}

impl GlyphSink for TracingSink {
    fn push(&mut self, intensities: &[i32]) -> Result<(), SinkError> {
        self.pushed += 1;
        let lit = intensities.iter().filter(|&&v| v > 0).count();
        tracing::trace!("Glyph frame {}: {} cells lit", self.pushed, lit);
        Ok(())
    }
}

// ── Commands ─────────────────────────────────────────────────────────

/// Commands sent to the render loop.
pub enum RenderCommand {
    /// Hold a state frame instead of cycling
    ShowState(StateFrame),
    /// Go back to cycling the theme
    Resume,
    /// Start pushing frames to a hardware sink on behalf of `package`
    AttachSink {
        package: String,
        sink: Box<dyn GlyphSink>,
    },
    /// Stop pushing to the hardware sink and blank it
    DetachSink,
}

// ── Status ───────────────────────────────────────────────────────────

/// What the render loop is currently doing, for the status endpoint.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct DisplayStatus {
    /// Theme being rendered
    pub theme_id: Option<String>,
    /// Index of the last rendered frame in the theme's cycle
    pub frame_index: usize,
    /// Frames in the current cycle
    pub frame_count: usize,
    /// State frame on display instead of the cycle, if any
    pub state_frame: Option<StateFrame>,
    /// Theme brightness applied to the last frame (0-255)
    pub brightness: i32,
    /// Package the hardware display is bound for
    pub hardware_package: Option<String>,
    /// Where the audio signal came from on the last tick
    pub audio_source: SignalSource,
    pub frames_rendered: u64,
    pub version: String,
}

impl Default for DisplayStatus {
    fn default() -> Self {
        Self {
            theme_id: None,
            frame_index: 0,
            frame_count: 0,
            state_frame: None,
            brightness: 0,
            hardware_package: None,
            audio_source: SignalSource::Silent,
            frames_rendered: 0,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The latest frame, as previews see it. Brightness is already applied.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct PublishedFrame {
    pub theme_id: Option<String>,
    pub index: usize,
    pub state_frame: Option<StateFrame>,
    #[schema(value_type = Vec<u8>)]
    pub pixels: PixelFrame,
}

impl Default for PublishedFrame {
    fn default() -> Self {
        Self {
            theme_id: None,
            index: 0,
            state_frame: None,
            pixels: PixelFrame::blank(),
        }
    }
}

pub fn frame_channel() -> (watch::Sender<PublishedFrame>, watch::Receiver<PublishedFrame>) {
    watch::channel(PublishedFrame::default())
}

// ── Renderer ─────────────────────────────────────────────────────────

pub struct Renderer {
    themes: Arc<ThemeRepository>,
    now_playing: NowPlaying,
    audio: AudioSignalGenerator,
    clock: SharedClock,
    status: Arc<Mutex<DisplayStatus>>,
    frames: watch::Sender<PublishedFrame>,
    default_interval_ms: u64,

    sink: Option<(String, Box<dyn GlyphSink>)>,
    sink_failing: bool,
    theme_id: Option<String>,
    index: usize,
    held_state: Option<StateFrame>,
    last_playing: Option<bool>,
}

impl Renderer {
    pub fn new(
        themes: Arc<ThemeRepository>,
        now_playing: NowPlaying,
        audio: AudioSignalGenerator,
        clock: SharedClock,
        status: Arc<Mutex<DisplayStatus>>,
        frames: watch::Sender<PublishedFrame>,
    ) -> Self {
        Self {
            themes,
            now_playing,
            audio,
            clock,
            status,
            frames,
            default_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            sink: None,
            sink_failing: false,
            theme_id: None,
            index: 0,
            held_state: None,
            last_playing: None,
        }
    }

    /// Fallback delay between frames for themes without their own.
    pub fn with_frame_interval(mut self, interval_ms: u64) -> Self {
        self.default_interval_ms = interval_ms.max(1);
        self
    }

    fn status(&self) -> MutexGuard<'_, DisplayStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn handle(&mut self, command: RenderCommand) {
        match command {
            RenderCommand::ShowState(state) => {
                tracing::info!("Holding state frame {:?}", state);
                self.held_state = Some(state);
            }
            RenderCommand::Resume => {
                tracing::info!("Resuming theme cycle");
                self.held_state = None;
            }
            RenderCommand::AttachSink { package, sink } => {
                tracing::info!("Hardware display attached for {}", package);
                let loading = match self.themes.selected() {
                    Some(theme) => apply_to_frame(&theme.state_frame(StateFrame::Loading), theme.brightness()),
                    None => state_pattern(StateFrame::Loading).clone(),
                };
                self.status().hardware_package = Some(package.clone());
                self.sink = Some((package, sink));
                self.sink_failing = false;
                self.push_to_sink(&loading);
            }
            RenderCommand::DetachSink => {
                if let Some((package, mut sink)) = self.sink.take() {
                    if let Err(e) = sink.push(&PixelFrame::blank().to_intensities()) {
                        tracing::warn!("Blanking hardware display failed: {}", e);
                    }
                    tracing::info!("Hardware display released (was {})", package);
                }
                self.status().hardware_package = None;
            }
        }
    }

    fn push_to_sink(&mut self, frame: &PixelFrame) {
        let Some((package, sink)) = self.sink.as_mut() else {
            return;
        };
        match sink.push(&frame.to_intensities()) {
            Ok(()) => {
                if self.sink_failing {
                    tracing::info!("Hardware display accepting frames again");
                    self.sink_failing = false;
                }
            }
            Err(SinkError::Closed) => {
                tracing::error!("Hardware display for {} closed, detaching", package);
                self.sink = None;
                self.status().hardware_package = None;
            }
            Err(e) => {
                if !self.sink_failing {
                    tracing::warn!("{}", e);
                    self.sink_failing = true;
                }
            }
        }
    }

    /// Render one frame. Returns how long to wait before the next one.
    pub fn tick(&mut self) -> Duration {
        let now = self.clock.now_ms();
        let Some(theme) = self.themes.selected() else {
            let frame = state_pattern(StateFrame::Error).clone();
            self.push_to_sink(&frame);
            self.publish(None, 0, 0, Some(StateFrame::Error), 0, frame);
            return Duration::from_millis(self.default_interval_ms);
        };

        if self.theme_id.as_deref() != Some(theme.id()) {
            tracing::info!("Rendering theme {}", theme.id());
            self.theme_id = Some(theme.id().to_string());
            self.index = 0;
            self.last_playing = None;
        }

        let media = self.now_playing.get();
        if self.last_playing != Some(media.is_playing) {
            theme.on_playback_changed(media.is_playing);
            self.last_playing = Some(media.is_playing);
        }

        let progress = media.progress.filter(|_| media.has_active_media);
        let signal = self.audio.sample(now, progress.as_ref());
        if let Some(reactive) = theme.audio_reactive() {
            reactive.update_audio(signal);
        }

        let frame_count = theme.frame_count();
        if self.index >= frame_count {
            self.index = 0;
        }

        let paused = media.has_active_media && !media.is_playing;
        let state = self.held_state.or(paused.then_some(StateFrame::Paused));
        let (base, state) = match state {
            Some(state) => (theme.state_frame(state), Some(state)),
            None => match theme.generate_frame(self.index as i64) {
                Ok(frame) => (frame, None),
                Err(e) => {
                    tracing::error!("Theme {} failed: {}", theme.id(), e);
                    (theme.state_frame(StateFrame::Error), Some(StateFrame::Error))
                }
            },
        };

        let brightness = theme.brightness();
        let frame = apply_to_frame(&base, brightness);
        self.push_to_sink(&frame);
        let index = self.index;
        self.publish(Some(theme.id()), index, frame_count, state, brightness, frame);

        if state.is_none() {
            self.index = (self.index + 1) % frame_count.max(1);
        }
        Duration::from_millis(theme.frame_interval_ms().unwrap_or(self.default_interval_ms))
    }

    fn publish(
        &mut self,
        theme_id: Option<&str>,
        index: usize,
        frame_count: usize,
        state_frame: Option<StateFrame>,
        brightness: i32,
        pixels: PixelFrame,
    ) {
        let audio_source = self.audio.last_source();
        {
            let mut status = self.status();
            status.theme_id = theme_id.map(str::to_string);
            status.frame_index = index;
            status.frame_count = frame_count;
            status.state_frame = state_frame;
            status.brightness = brightness;
            status.audio_source = audio_source;
            status.frames_rendered += 1;
        }
        self.frames.send_replace(PublishedFrame {
            theme_id: theme_id.map(str::to_string),
            index,
            state_frame,
            pixels,
        });
    }

    /// Tick until `token` is cancelled or every command sender is gone.
    ///
    /// Cancellation is checked before every frame, so a cancelled loop
    /// never renders again.
    pub async fn run(mut self, mut commands: mpsc::Receiver<RenderCommand>, token: CancellationToken) {
        tracing::info!("Render loop started");
        loop {
            if token.is_cancelled() {
                break;
            }
            let delay = self.tick();

            tokio::select! {
                _ = token.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        tracing::info!("Render loop: channel closed, shutting down.");
                        break;
                    }
                },
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.handle(RenderCommand::DetachSink);
        tracing::info!("Render loop stopped");
    }
}

// ── Display service ──────────────────────────────────────────────────

/// Opens the hardware sink for a bind.
pub type SinkConnector = Box<dyn FnMut(&str) -> Result<Box<dyn GlyphSink>, ServiceError> + Send>;

/// [`DisplayService`] backed by the render loop: binding attaches a sink,
/// unbinding detaches it.
pub struct RenderService {
    commands: mpsc::Sender<RenderCommand>,
    connect: SinkConnector,
}

impl RenderService {
    pub fn new(commands: mpsc::Sender<RenderCommand>, connect: SinkConnector) -> Self {
        Self { commands, connect }
    }
}

impl DisplayService for RenderService {
    fn bind(&mut self, package: &str) -> Result<(), ServiceError> {
        let sink = (self.connect)(package)?;
        self.commands
            .try_send(RenderCommand::AttachSink {
                package: package.to_string(),
                sink,
            })
            .map_err(|e| ServiceError::Bind(e.to_string()))
    }

    fn unbind(&mut self) -> Result<(), ServiceError> {
        self.commands
            .try_send(RenderCommand::DetachSink)
            .map_err(|e| ServiceError::Unbind(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::FrameError;
    use crate::geometry::PIXEL_COUNT;
    use crate::media_session::MediaSessionSnapshot;
    use crate::store::StateStore;
    use crate::theme::settings::{SettingValue, SettingValues};
    use crate::theme::{AudioReactive, Theme, ripple};
    use pretty_assertions::assert_eq;

    struct Fixture {
        renderer: Renderer,
        now_playing: NowPlaying,
        themes: Arc<ThemeRepository>,
        status: Arc<Mutex<DisplayStatus>>,
        frames: watch::Receiver<PublishedFrame>,
    }

    fn fixture_with(themes: ThemeRepository) -> Fixture {
        let now_playing = NowPlaying::default();
        let themes = Arc::new(themes);
        let status = Arc::new(Mutex::new(DisplayStatus::default()));
        let (tx, rx) = frame_channel();
        let renderer = Renderer::new(
            themes.clone(),
            now_playing.clone(),
            AudioSignalGenerator::new(None),
            Arc::new(ManualClock::new(0)),
            status.clone(),
            tx,
        );
        Fixture {
            renderer,
            now_playing,
            themes,
            status,
            frames: rx,
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(StateStore::in_memory());
        let themes = ThemeRepository::with_builtin_themes(
            NowPlaying::default(),
            Arc::new(ManualClock::new(0)),
            store,
        );
        themes.select(ripple::ID);
        fixture_with(themes)
    }

    fn set_playing(now_playing: &NowPlaying, is_playing: bool) {
        now_playing.set(MediaSessionSnapshot {
            is_playing,
            has_active_media: true,
            ..MediaSessionSnapshot::default()
        });
    }

    /// Records hook calls and can be told to fail.
    #[derive(Default)]
    struct ScriptedTheme {
        playback: Mutex<Vec<bool>>,
        audio: Mutex<u32>,
        broken: bool,
    }

    impl Theme for ScriptedTheme {
        fn id(&self) -> &'static str {
            "scripted"
        }

        fn name(&self) -> &'static str {
            "Scripted"
        }

        fn frame_count(&self) -> usize {
            3
        }

        fn generate_frame(&self, index: i64) -> Result<PixelFrame, FrameError> {
            if self.broken {
                return Err(FrameError::IndexOutOfRange {
                    index,
                    frame_count: 0,
                });
            }
            crate::theme::check_index(index, 3)?;
            Ok(PixelFrame::from_fn(|_, _| 200))
        }

        fn brightness(&self) -> i32 {
            128
        }

        fn on_playback_changed(&self, is_playing: bool) {
            self.playback.lock().unwrap().push(is_playing);
        }

        fn audio_reactive(&self) -> Option<&dyn AudioReactive> {
            Some(self)
        }
    }

    impl AudioReactive for ScriptedTheme {
        fn update_audio(&self, _signal: crate::audio::AudioSignal) {
            *self.audio.lock().unwrap() += 1;
        }
    }

    fn scripted_fixture(scripted: Arc<ScriptedTheme>) -> Fixture {
        let themes = ThemeRepository::new(vec![scripted], Arc::new(StateStore::in_memory()));
        fixture_with(themes)
    }

    #[test]
    fn cycles_and_wraps_the_selected_theme() {
        let mut f = fixture();
        let mut values = SettingValues::new();
        values.insert("speed".into(), SettingValue::Choice("fast".into()));
        f.themes.apply_settings(ripple::ID, &values);

        let mut indices = Vec::new();
        for _ in 0..22 {
            f.renderer.tick();
            indices.push(f.frames.borrow().index);
        }
        assert_eq!(&indices[..3], &[0, 1, 2]);
        assert_eq!(indices[19], 19);
        assert_eq!(indices[20], 0);
        assert_eq!(f.status.lock().unwrap().frame_count, 20);
        assert_eq!(f.status.lock().unwrap().frames_rendered, 22);
    }

    #[test]
    fn published_frames_carry_theme_brightness() {
        let scripted = Arc::new(ScriptedTheme::default());
        let mut f = scripted_fixture(scripted);
        f.renderer.tick();
        let frame = f.frames.borrow().pixels.clone();
        // final_brightness(200, 128) == round(200 * 128 / 255) == 100
        assert_eq!(frame.get(12, 12), 100);
        assert_eq!(f.status.lock().unwrap().brightness, 128);
    }

    #[test]
    fn paused_media_shows_paused_frame() {
        let mut f = fixture();
        set_playing(&f.now_playing, false);
        f.renderer.tick();
        f.renderer.tick();
        let published = f.frames.borrow().clone();
        assert_eq!(published.state_frame, Some(StateFrame::Paused));
        // Cycle does not advance while a state frame is shown
        assert_eq!(published.index, 0);
    }

    #[test]
    fn held_state_overrides_until_resume() {
        let mut f = fixture();
        f.renderer.handle(RenderCommand::ShowState(StateFrame::Offline));
        f.renderer.tick();
        assert_eq!(f.frames.borrow().state_frame, Some(StateFrame::Offline));

        f.renderer.handle(RenderCommand::Resume);
        f.renderer.tick();
        assert_eq!(f.frames.borrow().state_frame, None);
    }

    #[test]
    fn failing_theme_shows_error_frame() {
        let scripted = Arc::new(ScriptedTheme {
            broken: true,
            ..ScriptedTheme::default()
        });
        let mut f = scripted_fixture(scripted);
        f.renderer.tick();
        assert_eq!(f.frames.borrow().state_frame, Some(StateFrame::Error));
    }

    #[test]
    fn playback_hook_fires_on_change_only() {
        let scripted = Arc::new(ScriptedTheme::default());
        let mut f = scripted_fixture(scripted.clone());
        set_playing(&f.now_playing, true);
        for _ in 0..3 {
            f.renderer.tick();
        }
        set_playing(&f.now_playing, false);
        f.renderer.tick();
        f.renderer.tick();

        assert_eq!(*scripted.playback.lock().unwrap(), vec![true, false]);
        assert_eq!(*scripted.audio.lock().unwrap(), 5);
    }

    #[test]
    fn sink_sees_loading_then_frames_then_blank() {
        let mut f = fixture();
        let sink = MemorySink::default();
        f.renderer.handle(RenderCommand::AttachSink {
            package: "app.a".into(),
            sink: Box::new(sink.clone()),
        });
        assert_eq!(
            f.status.lock().unwrap().hardware_package.as_deref(),
            Some("app.a")
        );
        f.renderer.tick();
        f.renderer.handle(RenderCommand::DetachSink);
        f.renderer.tick();

        let frames = sink.frames();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == PIXEL_COUNT));
        assert!(frames[1].iter().any(|&v| v > 0));
        assert!(frames[2].iter().all(|&v| v == 0));
        assert_eq!(f.status.lock().unwrap().hardware_package, None);
    }

    struct ClosedSink;

    impl GlyphSink for ClosedSink {
        fn push(&mut self, _intensities: &[i32]) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    #[test]
    fn closed_sink_is_detached() {
        let mut f = fixture();
        f.renderer.handle(RenderCommand::AttachSink {
            package: "app.a".into(),
            sink: Box::new(ClosedSink),
        });
        assert_eq!(f.status.lock().unwrap().hardware_package, None);
        // Rendering carries on for previews
        f.renderer.tick();
        assert_eq!(f.status.lock().unwrap().frames_rendered, 1);
    }

    #[test]
    fn theme_interval_overrides_default() {
        let mut f = fixture();
        assert_eq!(f.renderer.tick(), Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS));

        let store = Arc::new(StateStore::in_memory());
        let themes = ThemeRepository::with_builtin_themes(
            NowPlaying::default(),
            Arc::new(ManualClock::new(0)),
            store,
        );
        let mut values = SettingValues::new();
        values.insert("rotation".into(), SettingValue::Bool(true));
        values.insert("rotation_speed_ms".into(), SettingValue::Number(250.0));
        themes.apply_settings("album_art", &values);
        let mut f = fixture_with(themes).renderer.with_frame_interval(40);
        assert_eq!(f.tick(), Duration::from_millis(250));
    }

    #[test]
    fn render_service_translates_bind_and_unbind() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut service = RenderService::new(
            tx,
            Box::new(|_: &str| Ok(Box::new(MemorySink::default()) as Box<dyn GlyphSink>)),
        );

        service.bind("app.a").unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(RenderCommand::AttachSink { package, .. }) if package == "app.a"
        ));
        service.unbind().unwrap();
        assert!(matches!(rx.try_recv(), Ok(RenderCommand::DetachSink)));
    }

    #[test]
    fn render_service_reports_connect_failure() {
        let (tx, _rx) = mpsc::channel(4);
        let mut service = RenderService::new(
            tx,
            Box::new(|_: &str| -> Result<Box<dyn GlyphSink>, ServiceError> {
                Err(ServiceError::Bind("no device".into()))
            }),
        );
        assert_eq!(
            service.bind("app.a").err(),
            Some(ServiceError::Bind("no device".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel_and_blanks_sink() {
        let f = fixture();
        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let handle = tokio::spawn(f.renderer.run(rx, token.clone()));

        let sink = MemorySink::default();
        tx.send(RenderCommand::AttachSink {
            package: "app.a".into(),
            sink: Box::new(sink.clone()),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(550)).await;
        token.cancel();
        handle.await.unwrap();

        let frames = sink.frames();
        assert!(frames.len() >= 3);
        assert!(frames.last().unwrap().iter().all(|&v| v == 0));
        assert!(f.status.lock().unwrap().frames_rendered >= 5);
    }
}

//! Wires the engine together and spawns its long-lived tasks.
//!
//! ```text
//!  SessionManager ──poll──► MediaSessionObserver ──events──► AutoStartDriver
//!                                 │ NowPlaying                    │ bind/unbind
//!                                 ▼                               ▼
//!  ThemeRepository ◄──select── Renderer ◄──RenderCommand── RenderService
//!                                 │ watch<PublishedFrame>
//!                                 ▼
//!                           HTTP previews, GlyphSink
//! ```
//!
//! Every task takes the same [`CancellationToken`]; cancelling it stops all
//! of them and releases the hardware display.
//!
//! ## Rust concepts
//! - `tokio::spawn` returns `JoinHandle`s that `join` awaits at shutdown
//! - Trait objects (`Arc<dyn SessionManager>`, `Box<dyn AudioTap>`) as the
//!   platform seams, so tests and other hosts plug in their own

use crate::audio::{AudioSignalGenerator, AudioTap};
use crate::auto_start::{
    AutoStartConfig, AutoStartDriver, AutoStartOrchestrator, AutoStartState, DEFAULT_ENABLED,
};
use crate::clock::SharedClock;
use crate::media_session::{MediaSessionObserver, NowPlaying, SessionManager, run_poll_loop};
use crate::render::{
    DEFAULT_FRAME_INTERVAL_MS, DisplayStatus, RenderService, Renderer, SinkConnector, frame_channel,
};
use crate::server::AppState;
use crate::shake::{EngineShakeTarget, run_shake_loop};
use crate::store::StateStore;
use crate::theme::ThemeRepository;
use crate::whitelist::Whitelist;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2_000);

/// Timing knobs and startup choices.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Delay between frames for themes without their own interval
    pub frame_interval_ms: u64,
    /// Backstop polling period of the media-session observer
    pub poll_interval: Duration,
    pub auto_start: AutoStartConfig,
    /// JSON state file; in-memory when `None`
    pub state_file: Option<PathBuf>,
    /// Theme to select at startup, overriding the saved selection
    pub initial_theme: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            auto_start: AutoStartConfig::default(),
            state_file: None,
            initial_theme: None,
        }
    }
}

/// The platform pieces the engine runs on.
pub struct Platform {
    pub sessions: Arc<dyn SessionManager>,
    pub audio_tap: Option<Box<dyn AudioTap>>,
    /// Opens the hardware display when auto-start binds
    pub connect: SinkConnector,
    pub clock: SharedClock,
}

pub struct Engine {
    state: AppState,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Engine {
    /// Build every component and spawn the render, polling, auto-start and
    /// shake tasks. Must be called inside a tokio runtime.
    pub fn start(config: EngineConfig, platform: Platform, token: CancellationToken) -> Self {
        let Platform {
            sessions,
            audio_tap,
            connect,
            clock,
        } = platform;

        let store = Arc::new(match &config.state_file {
            Some(path) => {
                tracing::info!("State file: {}", path.display());
                StateStore::open(path)
            }
            None => StateStore::in_memory(),
        });

        let now_playing = NowPlaying::default();
        let themes = Arc::new(ThemeRepository::with_builtin_themes(
            now_playing.clone(),
            clock.clone(),
            store.clone(),
        ));
        if let Some(id) = &config.initial_theme {
            if !themes.select(id) {
                tracing::warn!("Unknown theme {}, keeping {}", id, themes.selected_id());
            }
        }

        let observer = Arc::new(Mutex::new(MediaSessionObserver::new(sessions, now_playing.clone())));
        let events = observer.lock().unwrap_or_else(|e| e.into_inner()).subscribe();
        let whitelist = Arc::new(Mutex::new(Whitelist::from_saved(store.whitelist())));
        let mut tasks = Vec::new();

        // Render loop
        let status = Arc::new(Mutex::new(DisplayStatus::default()));
        let (frames_tx, frames) = frame_channel();
        let (render_tx, render_rx) = mpsc::channel(32);
        let renderer = Renderer::new(
            themes.clone(),
            now_playing,
            AudioSignalGenerator::new(audio_tap),
            clock.clone(),
            status.clone(),
            frames_tx,
        )
        .with_frame_interval(config.frame_interval_ms);
        tasks.push(("render", tokio::spawn(renderer.run(render_rx, token.clone()))));

        // Observer polling
        tasks.push((
            "poll",
            tokio::spawn(run_poll_loop(observer.clone(), config.poll_interval, token.clone())),
        ));

        // Auto-start
        let (auto_start_tx, auto_start_rx) = mpsc::channel(16);
        let (state_tx, auto_start_state) = watch::channel(AutoStartState::Idle);
        let enabled = store.auto_start_enabled().unwrap_or(DEFAULT_ENABLED);
        let driver = AutoStartDriver {
            orchestrator: AutoStartOrchestrator::new(config.auto_start, enabled),
            observer: observer.clone(),
            whitelist: whitelist.clone(),
            service: Box::new(RenderService::new(render_tx.clone(), connect)),
            clock,
            state_tx,
            store: store.clone(),
        };
        tasks.push((
            "auto-start",
            tokio::spawn(driver.run(events, auto_start_rx, token.clone())),
        ));

        // Shake gestures
        let (shake_settings, shake_settings_rx) = watch::channel(store.shake().unwrap_or_default());
        let shake_settings = Arc::new(shake_settings);
        let (shake_tx, shake_rx) = mpsc::channel(256);
        let target = EngineShakeTarget {
            observer: observer.clone(),
            auto_start: auto_start_tx.clone(),
        };
        tasks.push((
            "shake",
            tokio::spawn(run_shake_loop(shake_settings_rx, shake_rx, Box::new(target), token)),
        ));

        Self {
            state: AppState {
                themes,
                render_tx,
                status,
                frames,
                whitelist,
                auto_start_tx,
                auto_start_state,
                observer,
                store,
                shake_settings,
                shake_tx,
            },
            tasks,
        }
    }

    /// Handles for the HTTP surface (or any other client).
    pub fn app_state(&self) -> AppState {
        self.state.clone()
    }

    /// Wait for every task to finish. Call after cancelling the token.
    pub async fn join(self) {
        drop(self.state);
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("{} task failed: {}", name, e);
            }
        }
        tracing::info!("Engine stopped");
    }
}

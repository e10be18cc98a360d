//! Media session observer: which app is playing what, and when that changes.
//!
//! The platform session API is reached through the [`SessionManager`]
//! trait. Every poll enumerates the active sessions, picks one, publishes a
//! fresh [`MediaSessionSnapshot`] through [`NowPlaying`], and broadcasts a
//! [`SessionEvent`] only when something actually changed.
//!
//! Two paths trigger a poll:
//! - a low-frequency timer (the backstop)
//! - a push notification from the platform controller, delivered through a
//!   `tokio::sync::Notify` handed to [`SessionManager::register_callback`]
//!
//! ## Rust concepts
//! - Trait objects (`Arc<dyn SessionManager>`) for platform collaborators
//! - `tokio::sync::broadcast` for fan-out to several subscribers
//! - `arc_swap::ArcSwap` for a lock-free "latest value" cell

use crate::audio::PlaybackProgress;
use crate::error::SessionError;
use crate::whitelist::display_name_for;
use arc_swap::ArcSwap;
use image::RgbImage;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::{self, JoinError};
use tokio_util::sync::CancellationToken;

/// Placeholder for missing metadata strings.
pub const UNKNOWN: &str = "Unknown";

// ── Platform-facing types ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
    Buffering,
    Stopped,
    None,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl TrackMetadata {
    fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// One session as the platform reports it.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub package_name: String,
    pub app_name: Option<String>,
    pub state: PlaybackState,
    pub metadata: TrackMetadata,
    pub album_art: Option<Arc<RgbImage>>,
    pub progress: PlaybackProgress,
}

impl SessionInfo {
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransportCommand {
    PlayPause,
    Next,
    Previous,
}

/// The platform media-session API.
pub trait SessionManager: Send + Sync {
    /// Sessions in platform order. Permission problems surface as errors.
    fn active_sessions(&self) -> Result<Vec<SessionInfo>, SessionError>;

    /// Ask the controller of `package` to ping `notify` on state changes.
    ///
    /// Platforms may offer no way to detach a previous registration, so
    /// callers must tolerate stale callbacks; a spurious notify only causes
    /// an extra poll.
    fn register_callback(&self, package: &str, notify: Arc<Notify>) -> Result<(), SessionError>;

    fn send_transport(&self, package: &str, command: TransportCommand)
    -> Result<(), SessionError>;
}

/// A manager with nothing playing. Used when no platform backend is compiled in.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdleSessionManager;

impl SessionManager for IdleSessionManager {
    fn active_sessions(&self) -> Result<Vec<SessionInfo>, SessionError> {
        Ok(Vec::new())
    }

    fn register_callback(&self, _package: &str, _notify: Arc<Notify>) -> Result<(), SessionError> {
        Ok(())
    }

    fn send_transport(&self, package: &str, _command: TransportCommand) -> Result<(), SessionError> {
        Err(SessionError::NoController(package.to_string()))
    }
}

// ── Snapshot and events ──────────────────────────────────────────────

/// What the rest of the engine sees of the selected session.
#[derive(Clone, Debug, Serialize)]
pub struct MediaSessionSnapshot {
    pub package_name: Option<String>,
    pub is_playing: bool,
    pub has_active_media: bool,
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(skip)]
    pub album_art: Option<Arc<RgbImage>>,
    pub progress: Option<PlaybackProgress>,
}

impl Default for MediaSessionSnapshot {
    fn default() -> Self {
        Self {
            package_name: None,
            is_playing: false,
            has_active_media: false,
            title: UNKNOWN.to_string(),
            artist: UNKNOWN.to_string(),
            album: UNKNOWN.to_string(),
            album_art: None,
            progress: None,
        }
    }
}

impl MediaSessionSnapshot {
    fn from_session(session: &SessionInfo) -> Self {
        let text = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(UNKNOWN)
                .to_string()
        };
        Self {
            package_name: Some(session.package_name.clone()),
            is_playing: session.is_playing(),
            has_active_media: true,
            title: text(&session.metadata.title),
            artist: text(&session.metadata.artist),
            album: text(&session.metadata.album),
            album_art: session.album_art.clone(),
            progress: Some(session.progress),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    PlaybackStateChanged {
        is_playing: bool,
        has_active_media: bool,
    },
    ActiveAppChanged {
        package: Option<String>,
        name: String,
    },
}

/// Minimal per-session view used by the auto-start orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub package_name: String,
    pub is_playing: bool,
}

/// Shared, lock-free handle to the latest snapshot.
#[derive(Clone, Default)]
pub struct NowPlaying(Arc<ArcSwap<MediaSessionSnapshot>>);

impl NowPlaying {
    pub fn get(&self) -> Arc<MediaSessionSnapshot> {
        self.0.load_full()
    }

    pub fn set(&self, snapshot: MediaSessionSnapshot) {
        self.0.store(Arc::new(snapshot));
    }
}

/// Pick the session to follow: the first playing one, else the first
/// paused/buffering one that has a title. Untitled paused sessions are
/// skipped so stale empty sessions (podcast apps, for example) don't win.
pub fn select_session(sessions: &[SessionInfo]) -> Option<&SessionInfo> {
    sessions.iter().find(|s| s.is_playing()).or_else(|| {
        sessions.iter().find(|s| {
            matches!(s.state, PlaybackState::Paused | PlaybackState::Buffering)
                && s.metadata.has_title()
        })
    })
}

// ── Observer ─────────────────────────────────────────────────────────

pub struct MediaSessionObserver {
    manager: Arc<dyn SessionManager>,
    now_playing: NowPlaying,
    events: broadcast::Sender<SessionEvent>,
    push: Arc<Notify>,
    last_package: Option<String>,
    last_state: (bool, bool),
    registered_controller: Option<String>,
    sessions: Vec<SessionSummary>,
    last_error: Option<SessionError>,
}

impl MediaSessionObserver {
    pub fn new(manager: Arc<dyn SessionManager>, now_playing: NowPlaying) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            manager,
            now_playing,
            events,
            push: Arc::new(Notify::new()),
            last_package: None,
            last_state: (false, false),
            registered_controller: None,
            sessions: Vec::new(),
            last_error: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Notified by the platform controller callback.
    pub fn push_signal(&self) -> Arc<Notify> {
        self.push.clone()
    }

    pub fn now_playing(&self) -> NowPlaying {
        self.now_playing.clone()
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    pub fn active_package(&self) -> Option<&str> {
        self.last_package.as_deref()
    }

    pub fn manager(&self) -> Arc<dyn SessionManager> {
        self.manager.clone()
    }

    /// Enumerate sessions, publish the snapshot, fire change events.
    pub fn poll(&mut self) -> Arc<MediaSessionSnapshot> {
        let listing = self.manager.active_sessions();
        self.apply(listing)
    }

    /// Publish an enumeration made elsewhere, as [`poll`](Self::poll) does.
    pub fn apply(
        &mut self,
        listing: Result<Vec<SessionInfo>, SessionError>,
    ) -> Arc<MediaSessionSnapshot> {
        let sessions = self.accept(listing);
        self.sessions = sessions
            .iter()
            .map(|s| SessionSummary {
                package_name: s.package_name.clone(),
                is_playing: s.is_playing(),
            })
            .collect();

        let selected = select_session(&sessions);
        let snapshot = selected
            .map(MediaSessionSnapshot::from_session)
            .unwrap_or_default();

        if let Some(session) = selected {
            self.ensure_controller_callback(&session.package_name);
        }

        let app_name = selected
            .and_then(|s| s.app_name.clone())
            .or_else(|| snapshot.package_name.as_deref().map(display_name_for));
        self.diff_and_emit(&snapshot, app_name);

        self.now_playing.set(snapshot);
        self.now_playing.get()
    }

    fn accept(&mut self, listing: Result<Vec<SessionInfo>, SessionError>) -> Vec<SessionInfo> {
        match listing {
            Ok(sessions) => {
                if self.last_error.take().is_some() {
                    tracing::info!("Media session access restored");
                }
                sessions
            }
            Err(e) => {
                if self.last_error.as_ref() != Some(&e) {
                    tracing::warn!("Media sessions unavailable, treating as idle: {}", e);
                    self.last_error = Some(e);
                }
                Vec::new()
            }
        }
    }

    fn ensure_controller_callback(&mut self, package: &str) {
        if self.registered_controller.as_deref() == Some(package) {
            return;
        }
        // The previous controller's callback cannot always be detached. It
        // lives as long as that controller does and only causes extra polls.
        match self.manager.register_callback(package, self.push.clone()) {
            Ok(()) => {
                tracing::debug!("Registered controller callback for {}", package);
                self.registered_controller = Some(package.to_string());
            }
            Err(e) => tracing::warn!("Controller callback for {} failed: {}", package, e),
        }
    }

    fn diff_and_emit(&mut self, snapshot: &MediaSessionSnapshot, app_name: Option<String>) {
        let state = (snapshot.is_playing, snapshot.has_active_media);
        if state != self.last_state {
            tracing::debug!(
                "Playback changed: playing={} active={}",
                snapshot.is_playing,
                snapshot.has_active_media
            );
            self.last_state = state;
            let _ = self.events.send(SessionEvent::PlaybackStateChanged {
                is_playing: state.0,
                has_active_media: state.1,
            });
        }

        if snapshot.package_name != self.last_package {
            tracing::info!(
                "Active media app: {}",
                snapshot.package_name.as_deref().unwrap_or("none")
            );
            self.last_package = snapshot.package_name.clone();
            let _ = self.events.send(SessionEvent::ActiveAppChanged {
                package: snapshot.package_name.clone(),
                name: app_name.unwrap_or_default(),
            });
        }
    }

    /// Package of the followed session, the one transport commands go to.
    pub fn transport_target(&self) -> Result<String, SessionError> {
        self.last_package
            .clone()
            .ok_or_else(|| SessionError::NoController("none".to_string()))
    }

    /// Send a transport command to the followed session.
    pub fn send_transport(&self, command: TransportCommand) -> Result<(), SessionError> {
        let package = self.transport_target()?;
        self.manager.send_transport(&package, command)
    }
}

// ── Off-runtime platform calls ───────────────────────────────────────
//
// Platform session calls can block on IPC and decode album art, so they
// run on tokio's blocking pool. The observer lock is only held to read the
// manager and to publish the result.

fn joined<T>(result: Result<T, JoinError>) -> Result<T, SessionError> {
    result.map_err(|e| SessionError::Unavailable(format!("session worker failed: {e}")))
}

/// [`MediaSessionObserver::poll`] with the enumeration on the blocking pool.
pub async fn poll_off_runtime(
    observer: &Arc<Mutex<MediaSessionObserver>>,
) -> Arc<MediaSessionSnapshot> {
    let manager = observer.lock().unwrap_or_else(|e| e.into_inner()).manager();
    let listing = joined(task::spawn_blocking(move || manager.active_sessions()).await)
        .and_then(|listing| listing);
    observer
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .apply(listing)
}

/// [`MediaSessionObserver::send_transport`] with the platform call on the
/// blocking pool.
pub async fn send_transport_off_runtime(
    observer: &Arc<Mutex<MediaSessionObserver>>,
    command: TransportCommand,
) -> Result<(), SessionError> {
    let (manager, package) = {
        let guard = observer.lock().unwrap_or_else(|e| e.into_inner());
        (guard.manager(), guard.transport_target()?)
    };
    joined(task::spawn_blocking(move || manager.send_transport(&package, command)).await)?
}

/// Poll the observer every `interval`, or sooner when the platform pushes a
/// change. Returns when `token` is cancelled.
pub async fn run_poll_loop(
    observer: Arc<Mutex<MediaSessionObserver>>,
    interval: Duration,
    token: CancellationToken,
) {
    let push = {
        let guard = observer.lock().unwrap_or_else(|e| e.into_inner());
        guard.push_signal()
    };
    tracing::info!("Media session polling every {}ms", interval.as_millis());

    loop {
        if token.is_cancelled() {
            break;
        }

        poll_off_runtime(&observer).await;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = push.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("Media session polling stopped");
}

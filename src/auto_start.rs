//! Auto-start orchestrator: binds the hardware display while a whitelisted
//! app is playing, and releases it when playback ends.
//!
//! ```text
//!        whitelisted app playing            bind ok
//!  Idle ─────────────────────────▶ Binding ─────────▶ Active
//!   ▲                                 │                 │
//!   │           bind failed           │                 │ no media at all (now)
//!   ├─────────────────────────────────┘                 │ stopped for stop_delay
//!   └───────────────────────────────────────────────────┘ de-whitelisted, nothing else playing
//! ```
//!
//! The orchestrator itself is a synchronous state machine. Every input takes
//! the current time and a [`SessionView`] and returns the [`Effect`]s the
//! caller must perform; debounce timers are plain deadlines checked by
//! [`AutoStartOrchestrator::tick`]. [`AutoStartDriver`] wires it to the
//! observer, the whitelist and a [`DisplayService`] on a tokio task.
//!
//! When several whitelisted apps play at once the one already followed
//! keeps the display; otherwise the first in platform session order wins.
//! That order is not guaranteed to be stable.

use crate::clock::SharedClock;
use crate::error::ServiceError;
use crate::media_session::{MediaSessionObserver, SessionEvent, SessionSummary};
use crate::store::StateStore;
use crate::whitelist::Whitelist;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// How often the driver checks debounce deadlines.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Auto-start is on until the user turns it off.
pub const DEFAULT_ENABLED: bool = true;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutoStartConfig {
    /// Delay between "whitelisted app started playing" and binding.
    pub start_delay_ms: u64,
    /// How long playback must stay stopped before unbinding.
    pub stop_delay_ms: u64,
}

impl Default for AutoStartConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: 0,
            stop_delay_ms: 3_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AutoStartState {
    Idle,
    ServiceBinding { package: String },
    ServiceActive { package: String },
}

impl AutoStartState {
    fn package(&self) -> Option<&str> {
        match self {
            AutoStartState::Idle => None,
            AutoStartState::ServiceBinding { package }
            | AutoStartState::ServiceActive { package } => Some(package),
        }
    }
}

/// Side effects the caller must carry out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Bind { package: String },
    Unbind,
}

/// What the orchestrator needs to know about current sessions.
#[derive(Clone, Copy, Debug)]
pub struct SessionView<'a> {
    pub sessions: &'a [SessionSummary],
    pub has_active_media: bool,
}

impl<'a> SessionView<'a> {
    pub fn new(sessions: &'a [SessionSummary], has_active_media: bool) -> Self {
        Self {
            sessions,
            has_active_media,
        }
    }

    fn is_playing(&self, package: &str) -> bool {
        self.sessions
            .iter()
            .any(|s| s.package_name == package && s.is_playing)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingStart {
    package: String,
    due_ms: u64,
}

/// The display service the orchestrator binds and unbinds.
pub trait DisplayService: Send {
    fn bind(&mut self, package: &str) -> Result<(), ServiceError>;
    fn unbind(&mut self) -> Result<(), ServiceError>;
}

pub struct AutoStartOrchestrator {
    config: AutoStartConfig,
    state: AutoStartState,
    enabled: bool,
    pending_start: Option<PendingStart>,
    pending_stop_ms: Option<u64>,
    /// Package whose last bind failed. Not retried until it stops playing
    /// or the whitelist or enable flag changes.
    failed_bind: Option<String>,
}

impl AutoStartOrchestrator {
    pub fn new(config: AutoStartConfig, enabled: bool) -> Self {
        Self {
            config,
            state: AutoStartState::Idle,
            enabled,
            pending_start: None,
            pending_stop_ms: None,
            failed_bind: None,
        }
    }

    pub fn state(&self) -> &AutoStartState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_pending_start(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn has_pending_stop(&self) -> bool {
        self.pending_stop_ms.is_some()
    }

    pub fn failed_bind(&self) -> Option<&str> {
        self.failed_bind.as_deref()
    }

    /// The package to follow: the current one if it is still a valid
    /// choice, else the first whitelisted playing session.
    fn target(&self, view: &SessionView<'_>, whitelist: &Whitelist) -> Option<String> {
        if let Some(current) = self.state.package() {
            if view.is_playing(current) && whitelist.is_whitelisted(current) {
                return Some(current.to_string());
            }
        }
        view.sessions
            .iter()
            .filter(|s| self.failed_bind.as_deref() != Some(s.package_name.as_str()))
            .find(|s| s.is_playing && whitelist.is_whitelisted(&s.package_name))
            .map(|s| s.package_name.clone())
    }

    fn bind(&mut self, package: String) -> Vec<Effect> {
        tracing::info!("Auto-start: binding display for {}", package);
        self.pending_start = None;
        self.pending_stop_ms = None;
        self.state = AutoStartState::ServiceBinding {
            package: package.clone(),
        };
        vec![Effect::Bind { package }]
    }

    fn unbind(&mut self, reason: &str) -> Vec<Effect> {
        self.pending_start = None;
        self.pending_stop_ms = None;
        if self.state == AutoStartState::Idle {
            return Vec::new();
        }
        tracing::info!("Auto-start: releasing display ({})", reason);
        self.state = AutoStartState::Idle;
        vec![Effect::Unbind]
    }

    fn retarget(&mut self, package: String) {
        tracing::info!("Auto-start: following {}", package);
        self.pending_stop_ms = None;
        self.state = match &self.state {
            AutoStartState::ServiceBinding { .. } => AutoStartState::ServiceBinding { package },
            _ => AutoStartState::ServiceActive { package },
        };
    }

    /// Playback or the active app changed.
    pub fn on_sessions_changed(
        &mut self,
        now_ms: u64,
        view: SessionView<'_>,
        whitelist: &Whitelist,
    ) -> Vec<Effect> {
        self.evaluate(now_ms, view, whitelist, false)
    }

    fn evaluate(
        &mut self,
        now_ms: u64,
        view: SessionView<'_>,
        whitelist: &Whitelist,
        start_now: bool,
    ) -> Vec<Effect> {
        if !self.enabled {
            return Vec::new();
        }
        if self.failed_bind.as_deref().is_some_and(|p| !view.is_playing(p)) {
            self.failed_bind = None;
        }
        let target = self.target(&view, whitelist);

        let Some(current) = self.state.package().map(str::to_string) else {
            return match target {
                Some(package) if start_now || self.config.start_delay_ms == 0 => {
                    self.bind(package)
                }
                Some(package) => {
                    if self.pending_start.as_ref().map(|p| &p.package) != Some(&package) {
                        self.pending_start = Some(PendingStart {
                            package,
                            due_ms: now_ms + self.config.start_delay_ms,
                        });
                    }
                    Vec::new()
                }
                None => {
                    self.pending_start = None;
                    Vec::new()
                }
            };
        };

        if !view.has_active_media {
            return self.unbind("no active media");
        }

        match target {
            Some(package) => {
                if package != current {
                    self.retarget(package);
                }
                self.pending_stop_ms = None;
                Vec::new()
            }
            None if self.config.stop_delay_ms == 0 => self.unbind("playback stopped"),
            None => {
                if self.pending_stop_ms.is_none() {
                    tracing::debug!(
                        "Auto-start: playback stopped, releasing in {}ms unless it resumes",
                        self.config.stop_delay_ms
                    );
                    self.pending_stop_ms = Some(now_ms + self.config.stop_delay_ms);
                }
                Vec::new()
            }
        }
    }

    /// Fire due debounce timers, re-checking the condition that armed them.
    pub fn tick(&mut self, now_ms: u64, view: SessionView<'_>, whitelist: &Whitelist) -> Vec<Effect> {
        if let Some(pending) = self.pending_start.take_if(|p| p.due_ms <= now_ms) {
            let still_wanted = self.enabled
                && self.state == AutoStartState::Idle
                && view.is_playing(&pending.package)
                && whitelist.is_whitelisted(&pending.package);
            if still_wanted {
                return self.bind(pending.package);
            }
        }

        if self.pending_stop_ms.is_some_and(|due| due <= now_ms) {
            self.pending_stop_ms = None;
            if self.state.package().is_some() && self.target(&view, whitelist).is_none() {
                return self.unbind("playback stayed stopped");
            }
        }

        Vec::new()
    }

    /// The whitelist was edited.
    pub fn on_whitelist_changed(
        &mut self,
        now_ms: u64,
        view: SessionView<'_>,
        whitelist: &Whitelist,
    ) -> Vec<Effect> {
        self.failed_bind = None;
        if !self.enabled {
            return Vec::new();
        }

        match self.state.package().map(str::to_string) {
            Some(current) if !whitelist.is_whitelisted(&current) => {
                tracing::info!("Auto-start: {} was removed from the whitelist", current);
                match self.target(&view, whitelist) {
                    Some(other) => {
                        self.retarget(other);
                        Vec::new()
                    }
                    None => self.unbind("active app de-whitelisted"),
                }
            }
            Some(_) => self.evaluate(now_ms, view, whitelist, false),
            None => self.evaluate(now_ms, view, whitelist, true),
        }
    }

    /// Outcome of an [`Effect::Bind`].
    pub fn on_bind_result(&mut self, result: Result<(), ServiceError>) -> Vec<Effect> {
        match (&self.state, result) {
            (AutoStartState::ServiceBinding { package }, Ok(())) => {
                tracing::info!("Auto-start: display active for {}", package);
                self.state = AutoStartState::ServiceActive {
                    package: package.clone(),
                };
                Vec::new()
            }
            (AutoStartState::ServiceBinding { package }, Err(e)) => {
                tracing::error!("Auto-start: {} (not retrying {} until it restarts)", e, package);
                self.failed_bind = Some(package.clone());
                self.state = AutoStartState::Idle;
                self.pending_start = None;
                self.pending_stop_ms = None;
                Vec::new()
            }
            // A bind that lands after we already gave up must be released.
            (AutoStartState::Idle, Ok(())) => vec![Effect::Unbind],
            _ => Vec::new(),
        }
    }

    /// Turn auto-start on or off. Turning it off releases the display.
    pub fn set_enabled(
        &mut self,
        enabled: bool,
        now_ms: u64,
        view: SessionView<'_>,
        whitelist: &Whitelist,
    ) -> Vec<Effect> {
        if self.enabled == enabled {
            return Vec::new();
        }
        tracing::info!("Auto-start {}", if enabled { "enabled" } else { "disabled" });
        self.enabled = enabled;
        self.failed_bind = None;
        if enabled {
            self.evaluate(now_ms, view, whitelist, true)
        } else {
            self.unbind("auto-start disabled")
        }
    }
}

// ── Async driver ─────────────────────────────────────────────────────

/// Inputs to the driver besides session events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoStartCommand {
    WhitelistChanged,
    SetEnabled(bool),
    Toggle,
}

pub struct AutoStartDriver {
    pub orchestrator: AutoStartOrchestrator,
    pub observer: Arc<Mutex<MediaSessionObserver>>,
    pub whitelist: Arc<Mutex<Whitelist>>,
    pub service: Box<dyn DisplayService>,
    pub clock: SharedClock,
    pub state_tx: watch::Sender<AutoStartState>,
    /// Receives the enable flag whenever it changes
    pub store: Arc<StateStore>,
}

impl AutoStartDriver {
    /// Run until `token` is cancelled, then release the display.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<SessionEvent>,
        mut commands: mpsc::Receiver<AutoStartCommand>,
        token: CancellationToken,
    ) {
        tracing::info!("Auto-start orchestrator running");
        // Catch up with whatever was playing before we subscribed.
        self.step(|o, now, view, wl| o.on_sessions_changed(now, view, wl));

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        self.step(|o, now, view, wl| o.on_sessions_changed(now, view, wl));
                    }
                    Err(RecvError::Closed) => break,
                },
                command = commands.recv() => match command {
                    Some(AutoStartCommand::WhitelistChanged) => {
                        self.step(|o, now, view, wl| o.on_whitelist_changed(now, view, wl));
                    }
                    Some(AutoStartCommand::SetEnabled(enabled)) => {
                        self.step(|o, now, view, wl| o.set_enabled(enabled, now, view, wl));
                    }
                    Some(AutoStartCommand::Toggle) => {
                        self.step(|o, now, view, wl| {
                            let enabled = !o.is_enabled();
                            o.set_enabled(enabled, now, view, wl)
                        });
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.step(|o, now, view, wl| o.tick(now, view, wl));
                }
            }
        }

        if self.orchestrator.state() != &AutoStartState::Idle {
            if let Err(e) = self.service.unbind() {
                tracing::warn!("Unbind on shutdown failed: {}", e);
            }
        }
        tracing::info!("Auto-start orchestrator stopped");
    }

    /// Feed one input to the orchestrator and carry out its effects.
    fn step(
        &mut self,
        input: impl FnOnce(&mut AutoStartOrchestrator, u64, SessionView<'_>, &Whitelist) -> Vec<Effect>,
    ) {
        let (sessions, has_active_media) = {
            let observer = self.observer.lock().unwrap_or_else(|e| e.into_inner());
            (
                observer.sessions().to_vec(),
                observer.now_playing().get().has_active_media,
            )
        };
        let whitelist = self
            .whitelist
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let view = SessionView::new(&sessions, has_active_media);
        let was_enabled = self.orchestrator.is_enabled();
        let effects = input(&mut self.orchestrator, self.clock.now_ms(), view, &whitelist);
        if self.orchestrator.is_enabled() != was_enabled {
            self.store.save_auto_start_enabled(self.orchestrator.is_enabled());
        }
        self.execute(effects);
        self.state_tx.send_replace(self.orchestrator.state().clone());
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        let mut queue = effects;
        while let Some(effect) = queue.pop() {
            match effect {
                Effect::Bind { package } => {
                    let result = self.service.bind(&package);
                    queue.extend(self.orchestrator.on_bind_result(result));
                }
                Effect::Unbind => {
                    if let Err(e) = self.service.unbind() {
                        tracing::warn!("{}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::media_session::tests::{FakeSessions, session};
    use crate::media_session::{NowPlaying, PlaybackState};
    use pretty_assertions::assert_eq;

    fn summary(package: &str, is_playing: bool) -> SessionSummary {
        SessionSummary {
            package_name: package.to_string(),
            is_playing,
        }
    }

    fn whitelist(packages: &[&str]) -> Whitelist {
        Whitelist::from_saved(Some(packages.iter().map(|p| p.to_string()).collect()))
    }

    fn active(package: &str) -> AutoStartState {
        AutoStartState::ServiceActive {
            package: package.to_string(),
        }
    }

    fn bind(package: &str) -> Vec<Effect> {
        vec![Effect::Bind {
            package: package.to_string(),
        }]
    }

    fn config(start_delay_ms: u64, stop_delay_ms: u64) -> AutoStartConfig {
        AutoStartConfig {
            start_delay_ms,
            stop_delay_ms,
        }
    }

    /// Bring an orchestrator to Active for `package`.
    fn activated(config: AutoStartConfig, package: &str, sessions: &[SessionSummary], wl: &Whitelist) -> AutoStartOrchestrator {
        let mut o = AutoStartOrchestrator::new(config, true);
        let effects = o.on_whitelist_changed(0, SessionView::new(sessions, true), wl);
        assert_eq!(effects, bind(package));
        assert!(o.on_bind_result(Ok(())).is_empty());
        assert_eq!(o.state(), &active(package));
        o
    }

    #[test]
    fn whitelisted_playback_binds_then_activates() {
        let wl = whitelist(&["app.a"]);
        let sessions = [summary("app.a", true)];
        let mut o = AutoStartOrchestrator::new(config(0, 3_000), true);

        assert_eq!(o.on_sessions_changed(0, SessionView::new(&sessions, true), &wl), bind("app.a"));
        assert_eq!(
            o.state(),
            &AutoStartState::ServiceBinding {
                package: "app.a".into()
            }
        );
        // Already binding: a repeated event does nothing
        assert!(o.on_sessions_changed(10, SessionView::new(&sessions, true), &wl).is_empty());

        o.on_bind_result(Ok(()));
        assert_eq!(o.state(), &active("app.a"));
    }

    #[test]
    fn non_whitelisted_playback_is_ignored() {
        let wl = whitelist(&["app.a"]);
        let sessions = [summary("app.z", true)];
        let mut o = AutoStartOrchestrator::new(AutoStartConfig::default(), true);
        assert!(o.on_sessions_changed(0, SessionView::new(&sessions, true), &wl).is_empty());
        assert_eq!(o.state(), &AutoStartState::Idle);
    }

    #[test]
    fn blacklisted_package_never_binds() {
        let wl = whitelist(&["com.android.systemui"]);
        let sessions = [summary("com.android.systemui", true)];
        let mut o = AutoStartOrchestrator::new(AutoStartConfig::default(), true);
        assert!(o.on_sessions_changed(0, SessionView::new(&sessions, true), &wl).is_empty());
    }

    #[test]
    fn start_delay_is_debounced_and_rechecked() {
        let wl = whitelist(&["app.a"]);
        let playing = [summary("app.a", true)];
        let paused = [summary("app.a", false)];
        let mut o = AutoStartOrchestrator::new(config(1_000, 3_000), true);

        assert!(o.on_sessions_changed(0, SessionView::new(&playing, true), &wl).is_empty());
        assert!(o.has_pending_start());
        assert!(o.tick(500, SessionView::new(&playing, true), &wl).is_empty());

        // Stopped again before the delay expired: the timer fires but re-checks
        assert!(o.tick(1_000, SessionView::new(&paused, true), &wl).is_empty());
        assert_eq!(o.state(), &AutoStartState::Idle);

        o.on_sessions_changed(2_000, SessionView::new(&playing, true), &wl);
        assert_eq!(o.tick(3_000, SessionView::new(&playing, true), &wl), bind("app.a"));
    }

    #[test]
    fn brief_pause_does_not_release() {
        let wl = whitelist(&["app.a"]);
        let playing = [summary("app.a", true)];
        let paused = [summary("app.a", false)];
        let mut o = activated(config(0, 3_000), "app.a", &playing, &wl);

        assert!(o.on_sessions_changed(1_000, SessionView::new(&paused, true), &wl).is_empty());
        assert!(o.has_pending_stop());
        assert!(o.on_sessions_changed(2_000, SessionView::new(&playing, true), &wl).is_empty());
        assert!(!o.has_pending_stop());
        assert!(o.tick(10_000, SessionView::new(&playing, true), &wl).is_empty());
        assert_eq!(o.state(), &active("app.a"));
    }

    #[test]
    fn stopped_playback_releases_after_delay() {
        let wl = whitelist(&["app.a"]);
        let playing = [summary("app.a", true)];
        let paused = [summary("app.a", false)];
        let mut o = activated(config(0, 3_000), "app.a", &playing, &wl);

        o.on_sessions_changed(1_000, SessionView::new(&paused, true), &wl);
        assert!(o.tick(3_999, SessionView::new(&paused, true), &wl).is_empty());
        assert_eq!(o.tick(4_000, SessionView::new(&paused, true), &wl), vec![Effect::Unbind]);
        assert_eq!(o.state(), &AutoStartState::Idle);
    }

    #[test]
    fn losing_all_media_releases_immediately() {
        let wl = whitelist(&["app.a"]);
        let playing = [summary("app.a", true)];
        let mut o = activated(config(0, 3_000), "app.a", &playing, &wl);

        assert_eq!(
            o.on_sessions_changed(1_000, SessionView::new(&[], false), &wl),
            vec![Effect::Unbind]
        );
        assert_eq!(o.state(), &AutoStartState::Idle);
        assert!(!o.has_pending_stop());
    }

    #[test]
    fn bind_failure_reverts_to_idle() {
        let wl = whitelist(&["app.a"]);
        let playing = [summary("app.a", true)];
        let mut o = AutoStartOrchestrator::new(config(0, 3_000), true);
        o.on_sessions_changed(0, SessionView::new(&playing, true), &wl);

        let effects = o.on_bind_result(Err(ServiceError::Bind("sdk refused".into())));
        assert!(effects.is_empty());
        assert_eq!(o.state(), &AutoStartState::Idle);
        assert!(!o.has_pending_start());
        assert!(!o.has_pending_stop());
    }

    #[test]
    fn failed_package_waits_for_a_restart_before_retrying() {
        let wl = whitelist(&["app.a"]);
        let playing = [summary("app.a", true)];
        let paused = [summary("app.a", false)];
        let mut o = AutoStartOrchestrator::new(config(0, 3_000), true);
        assert_eq!(o.on_sessions_changed(0, SessionView::new(&playing, true), &wl), bind("app.a"));
        o.on_bind_result(Err(ServiceError::Bind("sdk refused".into())));
        assert_eq!(o.failed_bind(), Some("app.a"));

        // Repeated events and ticks while it keeps playing do not retry
        assert!(o.on_sessions_changed(10, SessionView::new(&playing, true), &wl).is_empty());
        assert!(o.on_sessions_changed(20, SessionView::new(&playing, true), &wl).is_empty());
        assert!(o.tick(5_000, SessionView::new(&playing, true), &wl).is_empty());
        assert_eq!(o.state(), &AutoStartState::Idle);

        // Pausing clears the latch, so the next play retries
        assert!(o.on_sessions_changed(6_000, SessionView::new(&paused, true), &wl).is_empty());
        assert_eq!(o.failed_bind(), None);
        assert_eq!(
            o.on_sessions_changed(7_000, SessionView::new(&playing, true), &wl),
            bind("app.a")
        );
    }

    #[test]
    fn failed_package_does_not_block_other_apps() {
        let wl = whitelist(&["app.a", "app.b"]);
        let mut o = AutoStartOrchestrator::new(config(0, 3_000), true);
        let a_only = [summary("app.a", true)];
        o.on_sessions_changed(0, SessionView::new(&a_only, true), &wl);
        o.on_bind_result(Err(ServiceError::Bind("sdk refused".into())));

        let both = [summary("app.a", true), summary("app.b", true)];
        assert_eq!(
            o.on_sessions_changed(10, SessionView::new(&both, true), &wl),
            bind("app.b")
        );
    }

    #[test]
    fn whitelist_edit_retries_failed_package() {
        let wl = whitelist(&["app.a"]);
        let playing = [summary("app.a", true)];
        let mut o = AutoStartOrchestrator::new(config(0, 3_000), true);
        o.on_sessions_changed(0, SessionView::new(&playing, true), &wl);
        o.on_bind_result(Err(ServiceError::Bind("sdk refused".into())));

        assert_eq!(
            o.on_whitelist_changed(10, SessionView::new(&playing, true), &wl),
            bind("app.a")
        );
    }

    #[test]
    fn whitelist_reconciliation_scenario() {
        // A is paused, B is playing and owns the display
        let mut wl = whitelist(&["app.a", "app.b"]);
        let b_playing = [summary("app.a", false), summary("app.b", true)];
        let mut o = activated(config(0, 3_000), "app.b", &b_playing, &wl);

        // De-whitelist B: A is the only candidate and it is not playing
        wl.set_whitelisted("app.b", false);
        let effects = o.on_whitelist_changed(1_000, SessionView::new(&b_playing, true), &wl);
        assert_eq!(effects, vec![Effect::Unbind]);
        assert_eq!(o.state(), &AutoStartState::Idle);

        // B keeps playing but is no longer whitelisted
        assert!(o.on_sessions_changed(2_000, SessionView::new(&b_playing, true), &wl).is_empty());
        assert_eq!(o.state(), &AutoStartState::Idle);

        // A starts playing
        let a_playing = [summary("app.a", true), summary("app.b", true)];
        assert_eq!(
            o.on_sessions_changed(3_000, SessionView::new(&a_playing, true), &wl),
            bind("app.a")
        );
        o.on_bind_result(Ok(()));
        assert_eq!(o.state(), &active("app.a"));
    }

    #[test]
    fn dewhitelisting_active_switches_to_other_playing_app() {
        let mut wl = whitelist(&["app.a", "app.b"]);
        let both = [summary("app.b", true), summary("app.a", true)];
        let mut o = activated(config(0, 3_000), "app.b", &both, &wl);

        wl.set_whitelisted("app.b", false);
        assert!(o.on_whitelist_changed(1_000, SessionView::new(&both, true), &wl).is_empty());
        assert_eq!(o.state(), &active("app.a"));
    }

    #[test]
    fn newly_whitelisted_playing_app_starts_immediately() {
        let mut wl = whitelist(&[]);
        let playing = [summary("app.a", true)];
        let mut o = AutoStartOrchestrator::new(config(5_000, 3_000), true);
        assert!(o.on_sessions_changed(0, SessionView::new(&playing, true), &wl).is_empty());

        wl.set_whitelisted("app.a", true);
        assert_eq!(
            o.on_whitelist_changed(100, SessionView::new(&playing, true), &wl),
            bind("app.a")
        );
    }

    #[test]
    fn dewhitelist_during_bind_then_late_success_is_released() {
        let mut wl = whitelist(&["app.b"]);
        let playing = [summary("app.b", true)];
        let mut o = AutoStartOrchestrator::new(config(0, 3_000), true);
        o.on_sessions_changed(0, SessionView::new(&playing, true), &wl);

        wl.set_whitelisted("app.b", false);
        assert_eq!(
            o.on_whitelist_changed(10, SessionView::new(&playing, true), &wl),
            vec![Effect::Unbind]
        );
        assert_eq!(o.on_bind_result(Ok(())), vec![Effect::Unbind]);
        assert_eq!(o.state(), &AutoStartState::Idle);
    }

    #[test]
    fn disabling_releases_and_ignores_events() {
        let wl = whitelist(&["app.a"]);
        let playing = [summary("app.a", true)];
        let mut o = activated(config(0, 3_000), "app.a", &playing, &wl);

        assert_eq!(
            o.set_enabled(false, 10, SessionView::new(&playing, true), &wl),
            vec![Effect::Unbind]
        );
        assert!(o.on_sessions_changed(20, SessionView::new(&playing, true), &wl).is_empty());
        assert_eq!(
            o.set_enabled(true, 30, SessionView::new(&playing, true), &wl),
            bind("app.a")
        );
    }

    // ── Driver ───────────────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct RecordingService {
        calls: Arc<Mutex<Vec<String>>>,
        fail_bind: bool,
    }

    impl DisplayService for RecordingService {
        fn bind(&mut self, package: &str) -> Result<(), ServiceError> {
            self.calls.lock().unwrap().push(format!("bind {package}"));
            if self.fail_bind {
                return Err(ServiceError::Bind("refused".into()));
            }
            Ok(())
        }

        fn unbind(&mut self) -> Result<(), ServiceError> {
            self.calls.lock().unwrap().push("unbind".into());
            Ok(())
        }
    }

    struct Harness {
        fake: Arc<FakeSessions>,
        observer: Arc<Mutex<MediaSessionObserver>>,
        whitelist: Arc<Mutex<Whitelist>>,
        commands: mpsc::Sender<AutoStartCommand>,
        state_rx: watch::Receiver<AutoStartState>,
        calls: Arc<Mutex<Vec<String>>>,
        store: Arc<StateStore>,
        clock: Arc<ManualClock>,
        token: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_driver(service: RecordingService, wl: Whitelist) -> Harness {
        let fake = Arc::new(FakeSessions::default());
        let observer = Arc::new(Mutex::new(MediaSessionObserver::new(
            fake.clone(),
            NowPlaying::default(),
        )));
        let events = observer.lock().unwrap().subscribe();
        let whitelist = Arc::new(Mutex::new(wl));
        let (commands, commands_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(AutoStartState::Idle);
        let token = CancellationToken::new();
        let calls = service.calls.clone();
        let store = Arc::new(StateStore::in_memory());
        let clock = Arc::new(ManualClock::new(0));

        let driver = AutoStartDriver {
            orchestrator: AutoStartOrchestrator::new(config(0, 1_000), true),
            observer: observer.clone(),
            whitelist: whitelist.clone(),
            service: Box::new(service),
            clock: clock.clone(),
            state_tx,
            store: store.clone(),
        };
        let handle = tokio::spawn(driver.run(events, commands_rx, token.clone()));

        Harness {
            fake,
            observer,
            whitelist,
            commands,
            state_rx,
            calls,
            store,
            clock,
            token,
            handle,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn driver_binds_on_playback_and_unbinds_on_shutdown() {
        let h = spawn_driver(RecordingService::default(), whitelist(&["app.a"]));

        h.fake.set(vec![session("app.a", PlaybackState::Playing, Some("Song"))]);
        h.observer.lock().unwrap().poll();
        settle().await;
        assert_eq!(*h.state_rx.borrow(), active("app.a"));

        h.token.cancel();
        h.handle.await.unwrap();
        assert_eq!(*h.calls.lock().unwrap(), vec!["bind app.a", "unbind"]);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_handles_whitelist_edit_during_playback() {
        let h = spawn_driver(RecordingService::default(), whitelist(&["app.a"]));
        h.fake.set(vec![session("app.a", PlaybackState::Playing, Some("Song"))]);
        h.observer.lock().unwrap().poll();
        settle().await;

        h.whitelist.lock().unwrap().set_whitelisted("app.a", false);
        h.commands.send(AutoStartCommand::WhitelistChanged).await.unwrap();
        settle().await;
        assert_eq!(*h.state_rx.borrow(), AutoStartState::Idle);
        assert_eq!(*h.calls.lock().unwrap(), vec!["bind app.a", "unbind"]);

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn driver_reverts_to_idle_on_bind_failure() {
        let service = RecordingService {
            fail_bind: true,
            ..RecordingService::default()
        };
        let h = spawn_driver(service, whitelist(&["app.a"]));
        h.fake.set(vec![session("app.a", PlaybackState::Playing, Some("Song"))]);
        h.observer.lock().unwrap().poll();
        settle().await;

        assert_eq!(*h.state_rx.borrow(), AutoStartState::Idle);
        h.token.cancel();
        h.handle.await.unwrap();
        assert_eq!(*h.calls.lock().unwrap(), vec!["bind app.a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_retries_failed_bind_only_after_restart() {
        let service = RecordingService {
            fail_bind: true,
            ..RecordingService::default()
        };
        let h = spawn_driver(service, whitelist(&["app.a"]));
        h.fake.set(vec![session("app.a", PlaybackState::Playing, Some("Song"))]);
        h.observer.lock().unwrap().poll();
        settle().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*h.calls.lock().unwrap(), vec!["bind app.a"]);

        h.fake.set(vec![session("app.a", PlaybackState::Paused, Some("Song"))]);
        h.observer.lock().unwrap().poll();
        settle().await;
        h.fake.set(vec![session("app.a", PlaybackState::Playing, Some("Song"))]);
        h.observer.lock().unwrap().poll();
        settle().await;
        assert_eq!(*h.calls.lock().unwrap(), vec!["bind app.a", "bind app.a"]);

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_delay_expires_under_steady_commands() {
        let h = spawn_driver(RecordingService::default(), whitelist(&["app.a"]));
        h.fake.set(vec![session("app.a", PlaybackState::Playing, Some("Song"))]);
        h.observer.lock().unwrap().poll();
        settle().await;
        assert_eq!(*h.state_rx.borrow(), active("app.a"));

        h.fake.set(vec![session("app.a", PlaybackState::Paused, Some("Song"))]);
        h.observer.lock().unwrap().poll();
        settle().await;

        // A command every 200ms, faster than the tick interval
        for step in 1..=25u64 {
            h.clock.set(step * 200);
            h.commands.send(AutoStartCommand::WhitelistChanged).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(*h.state_rx.borrow(), AutoStartState::Idle);
        assert_eq!(*h.calls.lock().unwrap(), vec!["bind app.a", "unbind"]);

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_command_disables_and_persists() {
        let h = spawn_driver(RecordingService::default(), whitelist(&["app.a"]));
        h.fake.set(vec![session("app.a", PlaybackState::Playing, Some("Song"))]);
        h.observer.lock().unwrap().poll();
        settle().await;

        h.commands.send(AutoStartCommand::Toggle).await.unwrap();
        settle().await;
        assert_eq!(*h.state_rx.borrow(), AutoStartState::Idle);
        assert_eq!(h.store.auto_start_enabled(), Some(false));
        assert_eq!(*h.calls.lock().unwrap(), vec!["bind app.a", "unbind"]);

        h.token.cancel();
        h.handle.await.unwrap();
    }
}

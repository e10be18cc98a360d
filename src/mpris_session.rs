//! Linux media-session backend over MPRIS (D-Bus).
//!
//! Each MPRIS player becomes one [`SessionInfo`]; its package name is the
//! bus name without the `org.mpris.MediaPlayer2.` prefix (`spotify`,
//! `vlc`, `firefox.instance_1_23`). Album art is read when the player
//! advertises a `file://` art URL.
//!
//! MPRIS change signals are not subscribed to: the observer's polling loop
//! picks changes up, so [`SessionManager::register_callback`] is a no-op.
//!
//! ## Rust concepts
//! - `#[cfg(feature = "mpris")]` keeps the D-Bus dependency optional
//! - `From` conversions at the boundary between crate types and ours

use crate::audio::PlaybackProgress;
use crate::clock::SharedClock;
use crate::error::SessionError;
use crate::media_session::{PlaybackState, SessionInfo, SessionManager, TrackMetadata, TransportCommand};
use image::RgbImage;
use mpris::{Metadata, PlaybackStatus, Player, PlayerFinder};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

const BUS_PREFIX: &str = "org.mpris.MediaPlayer2.";

impl From<PlaybackStatus> for PlaybackState {
    fn from(status: PlaybackStatus) -> Self {
        match status {
            PlaybackStatus::Playing => PlaybackState::Playing,
            PlaybackStatus::Paused => PlaybackState::Paused,
            PlaybackStatus::Stopped => PlaybackState::Stopped,
        }
    }
}

fn package_name(bus_name: &str) -> &str {
    bus_name.strip_prefix(BUS_PREFIX).unwrap_or(bus_name)
}

fn art_path(art_url: &str) -> Option<PathBuf> {
    art_url.strip_prefix("file://").map(PathBuf::from)
}

fn load_art(art_url: Option<&str>) -> Option<Arc<RgbImage>> {
    let path = art_path(art_url?)?;
    match image::open(&path) {
        Ok(img) => Some(Arc::new(img.to_rgb8())),
        Err(e) => {
            tracing::debug!("Album art {} unreadable: {}", path.display(), e);
            None
        }
    }
}

fn track_metadata(metadata: Option<&Metadata>) -> TrackMetadata {
    let Some(metadata) = metadata else {
        return TrackMetadata::default();
    };
    TrackMetadata {
        title: metadata.title().map(String::from),
        artist: metadata
            .artists()
            .filter(|a| !a.is_empty())
            .map(|a| a.join(", ")),
        album: metadata.album_name().map(String::from),
    }
}

/// Session manager backed by the session D-Bus.
pub struct MprisSessionManager {
    clock: SharedClock,
}

impl MprisSessionManager {
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    fn players(&self) -> Result<Vec<Player>, SessionError> {
        let finder = PlayerFinder::new().map_err(|e| SessionError::Unavailable(e.to_string()))?;
        finder
            .find_all()
            .map_err(|e| SessionError::Unavailable(e.to_string()))
    }

    fn session(&self, player: &Player) -> SessionInfo {
        let state = player
            .get_playback_status()
            .map(PlaybackState::from)
            .unwrap_or(PlaybackState::None);
        let metadata = player.get_metadata().ok();
        let position_ms = player
            .get_position()
            .map(|p| p.as_millis() as u64)
            .unwrap_or(0);

        SessionInfo {
            package_name: package_name(player.bus_name()).to_string(),
            app_name: Some(player.identity().to_string()),
            state,
            metadata: track_metadata(metadata.as_ref()),
            album_art: load_art(metadata.as_ref().and_then(|m| m.art_url())),
            progress: PlaybackProgress {
                is_playing: state == PlaybackState::Playing,
                position_ms,
                updated_at_ms: self.clock.now_ms(),
                speed: player.get_playback_rate().unwrap_or(1.0),
                duration_ms: metadata
                    .as_ref()
                    .and_then(|m| m.length())
                    .map(|d| d.as_millis() as u64),
                volume: player.get_volume().unwrap_or(1.0).clamp(0.0, 1.0),
            },
        }
    }
}

impl SessionManager for MprisSessionManager {
    fn active_sessions(&self) -> Result<Vec<SessionInfo>, SessionError> {
        Ok(self.players()?.iter().map(|p| self.session(p)).collect())
    }

    fn register_callback(&self, _package: &str, _notify: Arc<Notify>) -> Result<(), SessionError> {
        Ok(())
    }

    fn send_transport(&self, package: &str, command: TransportCommand) -> Result<(), SessionError> {
        let player = self
            .players()?
            .into_iter()
            .find(|p| package_name(p.bus_name()) == package)
            .ok_or_else(|| SessionError::NoController(package.to_string()))?;

        let result = match command {
            TransportCommand::PlayPause => player.play_pause(),
            TransportCommand::Next => player.next(),
            TransportCommand::Previous => player.previous(),
        };
        result.map_err(|e| SessionError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("org.mpris.MediaPlayer2.spotify", "spotify")]
    #[case("org.mpris.MediaPlayer2.firefox.instance_1_23", "firefox.instance_1_23")]
    #[case("com.example.NotMpris", "com.example.NotMpris")]
    fn bus_name_to_package(#[case] bus: &str, #[case] expected: &str) {
        assert_eq!(package_name(bus), expected);
    }

    #[test]
    fn only_file_urls_are_loaded() {
        assert_eq!(art_path("file:///tmp/cover.png"), Some(PathBuf::from("/tmp/cover.png")));
        assert_eq!(art_path("https://example.com/cover.png"), None);
    }

    #[test]
    fn art_is_decoded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cover.png");
        RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30])).save(&path).unwrap();

        let art = load_art(Some(&format!("file://{}", path.display()))).unwrap();
        assert_eq!(art.dimensions(), (4, 4));
        assert!(load_art(Some("file:///nonexistent/cover.png")).is_none());
        assert!(load_art(None).is_none());
    }

    #[test]
    fn status_maps_onto_playback_state() {
        assert_eq!(PlaybackState::from(PlaybackStatus::Playing), PlaybackState::Playing);
        assert_eq!(PlaybackState::from(PlaybackStatus::Stopped), PlaybackState::Stopped);
    }
}

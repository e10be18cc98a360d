//! Music-reactive animation engine for a 25×25 circular Glyph Matrix.
//!
//! The crate turns media-session state (what is playing, whether it is
//! playing, album art, playback position) into 625-value intensity frames:
//!
//! - [`geometry`], [`brightness`] and [`patterns`] define the frame model
//! - [`theme`] holds the pluggable animations and their settings
//! - [`audio`] derives a beat signal from capture data or playback position
//! - [`media_session`], [`whitelist`] and [`auto_start`] decide when the
//!   hardware display is claimed
//! - [`shake`] maps accelerometer gestures onto transport commands
//! - [`render`], [`engine`] and [`server`] run it all and expose previews
//!
//! ## Rust concepts
//! - `pub mod` declarations form the crate's public tree
//! - `#[cfg(feature = "...")]` gates optional platform backends

pub mod audio;
pub mod auto_start;
pub mod brightness;
pub mod clock;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod media_session;
#[cfg(feature = "mpris")]
pub mod mpris_session;
pub mod patterns;
pub mod render;
pub mod server;
pub mod shake;
pub mod store;
pub mod theme;
pub mod whitelist;

pub use engine::{Engine, EngineConfig, Platform};

use tokio_util::sync::CancellationToken;

/// Set up a Ctrl+C handler that cancels the returned token.
///
/// # Rust concept: cooperative cancellation
/// Every engine task selects on `token.cancelled()`, so one `cancel()` from
/// the signal handler thread stops all of them. Cloning a
/// `CancellationToken` shares the same underlying state.
pub fn setup_signal_handler() -> Result<CancellationToken, ctrlc::Error> {
    let token = CancellationToken::new();
    let t = token.clone();

    ctrlc::set_handler(move || {
        tracing::info!("Shutdown requested");
        t.cancel();
    })?;

    Ok(token)
}

//! Glyph Matrix engine host
//!
//! Runs the theme engine, media-session observer and auto-start
//! orchestrator, and serves the preview/settings API so any device on the
//! LAN can watch frames and change themes.
//!
//! ## Architecture
//! - **Engine tasks** (tokio): render loop, session polling, auto-start,
//!   shake detection; see `engine.rs`
//! - **HTTP server** (axum): reads shared state, sends commands via channels
//!
//! ## Rust concepts
//! - `#[tokio::main]` async entry point
//! - `clap` derive for the CLI
//! - `main` returning `Result` so `?` works at the top level
//!
//! ## Usage
//! ```sh
//! ./target/release/glyph-matrix-rs --state-file ~/.config/glyph-matrix.json --port 8080
//! ```

use clap::Parser;
use glyph_matrix_rs::auto_start::AutoStartConfig;
use glyph_matrix_rs::clock::{SharedClock, SystemClock};
use glyph_matrix_rs::media_session::SessionManager;
use glyph_matrix_rs::render::{GlyphSink, TracingSink};
use glyph_matrix_rs::{Engine, EngineConfig, Platform, server, setup_signal_handler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Glyph Matrix engine host
#[derive(Parser)]
#[command(name = "glyph-matrix-rs")]
#[command(about = "Music-reactive animations for a 25x25 Glyph Matrix")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// JSON file for theme settings, whitelist and rotation state
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Theme to select at startup (album_art, pulse, spectrum, ripple)
    #[arg(long)]
    theme: Option<String>,

    /// Delay between frames for themes without their own interval
    #[arg(long, default_value = "100")]
    frame_interval_ms: u64,

    /// Media-session polling period
    #[arg(long, default_value = "2000")]
    poll_interval_ms: u64,

    /// Delay before claiming the display once a whitelisted app plays
    #[arg(long, default_value = "0")]
    start_delay_ms: u64,

    /// How long playback must stay stopped before releasing the display
    #[arg(long, default_value = "3000")]
    stop_delay_ms: u64,

    /// Run the engine without the HTTP API
    #[arg(long)]
    no_server: bool,
}

#[cfg(feature = "mpris")]
fn session_manager(clock: SharedClock) -> Arc<dyn SessionManager> {
    tracing::info!("Media sessions: MPRIS");
    Arc::new(glyph_matrix_rs::mpris_session::MprisSessionManager::new(clock))
}

#[cfg(not(feature = "mpris"))]
fn session_manager(_clock: SharedClock) -> Arc<dyn SessionManager> {
    tracing::info!("Media sessions: none (build with --features mpris for MPRIS)");
    Arc::new(glyph_matrix_rs::media_session::IdleSessionManager)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();
    let token = setup_signal_handler()?;

    tracing::info!("Glyph Matrix engine v{}", env!("CARGO_PKG_VERSION"));

    let clock: SharedClock = Arc::new(SystemClock);
    let config = EngineConfig {
        frame_interval_ms: args.frame_interval_ms,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        auto_start: AutoStartConfig {
            start_delay_ms: args.start_delay_ms,
            stop_delay_ms: args.stop_delay_ms,
        },
        state_file: args.state_file,
        initial_theme: args.theme,
    };
    let platform = Platform {
        sessions: session_manager(clock.clone()),
        audio_tap: None,
        connect: Box::new(|package: &str| {
            tracing::info!("Opening Glyph display for {}", package);
            Ok(Box::new(TracingSink::default()) as Box<dyn GlyphSink>)
        }),
        clock,
    };

    let engine = Engine::start(config, platform, token.clone());

    if args.no_server {
        token.cancelled().await;
    } else {
        let app = server::create_router(engine.app_state());

        let addr = format!("0.0.0.0:{}", args.port);
        tracing::info!("Listening on http://{}", addr);
        tracing::info!("API Documentation: http://localhost:{}/docs", args.port);
        tracing::info!("Try: curl http://localhost:{}/api/v1/status", args.port);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let shutdown = token.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
    }

    token.cancel();
    engine.join().await;
    Ok(())
}

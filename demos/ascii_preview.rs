//! # ASCII Preview Example
//!
//! Renders a theme's animation in the terminal, one 25×25 frame at a time,
//! so themes can be tried without a Glyph Matrix. Audio-reactive themes get
//! the heuristic beat signal of a track playing at 120 BPM.
//!
//! ## Run it
//! ```sh
//! cargo run --example ascii_preview -- --theme pulse --frames 60
//! cargo run --example ascii_preview -- --theme ripple --set speed=fast
//! ```

use clap::Parser;
use glyph_matrix_rs::audio::{AudioSignalGenerator, PlaybackProgress};
use glyph_matrix_rs::brightness::apply_to_frame;
use glyph_matrix_rs::clock::ManualClock;
use glyph_matrix_rs::geometry::{GRID_SIZE, PixelFrame, is_in_mask};
use glyph_matrix_rs::media_session::NowPlaying;
use glyph_matrix_rs::store::StateStore;
use glyph_matrix_rs::theme::ThemeRepository;
use glyph_matrix_rs::theme::settings::{SettingValue, SettingValues};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ascii_preview")]
#[command(about = "Preview Glyph Matrix themes in the terminal")]
struct Args {
    /// Theme id (album_art, pulse, spectrum, ripple)
    #[arg(long, default_value = "pulse")]
    theme: String,

    /// Number of frames to render
    #[arg(long, default_value = "40")]
    frames: usize,

    /// Delay between frames
    #[arg(long, default_value = "80")]
    interval_ms: u64,

    /// Setting override, `id=value`; may be repeated
    #[arg(long = "set", value_name = "ID=VALUE")]
    settings: Vec<String>,
}

const SHADES: &[char] = &[' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];

fn parse_setting(raw: &str) -> Option<(String, SettingValue)> {
    let (id, value) = raw.split_once('=')?;
    let value = match value {
        "true" => SettingValue::Bool(true),
        "false" => SettingValue::Bool(false),
        v => v
            .parse::<f64>()
            .map(SettingValue::Number)
            .unwrap_or_else(|_| SettingValue::Choice(v.to_string())),
    };
    Some((id.to_string(), value))
}

fn draw(frame: &PixelFrame) -> String {
    let mut out = String::with_capacity(GRID_SIZE * (GRID_SIZE * 2 + 1));
    for row in 0..GRID_SIZE {
        for col in 0..GRID_SIZE {
            let c = if is_in_mask(row, col) {
                SHADES[frame.get(row, col) as usize * (SHADES.len() - 1) / 255]
            } else {
                ' '
            };
            out.push(c);
            out.push(' ');
        }
        out.push('\n');
    }
    out
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let running = glyph_matrix_rs::setup_signal_handler()?;

    let clock = Arc::new(ManualClock::new(0));
    let themes = ThemeRepository::with_builtin_themes(
        NowPlaying::default(),
        clock.clone(),
        Arc::new(StateStore::in_memory()),
    );
    let theme = themes
        .get(&args.theme)
        .ok_or_else(|| format!("unknown theme: {}", args.theme))?;

    let overrides: SettingValues = args.settings.iter().filter_map(|s| parse_setting(s)).collect();
    if !overrides.is_empty() {
        themes.apply_settings(&args.theme, &overrides);
    }

    let mut audio = AudioSignalGenerator::new(None);
    let progress = PlaybackProgress {
        is_playing: true,
        position_ms: 0,
        updated_at_ms: 0,
        speed: 1.0,
        duration_ms: None,
        volume: 0.8,
    };

    let mut stdout = std::io::stdout();
    for i in 0..args.frames {
        if running.is_cancelled() {
            break;
        }
        let now = i as u64 * args.interval_ms;
        clock.set(now);
        if let Some(reactive) = theme.audio_reactive() {
            reactive.update_audio(audio.sample(now, Some(&progress)));
        }

        let index = (i % theme.frame_count().max(1)) as i64;
        let frame = apply_to_frame(&theme.generate_frame(index)?, theme.brightness());
        // Clear screen and home the cursor
        write!(stdout, "\x1b[2J\x1b[H{}", draw(&frame))?;
        writeln!(stdout, "{}  frame {}/{}", theme.name(), index + 1, theme.frame_count())?;
        stdout.flush()?;
        thread::sleep(Duration::from_millis(args.interval_ms));
    }
    Ok(())
}

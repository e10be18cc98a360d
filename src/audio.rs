//! Pseudo-audio signal generator.
//!
//! The process cannot record audio, so audio-reactive themes are fed a
//! synthetic [`AudioSignal`] produced once per frame tick. Which mode runs is
//! decided per tick by what data is available:
//!
//! | Mode | When | Beat | Bands |
//! |------|------|------|-------|
//! | Direct capture | an [`AudioTap`] returned a capture | RMS, gated to one beat per 200 ms, ×0.95 decay | mean magnitude over 0–8 %, 8–40 %, 40–100 % of the spectrum |
//! | Heuristic | playing, no capture | sine stack at the assumed tempo | fixed fractions of the beat |
//! | Silent | nothing playing | 0 | 0 |
//!
//! The heuristic assumes 120 BPM for every track. There is no tempo input
//! to do better with.

use serde::Serialize;
use std::f64::consts::PI;

/// Tempo assumed by the heuristic mode.
pub const DEFAULT_BPM: f64 = 120.0;

/// Minimum time between two detected beats in capture mode.
pub const MIN_BEAT_SPACING_MS: u64 = 200;

/// Per-tick decay of the beat level between detected beats.
pub const BEAT_DECAY: f64 = 0.95;

/// RMS above which a capture counts as a beat.
pub const BEAT_RMS_THRESHOLD: f64 = 0.25;

const BEAT_RMS_GAIN: f64 = 2.0;
const BASS_END: f64 = 0.08;
const MID_END: f64 = 0.40;
const HEURISTIC_BAND_FRACTIONS: (f64, f64, f64) = (0.8, 0.6, 0.4);
const VOLUME_BOOST_GAIN: f64 = 2.0;
const VOLUME_BOOST_MAX: f64 = 0.3;
const VOLUME_CHANGE_EPSILON: f64 = 0.01;

/// One tick's worth of audio levels. Every level is in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct AudioSignal {
    pub beat_intensity: f64,
    pub bass_level: f64,
    pub mid_level: f64,
    pub treble_level: f64,
    pub is_playing: bool,
}

impl AudioSignal {
    pub fn silent() -> Self {
        Self::default()
    }

    fn from_levels(beat: f64, bass: f64, mid: f64, treble: f64) -> Self {
        Self {
            beat_intensity: beat.clamp(0.0, 1.0),
            bass_level: bass.clamp(0.0, 1.0),
            mid_level: mid.clamp(0.0, 1.0),
            treble_level: treble.clamp(0.0, 1.0),
            is_playing: true,
        }
    }
}

/// Raw data from a system visualizer tap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioCapture {
    /// Samples in `[-1, 1]`.
    pub waveform: Vec<f32>,
    /// Magnitudes in `[0, 1]`, lowest frequency first.
    pub spectrum: Vec<f32>,
}

/// An opportunistic source of real audio data. Returning `None` drops the
/// generator back to the heuristic for that tick.
pub trait AudioTap: Send {
    fn capture(&mut self) -> Option<AudioCapture>;
}

/// What the platform reports about the current track's progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PlaybackProgress {
    pub is_playing: bool,
    pub position_ms: u64,
    /// When `position_ms` was sampled.
    pub updated_at_ms: u64,
    pub speed: f64,
    pub duration_ms: Option<u64>,
    /// Stream volume in `[0, 1]`.
    pub volume: f64,
}

impl PlaybackProgress {
    /// Position extrapolated to `now_ms` while playing.
    pub fn estimated_position_ms(&self, now_ms: u64) -> u64 {
        if !self.is_playing {
            return self.position_ms;
        }
        let elapsed = now_ms.saturating_sub(self.updated_at_ms) as f64 * self.speed.max(0.0);
        let position = self.position_ms.saturating_add(elapsed as u64);
        match self.duration_ms {
            Some(d) if d > 0 => position.min(d),
            _ => position,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    DirectCapture,
    Heuristic,
    Silent,
}

/// Beat curve of the heuristic mode for a position in the track.
pub fn heuristic_beat(position_ms: u64, bpm: f64, volume_boost: f64) -> f64 {
    let progress = (position_ms as f64 / 1000.0 * bpm / 60.0).rem_euclid(1.0);
    let pulse = (2.0 * PI * progress).sin().powi(2).max(0.0);
    let value = pulse + 0.3 * (4.0 * PI * progress).sin() + 0.1 * (8.0 * PI * progress).sin();
    (value + volume_boost).clamp(0.0, 1.0)
}

fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Magnitude sum over `[start, end)` fractions of the spectrum, normalised
/// by the band's bin count and clamped to `[0, 1]`, so bands of different
/// widths are comparable.
fn band_level(spectrum: &[f32], start: f64, end: f64) -> f64 {
    let len = spectrum.len();
    let from = ((len as f64 * start).floor() as usize).min(len);
    let to = ((len as f64 * end).ceil() as usize).clamp(from, len);
    let band = &spectrum[from..to];
    if band.is_empty() {
        return 0.0;
    }
    let sum: f64 = band.iter().map(|&m| m as f64).sum();
    (sum / band.len() as f64).clamp(0.0, 1.0)
}

pub struct AudioSignalGenerator {
    tap: Option<Box<dyn AudioTap>>,
    bpm: f64,
    beat: f64,
    last_beat_ms: Option<u64>,
    last_volume: Option<f64>,
    last_source: SignalSource,
}

impl AudioSignalGenerator {
    pub fn new(tap: Option<Box<dyn AudioTap>>) -> Self {
        Self {
            tap,
            bpm: DEFAULT_BPM,
            beat: 0.0,
            last_beat_ms: None,
            last_volume: None,
            last_source: SignalSource::Silent,
        }
    }

    pub fn last_source(&self) -> SignalSource {
        self.last_source
    }

    /// Produce this tick's signal.
    pub fn sample(&mut self, now_ms: u64, playback: Option<&PlaybackProgress>) -> AudioSignal {
        let Some(playback) = playback.filter(|p| p.is_playing) else {
            self.beat = 0.0;
            self.last_volume = playback.map(|p| p.volume);
            self.switch_source(SignalSource::Silent);
            return AudioSignal::silent();
        };

        let capture = self.tap.as_mut().and_then(|tap| tap.capture());
        let signal = match capture {
            Some(capture) => {
                self.switch_source(SignalSource::DirectCapture);
                self.from_capture(&capture, now_ms)
            }
            None => {
                self.switch_source(SignalSource::Heuristic);
                self.from_progress(playback, now_ms)
            }
        };
        self.last_volume = Some(playback.volume);
        signal
    }

    fn switch_source(&mut self, source: SignalSource) {
        if self.last_source != source {
            tracing::debug!("Audio signal source: {:?} -> {:?}", self.last_source, source);
            self.last_source = source;
        }
    }

    fn from_capture(&mut self, capture: &AudioCapture, now_ms: u64) -> AudioSignal {
        let level = rms(&capture.waveform);
        let spaced = self
            .last_beat_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= MIN_BEAT_SPACING_MS);

        if level > BEAT_RMS_THRESHOLD && spaced {
            self.beat = (level * BEAT_RMS_GAIN).min(1.0);
            self.last_beat_ms = Some(now_ms);
        } else {
            self.beat *= BEAT_DECAY;
        }

        AudioSignal::from_levels(
            self.beat,
            band_level(&capture.spectrum, 0.0, BASS_END),
            band_level(&capture.spectrum, BASS_END, MID_END),
            band_level(&capture.spectrum, MID_END, 1.0),
        )
    }

    fn from_progress(&mut self, playback: &PlaybackProgress, now_ms: u64) -> AudioSignal {
        let boost = match self.last_volume {
            Some(previous) if (playback.volume - previous).abs() > VOLUME_CHANGE_EPSILON => {
                ((playback.volume - previous).abs() * VOLUME_BOOST_GAIN).min(VOLUME_BOOST_MAX)
            }
            _ => 0.0,
        };
        let position = playback.estimated_position_ms(now_ms);
        let beat = heuristic_beat(position, self.bpm, boost);
        self.beat = beat;

        let (bass, mid, treble) = HEURISTIC_BAND_FRACTIONS;
        AudioSignal::from_levels(beat, beat * bass, beat * mid, beat * treble)
    }
}

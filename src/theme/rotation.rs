//! Rotation phase: a small state machine tracking a spinning angle across
//! pauses and process restarts.
//!
//! ```text
//!            start               pause
//!  Stopped ─────────▶ Running ─────────▶ Paused
//!     ▲                 ▲  │               │
//!     │      stop       │  └── resume ◀────┘
//!     └─────────────────┴──────────────────┘
//! ```
//!
//! While running, `angle = (saved + elapsed * velocity) mod 360`. Pausing
//! folds the elapsed time into `saved`, so resuming continues from the
//! same angle. Only `stop` (rotation switched off) resets the angle.

use serde::{Deserialize, Serialize};

/// Persisted form of the phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationSnapshot {
    pub angle: f64,
    pub is_paused: bool,
    pub start_time_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationState {
    Stopped,
    Running { start_time_ms: u64 },
    Paused,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotationPhase {
    state: RotationState,
    saved_position: f64,
    /// Degrees per millisecond.
    velocity: f64,
}

/// `360 / (ms_per_frame * frame_count)` degrees per millisecond.
pub fn angular_velocity(ms_per_frame: f64, frame_count: usize) -> f64 {
    let period = ms_per_frame * frame_count.max(1) as f64;
    if period <= 0.0 {
        return 0.0;
    }
    360.0 / period
}

fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped.is_finite() { wrapped } else { 0.0 }
}

impl RotationPhase {
    pub fn stopped(velocity: f64) -> Self {
        Self {
            state: RotationState::Stopped,
            saved_position: 0.0,
            velocity,
        }
    }

    /// Rebuild the phase after a restart.
    ///
    /// A phase that was running comes back running from `now`, not from the
    /// stored start time, so the angle does not leap forward by however long
    /// the process was down.
    pub fn restore(snapshot: RotationSnapshot, velocity: f64, now_ms: u64) -> Self {
        let saved_position = wrap_degrees(snapshot.angle);
        let state = if snapshot.is_paused {
            RotationState::Paused
        } else {
            RotationState::Running {
                start_time_ms: now_ms,
            }
        };
        Self {
            state,
            saved_position,
            velocity,
        }
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    pub fn current_angle(&self, now_ms: u64) -> f64 {
        match self.state {
            RotationState::Stopped => 0.0,
            RotationState::Paused => self.saved_position,
            RotationState::Running { start_time_ms } => {
                let elapsed = now_ms.saturating_sub(start_time_ms) as f64;
                wrap_degrees(self.saved_position + elapsed * self.velocity)
            }
        }
    }

    /// Stopped → Running from angle 0. A paused phase resumes instead.
    pub fn start(&mut self, now_ms: u64) {
        match self.state {
            RotationState::Stopped => {
                self.saved_position = 0.0;
                self.state = RotationState::Running {
                    start_time_ms: now_ms,
                };
            }
            RotationState::Paused => {
                self.resume(now_ms);
            }
            RotationState::Running { .. } => {}
        }
    }

    /// Running → Paused. Returns `true` if the state changed.
    pub fn pause(&mut self, now_ms: u64) -> bool {
        if let RotationState::Running { .. } = self.state {
            self.saved_position = self.current_angle(now_ms);
            self.state = RotationState::Paused;
            return true;
        }
        false
    }

    /// Paused → Running, continuing from the paused angle.
    pub fn resume(&mut self, now_ms: u64) -> bool {
        if self.state == RotationState::Paused {
            self.state = RotationState::Running {
                start_time_ms: now_ms,
            };
            return true;
        }
        false
    }

    /// Any state → Stopped, clearing the angle.
    pub fn stop(&mut self) {
        self.state = RotationState::Stopped;
        self.saved_position = 0.0;
    }

    /// Change speed without a visual jump: the elapsed angle is folded into
    /// the saved position before the new velocity applies.
    pub fn set_velocity(&mut self, velocity: f64, now_ms: u64) {
        if let RotationState::Running { .. } = self.state {
            self.saved_position = self.current_angle(now_ms);
            self.state = RotationState::Running {
                start_time_ms: now_ms,
            };
        }
        self.velocity = velocity;
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn snapshot(&self, now_ms: u64) -> RotationSnapshot {
        let (is_paused, start_time_ms) = match self.state {
            RotationState::Stopped => (false, 0),
            RotationState::Paused => (true, 0),
            RotationState::Running { start_time_ms } => (false, start_time_ms),
        };
        RotationSnapshot {
            angle: self.current_angle(now_ms),
            is_paused,
            start_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    // 100ms per frame, 36 frames: one revolution every 3.6s, 0.1 deg/ms
    fn velocity() -> f64 {
        angular_velocity(100.0, 36)
    }

    #[test]
    fn velocity_formula() {
        assert!((velocity() - 0.1).abs() < TOLERANCE);
        assert_eq!(angular_velocity(0.0, 36), 0.0);
    }

    #[test]
    fn pause_resume_preserves_phase() {
        let mut interrupted = RotationPhase::stopped(velocity());
        interrupted.start(0);
        assert!(interrupted.pause(1_000));
        assert!(interrupted.resume(6_000));
        let after_resume = interrupted.current_angle(7_000);

        let mut continuous = RotationPhase::stopped(velocity());
        continuous.start(0);
        let uninterrupted = continuous.current_angle(2_000);

        assert!((after_resume - uninterrupted).abs() < TOLERANCE);
        assert!((uninterrupted - 200.0).abs() < TOLERANCE);
    }

    #[test]
    fn paused_angle_is_frozen() {
        let mut phase = RotationPhase::stopped(velocity());
        phase.start(0);
        phase.pause(500);
        assert!((phase.current_angle(500) - 50.0).abs() < TOLERANCE);
        assert!((phase.current_angle(99_999) - 50.0).abs() < TOLERANCE);
    }

    #[test]
    fn angle_wraps_at_360() {
        let mut phase = RotationPhase::stopped(velocity());
        phase.start(0);
        assert!((phase.current_angle(4_000) - 40.0).abs() < TOLERANCE);
    }

    #[test]
    fn stop_clears_position() {
        let mut phase = RotationPhase::stopped(velocity());
        phase.start(0);
        phase.pause(1_000);
        phase.stop();
        assert_eq!(phase.state(), RotationState::Stopped);
        assert_eq!(phase.current_angle(5_000), 0.0);
        phase.start(5_000);
        assert!((phase.current_angle(5_100) - 10.0).abs() < TOLERANCE);
    }

    #[test]
    fn restore_running_restarts_clock_from_now() {
        let snapshot = RotationSnapshot {
            angle: 90.0,
            is_paused: false,
            start_time_ms: 1_000,
        };
        let phase = RotationPhase::restore(snapshot, velocity(), 1_000_000);
        assert_eq!(
            phase.state(),
            RotationState::Running {
                start_time_ms: 1_000_000
            }
        );
        assert!((phase.current_angle(1_000_000) - 90.0).abs() < TOLERANCE);
    }

    #[test]
    fn restore_paused_keeps_angle() {
        let snapshot = RotationSnapshot {
            angle: 400.0,
            is_paused: true,
            start_time_ms: 0,
        };
        let phase = RotationPhase::restore(snapshot, velocity(), 50);
        assert_eq!(phase.state(), RotationState::Paused);
        assert!((phase.current_angle(10_000) - 40.0).abs() < TOLERANCE);
    }

    #[test]
    fn velocity_change_does_not_jump() {
        let mut phase = RotationPhase::stopped(velocity());
        phase.start(0);
        let before = phase.current_angle(1_000);
        phase.set_velocity(velocity() * 2.0, 1_000);
        assert!((phase.current_angle(1_000) - before).abs() < TOLERANCE);
        assert!((phase.current_angle(1_100) - (before + 20.0)).abs() < TOLERANCE);
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let mut phase = RotationPhase::stopped(velocity());
        assert!(!phase.pause(10));
        assert!(!phase.resume(10));
        phase.start(0);
        assert!(phase.pause(10));
        assert!(!phase.pause(20));
    }

    #[test]
    fn start_on_paused_phase_resumes_from_saved_angle() {
        let mut phase = RotationPhase::stopped(velocity());
        phase.start(0);
        phase.pause(500);
        phase.start(2_000);
        assert_eq!(
            phase.state(),
            RotationState::Running {
                start_time_ms: 2_000
            }
        );
        assert!((phase.current_angle(2_100) - 60.0).abs() < TOLERANCE);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut phase = RotationPhase::stopped(velocity());
        phase.start(0);
        phase.pause(1_500);
        let snapshot = phase.snapshot(1_500);
        assert!(snapshot.is_paused);
        let restored = RotationPhase::restore(snapshot, velocity(), 9_000);
        assert!((restored.current_angle(9_000) - phase.current_angle(9_000)).abs() < TOLERANCE);
    }
}

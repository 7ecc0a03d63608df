//! Tempo estimate from MIDI timing clock pulses
//!
//! 24 pulses make a quarter note. The first pulse after idle starts the
//! measurement; every 24th pulse after that yields a BPM value and restarts it.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pulses per quarter note
pub const PULSES_PER_BEAT: i32 = 24;

/// Silence after which the clock is considered gone
pub const CLOCK_TIMEOUT: Duration = Duration::from_secs(4);

/// Clock estimator shared between the engine and readers
pub type SharedClock = Arc<Mutex<ClockEstimator>>;

/// What the estimator currently knows
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockState {
    /// No full beat measured yet
    Unknown,
    /// Clock pulses stopped arriving
    NoClock,
    Bpm(f64),
}

impl fmt::Display for ClockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockState::Unknown => f.write_str("???"),
            ClockState::NoClock => f.write_str("no clock"),
            ClockState::Bpm(bpm) => write!(f, "{:.2}", bpm),
        }
    }
}

#[derive(Debug)]
pub struct ClockEstimator {
    /// Pulses since the last reset; -1 while idle
    count: i32,
    start: Option<Instant>,
    state: ClockState,
}

impl Default for ClockEstimator {
    fn default() -> Self {
        Self {
            count: -1,
            start: None,
            state: ClockState::Unknown,
        }
    }
}

impl ClockEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedClock {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register one timing clock pulse received at `now`
    pub fn pulse(&mut self, now: Instant) {
        self.count += 1;
        if self.count == 0 {
            self.start = Some(now);
        } else if self.count == PULSES_PER_BEAT {
            let diff = self
                .start
                .map(|s| now.saturating_duration_since(s).as_secs_f64())
                .unwrap_or(0.0);
            self.start = Some(now);
            self.count = 0;
            self.state = if diff > 0.0 {
                ClockState::Bpm(60.0 / diff)
            } else {
                ClockState::Unknown
            };
        }
    }

    /// Check for a stalled clock
    pub fn poll(&mut self, now: Instant) {
        if self.count < 0 {
            return;
        }
        let stalled = self
            .start
            .map(|s| now.saturating_duration_since(s) > CLOCK_TIMEOUT)
            .unwrap_or(true);
        if stalled {
            self.count = -1;
            self.start = None;
            self.state = ClockState::NoClock;
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_120_bpm() {
        let mut clock = ClockEstimator::new();
        let t0 = Instant::now();
        let step = Duration::from_secs_f64(1.0 / 48.0);

        for i in 0..25u32 {
            clock.pulse(t0 + step * i);
        }

        match clock.state() {
            ClockState::Bpm(bpm) => assert!((bpm - 120.0).abs() < 0.01, "bpm = {}", bpm),
            other => panic!("expected bpm, got {:?}", other),
        }
        assert_eq!(clock.state().to_string(), "120.00");
    }

    #[test]
    fn test_no_clock_after_silence() {
        let mut clock = ClockEstimator::new();
        let t0 = Instant::now();
        clock.pulse(t0);

        clock.poll(t0 + Duration::from_secs(3));
        assert_eq!(clock.state(), ClockState::Unknown);

        clock.poll(t0 + Duration::from_secs(5));
        assert_eq!(clock.state(), ClockState::NoClock);
        assert_eq!(clock.state().to_string(), "no clock");
    }

    #[test]
    fn test_zero_interval_is_unknown() {
        let mut clock = ClockEstimator::new();
        let t0 = Instant::now();
        for _ in 0..25 {
            clock.pulse(t0);
        }
        assert_eq!(clock.state(), ClockState::Unknown);
    }

    #[test]
    fn test_idle_poll_keeps_state() {
        let mut clock = ClockEstimator::new();
        clock.poll(Instant::now());
        assert_eq!(clock.state(), ClockState::Unknown);
    }
}

//! Decoded device status

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::packing::samples_to_secs;

/// Most tracks the device reports
pub const MAX_TRACKS: usize = 8;

/// Playback state of a single track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Empty,
    Recording,
    Overdubbing,
    Stopped,
    Playing,
    Replacing,
    /// Any other state byte, kept as received
    Unknown(u8),
}

impl PlaybackState {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => PlaybackState::Empty,
            1 => PlaybackState::Recording,
            2 => PlaybackState::Overdubbing,
            3 => PlaybackState::Stopped,
            4 => PlaybackState::Playing,
            5 => PlaybackState::Replacing,
            other => PlaybackState::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PlaybackState::Empty => 0,
            PlaybackState::Recording => 1,
            PlaybackState::Overdubbing => 2,
            PlaybackState::Stopped => 3,
            PlaybackState::Playing => 4,
            PlaybackState::Replacing => 5,
            PlaybackState::Unknown(b) => b,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Empty => "empty",
            PlaybackState::Recording => "recording",
            PlaybackState::Overdubbing => "overdubbing",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Replacing => "replacing",
            PlaybackState::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStatus {
    pub state: PlaybackState,
    /// Level in device units (0 = full, negative = attenuated)
    pub level: i8,
    pub pan: i8,
    pub feedback: u8,
    /// Loop length in samples
    pub length: u32,
    /// Play position in samples
    pub position: u32,
}

impl TrackStatus {
    pub fn length_secs(&self) -> f64 {
        samples_to_secs(self.length)
    }

    pub fn position_secs(&self) -> f64 {
        samples_to_secs(self.position)
    }
}

impl Default for TrackStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Empty,
            level: 0,
            pan: 0,
            feedback: 0,
            length: 0,
            position: 0,
        }
    }
}

/// Point-in-time device status.
///
/// The track count is the length of `tracks`, so every per-track value
/// always exists for every reported track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub selected_track: u8,
    pub tracks: Vec<TrackStatus>,
}

impl StatusSnapshot {
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// One line per track, numbered from 1
    pub fn describe_track(&self, index: usize) -> Option<String> {
        let t = self.tracks.get(index)?;
        Some(format!(
            "Track {} Status: {}, Level: {}, Pan: {}, Feedback: {}, Length: {:.2}, Position: {:.2}",
            index + 1,
            t.state,
            t.level,
            t.pan,
            t.feedback,
            t.length_secs(),
            t.position_secs()
        ))
    }

    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![format!("Selected Track: {}", self.selected_track)];
        lines.extend((0..self.tracks.len()).filter_map(|i| self.describe_track(i)));
        lines
    }
}

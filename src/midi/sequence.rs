//! The decoded form of a MIDI file.
//!
//! A [`ParsedMidi`] is built once at load time and is read-only during
//! playback. Only the snapshot rewriter edits its tracks, and only as a
//! one-shot pre-export pass.

use super::message::MidiMessage;
use super::DEFAULT_TEMPO;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ordered messages of one track, tick-ascending.
pub type Track = Vec<MidiMessage>;

/// A tempo change at an absolute tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    /// Position in ticks.
    pub ticks: u32,
    /// Tempo in beats per minute.
    pub tempo: f64,
}

impl TempoChange {
    /// Builds a tempo change from a Set Tempo payload (microseconds per quarter note).
    pub fn from_microseconds(ticks: u32, microseconds_per_beat: u32) -> Self {
        Self {
            ticks,
            tempo: 60_000_000.0 / microseconds_per_beat as f64,
        }
    }
}

/// Loop region in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoopPoints {
    pub start: u32,
    pub end: u32,
}

/// A fully decoded MIDI file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedMidi {
    /// SMF format (0, 1 or 2).
    pub format: u16,
    /// Ticks per quarter note.
    pub division: u16,
    /// Message lists, one per track.
    pub tracks: Vec<Track>,
    /// Tempo changes, most recent tick first. Always ends with the
    /// implicit `{ticks: 0, tempo: 120}` entry.
    pub tempo_changes: Vec<TempoChange>,
    pub loop_points: LoopPoints,
    /// MIDI port of each track.
    pub port_of: Vec<u8>,
    /// Channels with note-ons, per track.
    pub used_channels: Vec<BTreeSet<u8>>,
    /// Tick of the earliest note-on in the file.
    pub first_note_on: u32,
    /// Largest final-message tick over all tracks.
    pub last_event_tick: u32,
    /// Song length in seconds, following the tempo map.
    pub duration: f64,
    /// Bytes of the Track Name meta that named the file.
    pub raw_name: Vec<u8>,
    /// Display name.
    pub name: String,
    /// Per-track names (empty when a track has none).
    pub track_names: Vec<String>,
    /// Copyright notices, newline separated.
    pub copyright: String,
    /// Raw lyric payloads in file order.
    pub lyrics: Vec<Vec<u8>>,
    /// Tick of every entry in `lyrics`.
    pub lyric_ticks: Vec<u32>,
    /// Lowest and highest note-on key.
    pub key_range: (u8, u8),
    /// Soft Karaoke file: text events carry the lyrics.
    #[serde(default)]
    pub is_karaoke: bool,
    /// Bank offset declared by an RMID container with an embedded bank.
    #[serde(default)]
    pub bank_offset: u16,
}

impl ParsedMidi {
    /// Number of tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Converts an absolute tick position to seconds by walking the tempo map.
    ///
    /// # Arguments
    ///
    /// * `ticks` - Absolute position in ticks
    ///
    /// # Returns
    ///
    /// Time in seconds from the start of the song
    pub fn ticks_to_seconds(&self, ticks: u32) -> f64 {
        let division = self.division.max(1) as f64;
        let mut remaining = ticks;
        let mut seconds = 0.0;

        // Most recent first: every change that starts before the remaining span
        // covers the ticks between its position and the span's end.
        for change in &self.tempo_changes {
            if remaining == 0 {
                break;
            }
            if change.ticks < remaining {
                let span = (remaining - change.ticks) as f64;
                seconds += span * 60.0 / (change.tempo * division);
                remaining = change.ticks;
            }
        }

        seconds
    }

    /// Tempo in effect at `ticks`.
    pub fn tempo_at(&self, ticks: u32) -> f64 {
        self.tempo_changes
            .iter()
            .find(|change| change.ticks <= ticks)
            .map(|change| change.tempo)
            .unwrap_or(DEFAULT_TEMPO as f64)
    }

    /// Seconds of the first note-on, used when playback skips leading silence.
    pub fn first_note_on_seconds(&self) -> f64 {
        self.ticks_to_seconds(self.first_note_on)
    }

    /// Loop start and end in seconds.
    pub fn loop_seconds(&self) -> (f64, f64) {
        (
            self.ticks_to_seconds(self.loop_points.start),
            self.ticks_to_seconds(self.loop_points.end),
        )
    }

    /// Total number of messages across all tracks.
    pub fn message_count(&self) -> usize {
        self.tracks.iter().map(Vec::len).sum()
    }

    /// Recomputes the derived timing fields after the tracks were edited.
    pub fn recompute_timing(&mut self) {
        self.last_event_tick = self
            .tracks
            .iter()
            .filter_map(|track| track.last().map(|m| m.ticks))
            .max()
            .unwrap_or(0);
        self.duration = self.ticks_to_seconds(self.last_event_tick);
    }
}

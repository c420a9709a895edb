//! MIDI file data: decoding, encoding, and snapshot rewriting.
//!
//! This module provides the message codec, the Standard MIDI File parser
//! and writer, and the rewriter that bakes locked channel parameters back
//! into a parsed file.

mod message;
mod parser;
mod rewrite;
mod sequence;
pub mod vlq;
mod writer;

pub use message::{
    classify_channel, controller, fixed_payload_length, meta, normalize_event, status,
    ChannelClass, EventKind, MidiMessage,
};
pub use parser::{parse_midi, MidiFileParser, NameEncoding, ParseError};
pub use rewrite::{apply_snapshot_to_midi, modify_midi, ChannelEdits, RewriteReport};
pub use sequence::{LoopPoints, ParsedMidi, TempoChange, Track};
pub use writer::{export_to_midi, write_midi};

#[cfg(test)]
pub(crate) use sequence::tests::sequence_with;

/// Tempo assumed until the first Set Tempo event, in beats per minute.
pub const DEFAULT_TEMPO: u32 = 120;

/// Number of MIDI channels per port.
pub const CHANNELS_PER_PORT: usize = 16;

/// The General MIDI percussion channel (channel 10, zero-based 9).
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Byte-level builders for test files.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::vlq::write_vlq;

    /// Encodes `(delta, event bytes)` pairs into a track body.
    pub(crate) fn track_bytes(events: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (delta, bytes) in events {
            write_vlq(*delta, &mut out);
            out.extend_from_slice(bytes);
        }
        out
    }

    /// Wraps track bodies in an MThd header and MTrk chunks.
    pub(crate) fn build_smf(format: u16, division: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"MThd");
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&format.to_be_bytes());
        out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        out.extend_from_slice(&division.to_be_bytes());
        for track in tracks {
            out.extend_from_slice(b"MTrk");
            out.extend_from_slice(&(track.len() as u32).to_be_bytes());
            out.extend_from_slice(track);
        }
        out
    }
}

//! Standard MIDI File (SMF) export.
//!
//! Writes a [`ParsedMidi`] back to a .mid file. Every message is written as
//! stored; channel-voice messages use running status, which is cancelled
//! after every meta or sysex event so strict readers accept the output.

use super::message::{classify_channel, meta, status, ChannelClass, MidiMessage};
use super::sequence::ParsedMidi;
use super::vlq::write_vlq;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes a single message (without delta time), updating the running status.
fn write_event(message: &MidiMessage, running_status: &mut Option<u8>, buffer: &mut Vec<u8>) {
    if message.is_meta() {
        // Meta event: FF type len data
        buffer.push(status::META);
        buffer.push(message.status);
        write_vlq(message.data.len() as u32, buffer);
        buffer.extend_from_slice(&message.data);
        *running_status = None;
        return;
    }

    match classify_channel(message.status) {
        ChannelClass::Voice(_) => {
            if *running_status != Some(message.status) {
                buffer.push(message.status);
                *running_status = Some(message.status);
            }
            buffer.extend_from_slice(&message.data);
        }
        ChannelClass::Sysex => {
            // F0 len data (data already ends with F7)
            buffer.push(status::SYSTEM_EXCLUSIVE);
            write_vlq(message.data.len() as u32, buffer);
            buffer.extend_from_slice(&message.data);
            *running_status = None;
        }
        ChannelClass::System if message.status == status::SYSEX_ESCAPE => {
            buffer.push(status::SYSEX_ESCAPE);
            write_vlq(message.data.len() as u32, buffer);
            buffer.extend_from_slice(&message.data);
            *running_status = None;
        }
        ChannelClass::System | ChannelClass::Meta => {
            buffer.push(message.status);
            buffer.extend_from_slice(&message.data);
            *running_status = None;
        }
    }
}

/// Builds the track chunk body, converting absolute ticks to delta times.
///
/// A missing End of Track event is appended at the last tick.
fn build_track_data(track: &[MidiMessage]) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut running_status = None;
    let mut last_tick = 0u32;

    for message in track {
        let delta = message.ticks.saturating_sub(last_tick);
        write_vlq(delta, &mut buffer);
        write_event(message, &mut running_status, &mut buffer);
        last_tick = last_tick.max(message.ticks);
    }

    let terminated = track
        .last()
        .is_some_and(|m| m.is_meta() && m.status == meta::END_OF_TRACK);
    if !terminated {
        buffer.extend_from_slice(&[0x00, status::META, meta::END_OF_TRACK, 0x00]);
    }

    buffer
}

/// Appends a track chunk.
fn push_track_chunk(out: &mut Vec<u8>, track_data: &[u8]) {
    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
    out.extend_from_slice(track_data);
}

/// Appends the MThd chunk.
fn push_header(out: &mut Vec<u8>, format: u16, tracks: u16, division: u16) {
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&format.to_be_bytes());
    out.extend_from_slice(&tracks.to_be_bytes());
    out.extend_from_slice(&division.to_be_bytes());
}

/// Encodes a parsed file as Standard MIDI File bytes.
pub fn write_midi(midi: &ParsedMidi) -> Vec<u8> {
    // A single-track format cannot hold several tracks
    let format = if midi.format == 0 && midi.tracks.len() > 1 {
        tracing::warn!(
            "Writing {} tracks as format 1 instead of format 0",
            midi.tracks.len()
        );
        1
    } else {
        midi.format
    };

    let mut out = Vec::new();
    push_header(&mut out, format, midi.tracks.len() as u16, midi.division);
    for track in &midi.tracks {
        push_track_chunk(&mut out, &build_track_data(track));
    }
    out
}

/// Exports a parsed file to a Standard MIDI File on disk.
///
/// # Arguments
///
/// * `midi` - The file to export
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn export_to_midi<P: AsRef<Path>>(midi: &ParsedMidi, path: P) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&write_midi(midi))?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::fixtures::{build_smf, track_bytes};
    use crate::midi::parse_midi;

    fn sample_file() -> Vec<u8> {
        let conductor = track_bytes(&[
            (0, vec![0xFF, 0x03, 0x04, b'D', b'e', b'm', b'o']),
            (0, vec![0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]),
            (0, vec![0xF0, 0x0A, 0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x41, 0xF7]),
            (0, vec![0xFF, 0x2F, 0x00]),
        ]);
        let melody = track_bytes(&[
            (0, vec![0xC0, 0x10]),
            (0, vec![0xB0, 0x07, 0x64]),
            (0, vec![0x90, 60, 100]),
            (240, vec![64, 100]),
            (240, vec![0x80, 60, 0]),
            (0, vec![0x80, 64, 0]),
            (0, vec![0xFF, 0x2F, 0x00]),
        ]);
        build_smf(1, 480, &[conductor, melody])
    }

    #[test]
    fn test_write_reparses_identically() {
        let original = parse_midi(&sample_file()).unwrap();
        let written = write_midi(&original);
        let reparsed = parse_midi(&written).unwrap();

        assert_eq!(reparsed.tracks, original.tracks);
        assert_eq!(reparsed.division, 480);
        assert_eq!(reparsed.name, "Demo");
    }

    #[test]
    fn test_written_file_is_readable_by_midly() {
        let original = parse_midi(&sample_file()).unwrap();
        let written = write_midi(&original);

        let smf = midly::Smf::parse(&written).unwrap();
        assert_eq!(smf.tracks.len(), 2);
        assert_eq!(smf.tracks[0].len(), original.tracks[0].len());
        assert_eq!(smf.tracks[1].len(), original.tracks[1].len());
        match smf.header.timing {
            midly::Timing::Metrical(tpb) => assert_eq!(tpb.as_int(), 480),
            other => panic!("unexpected timing {:?}", other),
        }

        let note_ons = smf.tracks[1]
            .iter()
            .filter(|event| {
                matches!(
                    event.kind,
                    midly::TrackEventKind::Midi {
                        message: midly::MidiMessage::NoteOn { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(note_ons, 2);
    }

    #[test]
    fn test_export_writes_the_encoded_bytes() {
        let original = parse_midi(&sample_file()).unwrap();
        let path = std::env::temp_dir().join(format!("midiseq_export_{}.mid", std::process::id()));

        export_to_midi(&original, &path).unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(on_disk, write_midi(&original));
        assert_eq!(&on_disk[..4], b"MThd");
    }

    #[test]
    fn test_running_status_compression() {
        let track = vec![
            MidiMessage::note_on(0, 0, 60, 100),
            MidiMessage::note_on(0, 0, 64, 100),
            MidiMessage::meta(0, meta::MARKER, b"x".to_vec()),
            MidiMessage::note_on(10, 0, 67, 100),
        ];
        let data = build_track_data(&track);
        assert_eq!(
            data,
            vec![
                0x00, 0x90, 60, 100, // explicit status
                0x00, 64, 100, // running status
                0x00, 0xFF, 0x06, 0x01, b'x', // meta cancels running status
                0x0A, 0x90, 67, 100, // status written again
                0x00, 0xFF, 0x2F, 0x00, // appended end of track
            ]
        );
    }
}

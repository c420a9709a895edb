//! Standard MIDI File decoding.
//!
//! Decodes the chunked header/track layout into tracks of absolute-tick
//! messages. While scanning, it also builds the tempo map and loop points,
//! and records port assignments and the channels each track uses.
//!
//! Unlike an import into an editing model, nothing is discarded: every
//! event of every track is kept, so playback and re-export see exactly
//! what the file contains.

use super::message::{
    classify_channel, controller, fixed_payload_length, meta, status, ChannelClass, MidiMessage,
};
use super::sequence::{LoopPoints, ParsedMidi, TempoChange, Track};
use super::vlq::{read_vlq, VlqError};
use super::DEFAULT_TEMPO;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

const HEADER_MAGIC: &[u8; 4] = b"MThd";
const TRACK_MAGIC: &[u8; 4] = b"MTrk";
const HEADER_SIZE: u32 = 6;

/// Text event that marks a Soft Karaoke (.kar) file.
const KARAOKE_SIGNATURE: &[u8] = b"@KMIDI KARAOKE FILE";

/// Errors that abort decoding of a MIDI file.
///
/// All of them are fatal for the file; no partial result is produced.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid header chunk: expected {expected:?}, found {found:?}")]
    InvalidHeader {
        expected: &'static str,
        found: String,
    },

    #[error("invalid header size: expected {expected}, found {found}")]
    InvalidHeaderSize { expected: u32, found: u32 },

    #[error("invalid chunk type for track {track}: expected {expected:?}, found {found:?}")]
    InvalidTrackHeader {
        track: usize,
        expected: &'static str,
        found: String,
    },

    #[error("data byte without a preceding status byte in track {track} at offset {offset}")]
    RunningStatus { track: usize, offset: usize },

    #[error("unexpected end of data while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("variable-length quantity longer than four bytes in track {track} at offset {offset}")]
    VlqTooLong { track: usize, offset: usize },

    #[error("SMPTE time division {division:#06x} is not supported")]
    SmpteUnsupported { division: u16 },

    #[error("meta event type {meta_type:#04x} out of range in track {track} at offset {offset}")]
    InvalidMetaType {
        track: usize,
        offset: usize,
        meta_type: u8,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Character encoding used for track names and other text metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameEncoding {
    /// Shift-JIS, common in files authored for Japanese sound modules.
    #[default]
    ShiftJis,
    Utf8,
    /// Windows-1252 (Latin-1 superset).
    Windows1252,
}

impl NameEncoding {
    fn encoding(self) -> &'static encoding_rs::Encoding {
        match self {
            NameEncoding::ShiftJis => encoding_rs::SHIFT_JIS,
            NameEncoding::Utf8 => encoding_rs::UTF_8,
            NameEncoding::Windows1252 => encoding_rs::WINDOWS_1252,
        }
    }

    /// Decodes text bytes, replacing malformed sequences and trimming whitespace.
    pub fn decode(self, bytes: &[u8]) -> String {
        let (text, _had_errors) = self.encoding().decode_without_bom_handling(bytes);
        text.trim().to_string()
    }
}

/// Loop end as seen during the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    Unset,
    At(u32),
    /// A loop-end controller repeated; the file's loop end is not trusted.
    Invalidated,
}

/// Everything the scan collects besides the messages themselves.
struct ScanState {
    tempo_changes: Vec<TempoChange>,
    loop_start: Option<u32>,
    loop_end: LoopEnd,
    port_of: Vec<Option<u8>>,
    used_channels: Vec<BTreeSet<u8>>,
    first_note_on: Vec<Option<u32>>,
    track_names: Vec<Vec<u8>>,
    copyright: Vec<Vec<u8>>,
    lyrics: Vec<Vec<u8>>,
    lyric_ticks: Vec<u32>,
    key_range: Option<(u8, u8)>,
    karaoke: bool,
    /// First `@T` title of a karaoke file.
    karaoke_title: Option<Vec<u8>>,
}

impl ScanState {
    fn new(track_count: usize) -> Self {
        Self {
            tempo_changes: vec![TempoChange {
                ticks: 0,
                tempo: DEFAULT_TEMPO as f64,
            }],
            loop_start: None,
            loop_end: LoopEnd::Unset,
            port_of: vec![None; track_count],
            used_channels: vec![BTreeSet::new(); track_count],
            first_note_on: vec![None; track_count],
            track_names: vec![Vec::new(); track_count],
            copyright: Vec::new(),
            lyrics: Vec::new(),
            lyric_ticks: Vec::new(),
            key_range: None,
            karaoke: false,
            karaoke_title: None,
        }
    }

    fn observe(&mut self, track: usize, message: &MidiMessage) {
        // Parsed meta messages hold the meta type in `status`, so check them first
        if message.is_meta() {
            self.observe_meta(track, message);
        } else if let ChannelClass::Voice(channel) = classify_channel(message.status) {
            self.observe_voice(track, channel, message);
        }
    }

    fn observe_voice(&mut self, track: usize, channel: u8, message: &MidiMessage) {
        match message.status & 0xF0 {
            status::NOTE_ON => {
                self.used_channels[track].insert(channel);
                self.first_note_on[track].get_or_insert(message.ticks);
                if let Some(&key) = message.data.first() {
                    self.key_range = Some(match self.key_range {
                        Some((low, high)) => (low.min(key), high.max(key)),
                        None => (key, key),
                    });
                }
            }
            status::CONTROLLER_CHANGE => match message.data.first().copied() {
                Some(controller::BREATH_CONTROLLER | controller::LOOP_START) => {
                    self.loop_start = Some(message.ticks);
                }
                Some(controller::FOOT_CONTROLLER | controller::LOOP_END) => {
                    self.loop_end = match self.loop_end {
                        LoopEnd::Unset => LoopEnd::At(message.ticks),
                        LoopEnd::At(_) | LoopEnd::Invalidated => LoopEnd::Invalidated,
                    };
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn observe_meta(&mut self, track: usize, message: &MidiMessage) {
        match message.status {
            meta::SET_TEMPO => {
                if message.data.len() < 3 {
                    tracing::warn!("Ignoring short Set Tempo event at tick {}", message.ticks);
                    return;
                }
                let microseconds = u32::from_be_bytes([
                    0,
                    message.data[0],
                    message.data[1],
                    message.data[2],
                ]);
                if microseconds == 0 {
                    tracing::warn!("Ignoring zero Set Tempo event at tick {}", message.ticks);
                    return;
                }
                self.tempo_changes
                    .push(TempoChange::from_microseconds(message.ticks, microseconds));
            }
            meta::MARKER => {
                let text = String::from_utf8_lossy(&message.data).trim().to_lowercase();
                match text.as_str() {
                    "start" | "loopstart" => self.loop_start = Some(message.ticks),
                    "loopend" => self.loop_end = LoopEnd::At(message.ticks),
                    _ => {}
                }
            }
            meta::MIDI_PORT => {
                if let Some(&port) = message.data.first() {
                    self.port_of[track] = Some(port);
                }
            }
            meta::TRACK_NAME => {
                if self.track_names[track].is_empty() {
                    self.track_names[track] = message.data.clone();
                }
            }
            meta::COPYRIGHT => self.copyright.push(message.data.clone()),
            // Karaoke files sometimes put their text in lyric events
            meta::LYRIC
                if !self.karaoke && !message.data.trim_ascii().starts_with(KARAOKE_SIGNATURE) =>
            {
                self.lyrics.push(message.data.clone());
                self.lyric_ticks.push(message.ticks);
            }
            meta::LYRIC | meta::TEXT => self.observe_karaoke_text(message),
            _ => {}
        }
    }

    /// Soft Karaoke text: `@` lines are headers, `@T` the title and credits,
    /// everything else a lyric syllable.
    fn observe_karaoke_text(&mut self, message: &MidiMessage) {
        let text = message.data.trim_ascii();
        if text.starts_with(KARAOKE_SIGNATURE) {
            if !self.karaoke {
                tracing::debug!("Soft Karaoke file detected");
            }
            self.karaoke = true;
            return;
        }
        if !self.karaoke {
            return;
        }

        if text.starts_with(b"@T") || text.starts_with(b"@A") {
            let value = text[2..].trim_ascii().to_vec();
            if self.karaoke_title.is_none() {
                self.karaoke_title = Some(value);
            } else {
                self.copyright.push(value);
            }
        } else if !text.starts_with(b"@") {
            self.lyrics.push(karaoke_lyric(&message.data));
            self.lyric_ticks.push(message.ticks);
        }
    }
}

/// Karaoke lyrics start a new line with `/` and a new paragraph with `\`.
fn karaoke_lyric(data: &[u8]) -> Vec<u8> {
    match data.split_first() {
        Some((b'/' | b'\\', rest)) => {
            let mut lyric = Vec::with_capacity(data.len());
            lyric.push(b'\n');
            lyric.extend_from_slice(rest);
            lyric
        }
        _ => data.to_vec(),
    }
}

/// Metadata from the INFO list of an RMID container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RmidInfo {
    /// INAM
    name: Option<Vec<u8>>,
    /// ICOP; replaces the copyright metas of the tracks.
    copyright: Option<Vec<u8>>,
    bank_offset: u16,
}

/// Decoder for Standard MIDI Files (and RMID containers wrapping one).
#[derive(Debug, Clone, Copy, Default)]
pub struct MidiFileParser {
    encoding: NameEncoding,
}

impl MidiFileParser {
    /// Creates a parser using the default (Shift-JIS) name encoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser decoding text metadata with `encoding`.
    pub fn with_encoding(encoding: NameEncoding) -> Self {
        Self { encoding }
    }

    /// Parses a MIDI file held in memory.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the header or a track chunk is malformed,
    /// or a data byte appears before any status byte.
    pub fn parse(&self, bytes: &[u8]) -> Result<ParsedMidi, ParseError> {
        self.parse_named(bytes, "")
    }

    /// Parses a MIDI file, using `fallback_name` when the file carries no name.
    pub fn parse_named(&self, bytes: &[u8], fallback_name: &str) -> Result<ParsedMidi, ParseError> {
        let (smf, rmid) = unwrap_rmid(bytes)?;
        let mut pos = 0;

        let (kind, header) = read_chunk(smf, &mut pos, "header chunk")?;
        if kind != *HEADER_MAGIC {
            return Err(ParseError::InvalidHeader {
                expected: "MThd",
                found: String::from_utf8_lossy(&kind).into_owned(),
            });
        }
        if header.len() != HEADER_SIZE as usize {
            return Err(ParseError::InvalidHeaderSize {
                expected: HEADER_SIZE,
                found: header.len() as u32,
            });
        }

        let format = u16::from_be_bytes([header[0], header[1]]);
        let track_count = u16::from_be_bytes([header[2], header[3]]) as usize;
        let division = u16::from_be_bytes([header[4], header[5]]);
        if division & 0x8000 != 0 {
            return Err(ParseError::SmpteUnsupported { division });
        }

        let mut scan = ScanState::new(track_count);
        let mut tracks: Vec<Track> = Vec::with_capacity(track_count);
        // Format 2 tracks are independent patterns played one after another
        let mut track_start = 0u32;

        for index in 0..track_count {
            let (kind, chunk) = read_chunk(smf, &mut pos, "track chunk")?;
            if kind != *TRACK_MAGIC {
                return Err(ParseError::InvalidTrackHeader {
                    track: index,
                    expected: "MTrk",
                    found: String::from_utf8_lossy(&kind).into_owned(),
                });
            }
            let track = parse_track(index, chunk, track_start, &mut scan)?;
            if format == 2 {
                track_start = track.last().map_or(track_start, |m| m.ticks);
            }
            tracks.push(track);
        }

        Ok(self.finish(format, division, tracks, scan, rmid, fallback_name))
    }

    /// Reads and parses a MIDI file from disk, naming it after the file stem
    /// when it carries no name of its own.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<ParsedMidi, ParseError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.parse_named(&bytes, &stem)
    }

    /// Parses several files in parallel, keeping each file's result separate.
    ///
    /// Intended for loading playlists off the real-time path.
    pub fn parse_playlist(&self, files: &[(String, Vec<u8>)]) -> Vec<Result<ParsedMidi, ParseError>> {
        files
            .par_iter()
            .map(|(name, bytes)| self.parse_named(bytes, name))
            .collect()
    }

    fn finish(
        &self,
        format: u16,
        division: u16,
        tracks: Vec<Track>,
        scan: ScanState,
        rmid: RmidInfo,
        fallback_name: &str,
    ) -> ParsedMidi {
        let last_event_tick = tracks
            .iter()
            .filter_map(|track| track.last().map(|m| m.ticks))
            .max()
            .unwrap_or(0);
        let first_note_on = scan.first_note_on.iter().flatten().copied().min().unwrap_or(0);

        let loop_points = LoopPoints {
            start: scan.loop_start.unwrap_or(first_note_on),
            end: match scan.loop_end {
                LoopEnd::At(ticks) => ticks,
                LoopEnd::Unset | LoopEnd::Invalidated => last_event_tick,
            },
        };

        // Tracks without a port meta share the first port the file declares
        let default_port = scan.port_of.iter().flatten().copied().next().unwrap_or(0);
        let port_of = scan
            .port_of
            .iter()
            .map(|port| port.unwrap_or(default_port))
            .collect();

        // Karaoke title, then the RMID name, then the first track's name
        let named = scan.karaoke_title.clone().or(rmid.name).or_else(|| {
            tracks
                .first()
                .and_then(|track| track.first())
                .filter(|first| first.status == meta::TRACK_NAME)
                .map(|first| first.data.clone())
        });
        let (raw_name, name) = match named {
            Some(raw) => {
                let name = self.encoding.decode(&raw).replace('\n', " ");
                (raw, name)
            }
            None => (Vec::new(), fallback_name.to_string()),
        };

        let track_names = scan
            .track_names
            .iter()
            .map(|raw| self.encoding.decode(raw))
            .collect();
        let copyright = match &rmid.copyright {
            Some(raw) => self.encoding.decode(raw).replace('\n', " "),
            None => scan
                .copyright
                .iter()
                .map(|raw| self.encoding.decode(raw))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        };

        let mut tempo_changes = scan.tempo_changes;
        tempo_changes.reverse();

        let mut midi = ParsedMidi {
            format,
            division,
            tracks,
            tempo_changes,
            loop_points,
            port_of,
            used_channels: scan.used_channels,
            first_note_on,
            last_event_tick,
            duration: 0.0,
            raw_name,
            name,
            track_names,
            copyright,
            lyrics: scan.lyrics,
            lyric_ticks: scan.lyric_ticks,
            key_range: scan.key_range.unwrap_or((0, 127)),
            is_karaoke: scan.karaoke,
            bank_offset: rmid.bank_offset,
        };
        midi.duration = midi.ticks_to_seconds(last_event_tick);

        tracing::debug!(
            "Parsed \"{}\": {} tracks, {} messages, {:.2}s",
            midi.name,
            midi.tracks.len(),
            midi.message_count(),
            midi.duration
        );
        midi
    }
}

/// Parses MIDI bytes with the default parser settings.
pub fn parse_midi(bytes: &[u8]) -> Result<ParsedMidi, ParseError> {
    MidiFileParser::new().parse(bytes)
}

/// Decodes the events of one track chunk.
fn parse_track(
    index: usize,
    data: &[u8],
    start_ticks: u32,
    scan: &mut ScanState,
) -> Result<Track, ParseError> {
    let mut track = Track::new();
    let mut pos = 0;
    let mut ticks = start_ticks;
    let mut running_status: Option<u8> = None;

    while pos < data.len() {
        let delta = read_track_vlq(data, &mut pos, index, "delta time")?;
        ticks = ticks.saturating_add(delta);

        let byte = *data.get(pos).ok_or(ParseError::UnexpectedEof {
            context: "status byte",
        })?;
        let status_byte = if byte >= 0x80 {
            pos += 1;
            byte
        } else {
            // Data byte: reuse the previous voice status without consuming it
            running_status.ok_or(ParseError::RunningStatus { track: index, offset: pos })?
        };

        let message = match classify_channel(status_byte) {
            ChannelClass::Meta => {
                let meta_type = *data.get(pos).ok_or(ParseError::UnexpectedEof {
                    context: "meta event type",
                })?;
                // Meta types live below 0x80 so they never collide with a voice status
                if meta_type >= 0x80 {
                    return Err(ParseError::InvalidMetaType {
                        track: index,
                        offset: pos,
                        meta_type,
                    });
                }
                pos += 1;
                let length = read_track_vlq(data, &mut pos, index, "meta event length")?;
                let payload = take(data, &mut pos, length as usize, "meta event data")?;
                MidiMessage::meta(ticks, meta_type, payload.to_vec())
            }
            ChannelClass::Sysex => {
                let length = read_track_vlq(data, &mut pos, index, "sysex length")?;
                let payload = take(data, &mut pos, length as usize, "sysex data")?;
                MidiMessage::sysex(ticks, payload.to_vec())
            }
            ChannelClass::System if status_byte == status::SYSEX_ESCAPE => {
                let length = read_track_vlq(data, &mut pos, index, "escape length")?;
                let payload = take(data, &mut pos, length as usize, "escape data")?;
                MidiMessage::new(ticks, status_byte, payload.to_vec())
            }
            ChannelClass::System => MidiMessage::new(ticks, status_byte, Vec::new()),
            ChannelClass::Voice(_) => {
                running_status = Some(status_byte);
                let length = fixed_payload_length(status_byte).unwrap_or(0);
                let payload = take(data, &mut pos, length, "channel message data")?;
                MidiMessage::new(ticks, status_byte, payload.iter().map(|b| b & 0x7F).collect())
            }
        };

        scan.observe(index, &message);
        track.push(message);
    }

    Ok(track)
}

fn read_track_vlq(
    data: &[u8],
    pos: &mut usize,
    track: usize,
    context: &'static str,
) -> Result<u32, ParseError> {
    let offset = *pos;
    read_vlq(data, pos).map_err(|e| match e {
        VlqError::Truncated => ParseError::UnexpectedEof { context },
        VlqError::TooLong => ParseError::VlqTooLong { track, offset },
    })
}

fn take<'a>(
    data: &'a [u8],
    pos: &mut usize,
    length: usize,
    context: &'static str,
) -> Result<&'a [u8], ParseError> {
    let end = pos
        .checked_add(length)
        .filter(|&end| end <= data.len())
        .ok_or(ParseError::UnexpectedEof { context })?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

/// Reads a 4-byte tag and a big-endian length-prefixed chunk body.
///
/// A declared length running past the end of the buffer is clamped to the
/// bytes available, as many writers miscount the final track.
fn read_chunk<'a>(
    bytes: &'a [u8],
    pos: &mut usize,
    context: &'static str,
) -> Result<([u8; 4], &'a [u8]), ParseError> {
    let head = take(bytes, pos, 8, context)?;
    let kind = [head[0], head[1], head[2], head[3]];
    let declared = u32::from_be_bytes([head[4], head[5], head[6], head[7]]) as usize;

    let available = bytes.len() - *pos;
    if declared > available {
        tracing::warn!(
            "Chunk {:?} declares {} bytes but only {} remain",
            String::from_utf8_lossy(&kind),
            declared,
            available
        );
    }
    let length = declared.min(available);
    let body = &bytes[*pos..*pos + length];
    *pos += length;
    Ok((kind, body))
}

/// Iterates the `(id, body)` chunks of a RIFF list, little-endian sizes,
/// bodies padded to even lengths.
fn riff_chunks(bytes: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if pos + 8 > bytes.len() {
            return None;
        }
        let id = [bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]];
        let size = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
            as usize;
        let start = pos + 8;
        let end = start.saturating_add(size).min(bytes.len());
        pos = end + (size & 1);
        Some((id, &bytes[start..end]))
    })
}

/// INFO text values are often NUL-terminated.
fn info_text(body: &[u8]) -> Vec<u8> {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    body[..end].to_vec()
}

/// Returns the SMF payload of an RMID (RIFF) container with its INFO
/// metadata, or the input unchanged.
fn unwrap_rmid(bytes: &[u8]) -> Result<(&[u8], RmidInfo), ParseError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"RMID" {
        return Ok((bytes, RmidInfo::default()));
    }

    let mut smf = None;
    let mut info = RmidInfo::default();
    let mut has_info = false;
    let mut declared_offset = None;
    let mut embedded_bank = false;
    let mut dls = false;

    for (id, body) in riff_chunks(&bytes[12..]) {
        match &id {
            b"data" if smf.is_none() => smf = Some(body),
            b"RIFF" if body.len() >= 4 => match &body[0..4] {
                b"sfbk" | b"sfpk" => embedded_bank = true,
                b"DLS " | b"dls " => {
                    embedded_bank = true;
                    dls = true;
                }
                other => tracing::warn!(
                    "Unknown RIFF chunk in RMID: {:?}",
                    String::from_utf8_lossy(other)
                ),
            },
            b"LIST" if body.starts_with(b"INFO") => {
                has_info = true;
                for (tag, value) in riff_chunks(&body[4..]) {
                    match &tag {
                        b"INAM" => info.name = Some(info_text(value)),
                        b"ICOP" => info.copyright = Some(info_text(value)),
                        b"DBNK" if value.len() >= 2 => {
                            declared_offset = Some(u16::from_le_bytes([value[0], value[1]]));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    // An INFO list implies an offset of 1 unless DBNK says otherwise; the
    // offset only matters for a bank embedded in the file.
    info.bank_offset = match (embedded_bank && !dls, has_info) {
        (true, true) => declared_offset.unwrap_or(1),
        _ => 0,
    };

    let smf = smf.ok_or_else(|| ParseError::InvalidHeader {
        expected: "RMID data chunk",
        found: "RIFF without data chunk".to_string(),
    })?;
    Ok((smf, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::fixtures::{build_smf, track_bytes};

    #[test]
    fn test_running_status() {
        let track = vec![0x00, 0x90, 60, 100, 0x0A, 62, 100, 0x0A, 0x80, 60, 0];
        let midi = parse_midi(&build_smf(1, 480, &[track])).unwrap();

        let messages = &midi.tracks[0];
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].status, 0x90);
        assert_eq!(messages[1].data, vec![62, 100]);
        assert_eq!(messages[1].ticks, 10);
        assert_eq!(messages[2].status, 0x80);
        assert_eq!(messages[2].ticks, 20);
    }

    #[test]
    fn test_running_status_without_status_fails() {
        let track = vec![0x00, 60, 100];
        let err = parse_midi(&build_smf(1, 480, &[track])).unwrap_err();
        assert!(matches!(err, ParseError::RunningStatus { track: 0, offset: 1 }));
    }

    #[test]
    fn test_set_tempo() {
        // 500,000 microseconds per quarter note = 120 BPM
        let track = vec![0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, 0x00, 0xFF, 0x2F, 0x00];
        let midi = parse_midi(&build_smf(1, 480, &[track])).unwrap();
        assert_eq!(midi.tempo_changes.len(), 2);
        assert_eq!(midi.tempo_changes[0].tempo, 120.0);
        assert_eq!(midi.tempo_changes[0].ticks, 0);
        // The implicit entry is last after reversal
        assert_eq!(midi.tempo_changes[1].tempo, 120.0);
    }

    #[test]
    fn test_tempo_map_is_most_recent_first() {
        let track = track_bytes(&[
            (0, vec![0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40]), // 60 BPM
            (960, vec![0xFF, 0x51, 0x03, 0x03, 0xD0, 0x90]), // 240 BPM
            (0, vec![0xFF, 0x2F, 0x00]),
        ]);
        let midi = parse_midi(&build_smf(1, 480, &[track])).unwrap();
        let ticks: Vec<u32> = midi.tempo_changes.iter().map(|t| t.ticks).collect();
        assert_eq!(ticks, vec![960, 0, 0]);
        assert_eq!(midi.tempo_at(1000), 240.0);
        assert_eq!(midi.tempo_at(500), 60.0);
    }

    #[test]
    fn test_loop_defaults() {
        let track = track_bytes(&[
            (0, vec![0xC0, 5]),
            (240, vec![0x90, 60, 100]),
            (240, vec![0x80, 60, 0]),
            (100, vec![0xFF, 0x2F, 0x00]),
        ]);
        let midi = parse_midi(&build_smf(1, 480, &[track])).unwrap();
        assert_eq!(midi.first_note_on, 240);
        assert_eq!(midi.last_event_tick, 580);
        assert_eq!(midi.loop_points, LoopPoints { start: 240, end: 580 });
    }

    #[test]
    fn test_loop_end_invalidated_by_repeat() {
        let track = track_bytes(&[
            (0, vec![0x90, 60, 100]),
            (100, vec![0xB0, 117, 0]),
            (100, vec![0xB0, 117, 0]),
            (100, vec![0x80, 60, 0]),
        ]);
        let midi = parse_midi(&build_smf(1, 480, &[track])).unwrap();
        assert_eq!(midi.loop_points.end, midi.last_event_tick);
        assert_eq!(midi.loop_points.end, 300);
    }

    #[test]
    fn test_loop_points_from_controllers_and_markers() {
        let track = track_bytes(&[
            (0, vec![0x90, 60, 100]),
            (120, vec![0xB0, 116, 0]),
            (360, vec![0xB0, 117, 0]),
            (120, vec![0x80, 60, 0]),
        ]);
        let midi = parse_midi(&build_smf(1, 480, &[track])).unwrap();
        assert_eq!(midi.loop_points, LoopPoints { start: 120, end: 480 });

        let track = track_bytes(&[
            (0, vec![0x90, 60, 100]),
            (50, vec![0xFF, 0x06, 0x0B, b' ', b'L', b'o', b'o', b'p', b'S', b't', b'a', b'r', b't', b' ']),
            (50, vec![0xFF, 0x06, 0x07, b'l', b'o', b'o', b'p', b'E', b'n', b'd']),
            (50, vec![0x80, 60, 0]),
        ]);
        let midi = parse_midi(&build_smf(1, 480, &[track])).unwrap();
        assert_eq!(midi.loop_points, LoopPoints { start: 50, end: 100 });
    }

    #[test]
    fn test_header_errors() {
        let mut bytes = build_smf(1, 480, &[vec![0x00, 0xFF, 0x2F, 0x00]]);
        bytes[0] = b'X';
        assert!(matches!(
            parse_midi(&bytes),
            Err(ParseError::InvalidHeader { expected: "MThd", .. })
        ));

        let mut bytes = build_smf(1, 480, &[vec![0x00, 0xFF, 0x2F, 0x00]]);
        bytes[7] = 7;
        bytes.insert(14, 0);
        assert!(matches!(
            parse_midi(&bytes),
            Err(ParseError::InvalidHeaderSize { expected: 6, found: 7 })
        ));

        let mut bytes = build_smf(1, 480, &[vec![0x00, 0xFF, 0x2F, 0x00]]);
        bytes[14..18].copy_from_slice(b"MTrx");
        match parse_midi(&bytes) {
            Err(ParseError::InvalidTrackHeader { track, found, .. }) => {
                assert_eq!(track, 0);
                assert_eq!(found, "MTrx");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_smpte_division_rejected() {
        let bytes = build_smf(1, 0xE728, &[vec![0x00, 0xFF, 0x2F, 0x00]]);
        assert!(matches!(
            parse_midi(&bytes),
            Err(ParseError::SmpteUnsupported { division: 0xE728 })
        ));
    }

    #[test]
    fn test_sysex_keeps_terminator() {
        let track = track_bytes(&[
            (0, vec![0xF0, 0x05, 0x7E, 0x7F, 0x09, 0x01, 0xF7]),
            (0, vec![0xFF, 0x2F, 0x00]),
        ]);
        let midi = parse_midi(&build_smf(0, 96, &[track])).unwrap();
        let sysex = &midi.tracks[0][0];
        assert!(sysex.is_sysex());
        assert_eq!(sysex.data, vec![0x7E, 0x7F, 0x09, 0x01, 0xF7]);
    }

    #[test]
    fn test_ports_and_used_channels() {
        let track0 = track_bytes(&[(0, vec![0xFF, 0x2F, 0x00])]);
        let track1 = track_bytes(&[
            (0, vec![0xFF, 0x21, 0x01, 0x01]),
            (0, vec![0x93, 60, 100]),
            (10, vec![0x83, 60, 0]),
        ]);
        let track2 = track_bytes(&[(0, vec![0xB5, 7, 100]), (5, vec![0x95, 40, 90])]);
        let midi = parse_midi(&build_smf(1, 480, &[track0, track1, track2])).unwrap();

        assert_eq!(midi.port_of, vec![1, 1, 1]);
        assert!(midi.used_channels[0].is_empty());
        assert_eq!(midi.used_channels[1].iter().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(midi.used_channels[2].iter().copied().collect::<Vec<_>>(), vec![5]);
        assert_eq!(midi.first_note_on, 0);
        assert_eq!(midi.key_range, (40, 60));
    }

    #[test]
    fn test_name_from_first_track_name() {
        let track = track_bytes(&[
            (0, vec![0xFF, 0x03, 0x04, b'S', b'o', b'n', b'g']),
            (0, vec![0xFF, 0x2F, 0x00]),
        ]);
        let midi = MidiFileParser::new()
            .parse_named(&build_smf(1, 480, &[track]), "fallback")
            .unwrap();
        assert_eq!(midi.name, "Song");
        assert_eq!(midi.raw_name, b"Song".to_vec());

        // Shift-JIS katakana "a"
        let track = track_bytes(&[(0, vec![0xFF, 0x03, 0x02, 0x83, 0x41])]);
        let midi = parse_midi(&build_smf(1, 480, &[track])).unwrap();
        assert_eq!(midi.name, "\u{30A2}");

        let track = track_bytes(&[(0, vec![0x90, 60, 100]), (0, vec![0xFF, 0x03, 0x01, b'X'])]);
        let midi = MidiFileParser::new()
            .parse_named(&build_smf(1, 480, &[track]), "fallback")
            .unwrap();
        assert_eq!(midi.name, "fallback");
        assert_eq!(midi.track_names[0], "X");
    }

    #[test]
    fn test_rmid_container() {
        let smf = build_smf(0, 96, &[track_bytes(&[(0, vec![0x90, 60, 1])])]);
        let mut riff = Vec::new();
        riff.extend_from_slice(b"RIFF");
        riff.extend_from_slice(&((smf.len() + 12) as u32).to_le_bytes());
        riff.extend_from_slice(b"RMID");
        riff.extend_from_slice(b"data");
        riff.extend_from_slice(&(smf.len() as u32).to_le_bytes());
        riff.extend_from_slice(&smf);

        let midi = parse_midi(&riff).unwrap();
        assert_eq!(midi.tracks[0].len(), 1);
        assert_eq!(midi.division, 96);
    }

    fn riff_chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(id);
        chunk.extend_from_slice(&(body.len() as u32).to_le_bytes());
        chunk.extend_from_slice(body);
        if body.len() % 2 == 1 {
            chunk.push(0);
        }
        chunk
    }

    fn rmid(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut riff = Vec::new();
        riff.extend_from_slice(b"RIFF");
        riff.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        riff.extend_from_slice(b"RMID");
        riff.extend_from_slice(&body);
        riff
    }

    #[test]
    fn test_rmid_info_overrides_name_and_copyright() {
        let smf = build_smf(
            1,
            96,
            &[track_bytes(&[
                (0, vec![0xFF, 0x03, 0x05, b'T', b'r', b'a', b'c', b'k']),
                (0, vec![0xFF, 0x02, 0x03, b'(', b'c', b')']),
                (0, vec![0x90, 60, 1]),
            ])],
        );
        let mut info = b"INFO".to_vec();
        info.extend(riff_chunk(b"INAM", b"Title\0"));
        info.extend(riff_chunk(b"ICOP", b"Line one\nline two"));
        info.extend(riff_chunk(b"DBNK", &[2, 0]));

        let with_bank = rmid(&[
            riff_chunk(b"data", &smf),
            riff_chunk(b"LIST", &info),
            riff_chunk(b"RIFF", b"sfbk"),
        ]);
        let midi = parse_midi(&with_bank).unwrap();
        assert_eq!(midi.name, "Title");
        assert_eq!(midi.raw_name, b"Title".to_vec());
        assert_eq!(midi.copyright, "Line one line two");
        assert_eq!(midi.bank_offset, 2);

        // Without an embedded bank the offset does not apply
        let without_bank = rmid(&[riff_chunk(b"data", &smf), riff_chunk(b"LIST", &info)]);
        assert_eq!(parse_midi(&without_bank).unwrap().bank_offset, 0);

        // No INFO list: the file's own metadata stands
        let plain = rmid(&[riff_chunk(b"data", &smf), riff_chunk(b"RIFF", b"sfbk")]);
        let midi = parse_midi(&plain).unwrap();
        assert_eq!(midi.name, "Track");
        assert_eq!(midi.copyright, "(c)");
        assert_eq!(midi.bank_offset, 0);
    }

    #[test]
    fn test_karaoke_text_becomes_lyrics() {
        fn text(kind: u8, body: &[u8]) -> Vec<u8> {
            let mut event = vec![0xFF, kind, body.len() as u8];
            event.extend_from_slice(body);
            event
        }
        let track = track_bytes(&[
            (0, text(0x01, b"@KMIDI KARAOKE FILE")),
            (0, text(0x01, b"@V0100")),
            (0, text(0x01, b"@TMy Song")),
            (0, text(0x01, b"@T Sequenced by someone ")),
            (100, text(0x01, b"Hel")),
            (100, text(0x05, b"/lo")),
            (0, vec![0x90, 60, 100]),
        ]);
        let midi = MidiFileParser::with_encoding(NameEncoding::Utf8)
            .parse(&build_smf(0, 480, &[track]))
            .unwrap();

        assert!(midi.is_karaoke);
        assert_eq!(midi.name, "My Song");
        assert_eq!(midi.copyright, "Sequenced by someone");
        assert_eq!(midi.lyrics, vec![b"Hel".to_vec(), b"\nlo".to_vec()]);
        assert_eq!(midi.lyric_ticks, vec![100, 200]);
    }

    #[test]
    fn test_plain_text_is_not_lyrics() {
        let track = track_bytes(&[
            (0, vec![0xFF, 0x01, 0x02, b'h', b'i']),
            (10, vec![0xFF, 0x05, 0x02, b'l', b'a']),
        ]);
        let midi = parse_midi(&build_smf(0, 480, &[track])).unwrap();
        assert!(!midi.is_karaoke);
        assert_eq!(midi.lyrics, vec![b"la".to_vec()]);
        assert_eq!(midi.lyric_ticks, vec![10]);
    }

    #[test]
    fn test_format_2_tracks_follow_each_other() {
        let first = track_bytes(&[
            (0, vec![0x90, 60, 100]),
            (480, vec![0x80, 60, 0]),
            (0, vec![0xFF, 0x2F, 0x00]),
        ]);
        let second = track_bytes(&[
            (0, vec![0x90, 64, 100]),
            (240, vec![0x80, 64, 0]),
        ]);
        let tracks = [first, second];

        let midi = parse_midi(&build_smf(2, 480, &tracks)).unwrap();
        assert_eq!(midi.tracks[1][0].ticks, 480);
        assert_eq!(midi.tracks[1][1].ticks, 720);
        assert_eq!(midi.last_event_tick, 720);

        let midi = parse_midi(&build_smf(1, 480, &tracks)).unwrap();
        assert_eq!(midi.tracks[1][0].ticks, 0);
        assert_eq!(midi.last_event_tick, 480);
    }

    #[test]
    fn test_meta_type_above_7f_is_rejected() {
        let empty = vec![0x00, 0xFF, 0x90, 0x00, 0x00, 0xFF, 0x2F, 0x00];
        assert!(matches!(
            parse_midi(&build_smf(1, 480, &[empty])),
            Err(ParseError::InvalidMetaType {
                track: 0,
                offset: 2,
                meta_type: 0x90
            })
        ));

        // Shaped like a note-on, but still a meta event
        let with_payload = vec![0x00, 0xFF, 0x90, 0x02, 0x3C, 0x40, 0x00, 0xFF, 0x2F, 0x00];
        assert!(matches!(
            parse_midi(&build_smf(1, 480, &[with_payload])),
            Err(ParseError::InvalidMetaType { meta_type: 0x90, .. })
        ));
    }

    #[test]
    fn test_truncated_event_is_fatal() {
        let track = vec![0x00, 0x90, 60];
        assert!(matches!(
            parse_midi(&build_smf(1, 480, &[track])),
            Err(ParseError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_parse_playlist_keeps_order() {
        let good = build_smf(1, 480, &[track_bytes(&[(0, vec![0x90, 60, 100])])]);
        let files = vec![
            ("a".to_string(), good.clone()),
            ("b".to_string(), b"junk".to_vec()),
            ("c".to_string(), good),
        ];
        let results = MidiFileParser::new().parse_playlist(&files);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().name, "a");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().name, "c");
    }
}

//! Status-byte classification and the timestamped message type.
//!
//! Everything here is stateless: a status byte maps to a channel class, a
//! message family, and (for channel-voice families) a fixed payload length.

use serde::{Deserialize, Serialize};

/// Channel-voice message families (high nibble of the status byte).
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROLLER_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;
    pub const SYSTEM_EXCLUSIVE: u8 = 0xF0;
    /// Escaped sysex continuation packet in a file.
    pub const SYSEX_ESCAPE: u8 = 0xF7;
    pub const META: u8 = 0xFF;
    /// System reset on a live MIDI port.
    pub const RESET: u8 = 0xFF;
}

/// Meta event types. A parsed meta message stores one of these in its status byte.
pub mod meta {
    pub const SEQUENCE_NUMBER: u8 = 0x00;
    pub const TEXT: u8 = 0x01;
    pub const COPYRIGHT: u8 = 0x02;
    pub const TRACK_NAME: u8 = 0x03;
    pub const INSTRUMENT_NAME: u8 = 0x04;
    pub const LYRIC: u8 = 0x05;
    pub const MARKER: u8 = 0x06;
    pub const CUE_POINT: u8 = 0x07;
    pub const PROGRAM_NAME: u8 = 0x08;
    pub const CHANNEL_PREFIX: u8 = 0x20;
    pub const MIDI_PORT: u8 = 0x21;
    pub const END_OF_TRACK: u8 = 0x2F;
    pub const SET_TEMPO: u8 = 0x51;
    pub const SMPTE_OFFSET: u8 = 0x54;
    pub const TIME_SIGNATURE: u8 = 0x58;
    pub const KEY_SIGNATURE: u8 = 0x59;
    pub const SEQUENCER_SPECIFIC: u8 = 0x7F;
}

/// Controller numbers the engine interprets.
pub mod controller {
    pub const BANK_SELECT: u8 = 0;
    pub const MODULATION_WHEEL: u8 = 1;
    pub const BREATH_CONTROLLER: u8 = 2;
    pub const FOOT_CONTROLLER: u8 = 4;
    pub const DATA_ENTRY_MSB: u8 = 6;
    pub const MAIN_VOLUME: u8 = 7;
    pub const BALANCE: u8 = 8;
    pub const PAN: u8 = 10;
    pub const EXPRESSION: u8 = 11;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const DATA_ENTRY_LSB: u8 = 38;
    pub const SUSTAIN_PEDAL: u8 = 64;
    pub const TIMBRE_HARMONIC: u8 = 71;
    pub const RELEASE_TIME: u8 = 72;
    pub const ATTACK_TIME: u8 = 73;
    pub const BRIGHTNESS: u8 = 74;
    pub const SOUND_CONTROLLER_9: u8 = 78;
    pub const SOUND_CONTROLLER_10: u8 = 79;
    pub const GENERAL_PURPOSE_6: u8 = 81;
    pub const GENERAL_PURPOSE_8: u8 = 83;
    pub const PORTAMENTO_CONTROL: u8 = 84;
    pub const REVERB_DEPTH: u8 = 91;
    pub const CHORUS_DEPTH: u8 = 93;
    pub const NRPN_LSB: u8 = 98;
    pub const NRPN_MSB: u8 = 99;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
    /// Non-standard loop start marker used by some game soundtracks.
    pub const LOOP_START: u8 = 116;
    /// Non-standard loop end marker used by some game soundtracks.
    pub const LOOP_END: u8 = 117;
}

/// What a status byte addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelClass {
    /// Channel-voice message on channel 0-15.
    Voice(u8),
    /// System common / realtime (0xF1-0xFE), or anything below 0x80.
    System,
    /// Meta event (0xFF).
    Meta,
    /// System exclusive (0xF0).
    Sysex,
}

/// Classifies a status byte by the channel it addresses.
///
/// # Examples
///
/// ```
/// use midiseq::midi::{classify_channel, ChannelClass};
///
/// assert_eq!(classify_channel(0x93), ChannelClass::Voice(3));
/// assert_eq!(classify_channel(0xF0), ChannelClass::Sysex);
/// assert_eq!(classify_channel(0xFF), ChannelClass::Meta);
/// ```
pub fn classify_channel(status: u8) -> ChannelClass {
    match status & 0xF0 {
        0x80..=0xE0 => ChannelClass::Voice(status & 0x0F),
        0xF0 => match status & 0x0F {
            0x0 => ChannelClass::Sysex,
            0xF => ChannelClass::Meta,
            _ => ChannelClass::System,
        },
        _ => ChannelClass::System,
    }
}

/// A status byte split into family and channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKind {
    /// Masked family for voice messages, the unmodified byte otherwise.
    pub family: u8,
    /// Channel for voice messages, `None` otherwise.
    pub channel: Option<u8>,
}

/// Splits a status byte into family and channel.
pub fn normalize_event(status: u8) -> EventKind {
    match classify_channel(status) {
        ChannelClass::Voice(channel) => EventKind {
            family: status & 0xF0,
            channel: Some(channel),
        },
        _ => EventKind {
            family: status,
            channel: None,
        },
    }
}

/// Fixed payload length of a channel-voice family.
///
/// Meta and sysex payloads are VLQ-prefixed and never have a fixed length,
/// so they (and anything else that is not a voice family) yield `None`.
pub fn fixed_payload_length(family: u8) -> Option<usize> {
    match family & 0xF0 {
        status::NOTE_OFF
        | status::NOTE_ON
        | status::POLY_PRESSURE
        | status::CONTROLLER_CHANGE
        | status::PITCH_BEND => Some(2),
        status::PROGRAM_CHANGE | status::CHANNEL_PRESSURE => Some(1),
        _ => None,
    }
}

/// A single timestamped event of a track.
///
/// Meta events keep their meta type in `status`; sysex keeps `0xF0` with the
/// terminating `0xF7` included in `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiMessage {
    /// Absolute position in ticks.
    pub ticks: u32,
    /// Status byte (or meta type for meta events).
    pub status: u8,
    /// Payload bytes following the status byte.
    pub data: Vec<u8>,
}

impl MidiMessage {
    pub fn new(ticks: u32, status: u8, data: Vec<u8>) -> Self {
        Self {
            ticks,
            status,
            data,
        }
    }

    /// Controller change on `channel`.
    pub fn controller_change(ticks: u32, channel: u8, controller: u8, value: u8) -> Self {
        Self::new(
            ticks,
            status::CONTROLLER_CHANGE | (channel & 0x0F),
            vec![controller & 0x7F, value & 0x7F],
        )
    }

    /// Program change on `channel`.
    pub fn program_change(ticks: u32, channel: u8, program: u8) -> Self {
        Self::new(
            ticks,
            status::PROGRAM_CHANGE | (channel & 0x0F),
            vec![program & 0x7F],
        )
    }

    /// Note on on `channel`.
    pub fn note_on(ticks: u32, channel: u8, key: u8, velocity: u8) -> Self {
        Self::new(
            ticks,
            status::NOTE_ON | (channel & 0x0F),
            vec![key & 0x7F, velocity & 0x7F],
        )
    }

    /// Note off on `channel`.
    pub fn note_off(ticks: u32, channel: u8, key: u8) -> Self {
        Self::new(ticks, status::NOTE_OFF | (channel & 0x0F), vec![key & 0x7F, 0])
    }

    /// System exclusive message; `payload` excludes the leading 0xF0 and
    /// must already end with 0xF7.
    pub fn sysex(ticks: u32, payload: Vec<u8>) -> Self {
        Self::new(ticks, status::SYSTEM_EXCLUSIVE, payload)
    }

    /// Meta event of the given type.
    pub fn meta(ticks: u32, meta_type: u8, data: Vec<u8>) -> Self {
        Self::new(ticks, meta_type, data)
    }

    /// True for channel-voice messages (status 0x80-0xEF).
    pub fn is_voice(&self) -> bool {
        matches!(classify_channel(self.status), ChannelClass::Voice(_))
    }

    /// True for meta events, which store a type below 0x80 in `status`.
    pub fn is_meta(&self) -> bool {
        self.status < 0x80
    }

    pub fn is_sysex(&self) -> bool {
        self.status == status::SYSTEM_EXCLUSIVE
    }

    /// Channel of a voice message.
    pub fn channel(&self) -> Option<u8> {
        normalize_event(self.status).channel
    }

    /// Masked family of a voice message, or the raw status otherwise.
    pub fn family(&self) -> u8 {
        normalize_event(self.status).family
    }

    /// A note-on with any velocity (velocity 0 still counts, as in the file scan).
    pub fn is_note_on(&self) -> bool {
        self.is_voice() && self.family() == status::NOTE_ON
    }

    /// Controller number when this is a controller change.
    pub fn controller(&self) -> Option<u8> {
        if self.is_voice() && self.family() == status::CONTROLLER_CHANGE {
            self.data.first().copied()
        } else {
            None
        }
    }

    /// True when this is a controller change for `controller` on `channel`.
    pub fn is_controller(&self, channel: u8, controller: u8) -> bool {
        self.channel() == Some(channel) && self.controller() == Some(controller)
    }

    /// True when this is a program change on `channel`.
    pub fn is_program_change(&self, channel: u8) -> bool {
        self.channel() == Some(channel) && self.family() == status::PROGRAM_CHANGE
    }

    /// Raw bytes as they would appear on a live MIDI port.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() + 1);
        bytes.push(self.status);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

//! System exclusive dialects: Universal (Non-)Realtime, Roland GS, Yamaha XG.
//!
//! Decoding is separated from applying: [`decode_sysex`] turns a payload into
//! a [`SysexCommand`], and the processor applies it. Unknown messages decode
//! to [`SysexCommand::Unrecognized`] and are only logged.

use crate::midi::controller;
use serde::{Deserialize, Serialize};

const UNIVERSAL_NON_REALTIME: u8 = 0x7E;
const UNIVERSAL_REALTIME: u8 = 0x7F;
const ROLAND: u8 = 0x41;
const YAMAHA: u8 = 0x43;

/// Roland GS model id and DT1 (data set) command.
const GS_MODEL: u8 = 0x42;
const SC55_MODEL: u8 = 0x16;
const ROLAND_DATA_SET: u8 = 0x12;
/// Yamaha XG model id.
const XG_MODEL: u8 = 0x4C;

/// GS part number (low nibble of the address byte) to MIDI channel.
///
/// Part 0 is the rhythm part on channel 10; parts 1-9 map to channels 1-9.
/// Source: Roland SC-88 owner's manual, "Parameter Address Map".
pub const GS_PART_TO_CHANNEL: [u8; 16] = [9, 0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 12, 13, 14, 15];

/// GS part number addressing a MIDI channel (inverse of [`GS_PART_TO_CHANNEL`]).
pub fn gs_part_for_channel(channel: u8) -> u8 {
    GS_PART_TO_CHANNEL
        .iter()
        .position(|&c| c == channel & 0x0F)
        .unwrap_or(0) as u8
}

/// Roland checksum over the address and data bytes of a DT1 message.
///
/// Source: Roland SC-55 owner's manual, "Example of a checksum calculation".
pub fn roland_checksum(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    (128 - sum % 128) as u8
}

/// The synthesizer's MIDI system, which decides how bank selects are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMode {
    Gm,
    Gm2,
    #[default]
    Gs,
    Xg,
}

impl std::fmt::Display for SystemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SystemMode::Gm => "GM",
            SystemMode::Gm2 => "GM2",
            SystemMode::Gs => "GS",
            SystemMode::Xg => "XG",
        };
        f.write_str(name)
    }
}

/// A decoded system exclusive message.
#[derive(Debug, Clone, PartialEq)]
pub enum SysexCommand {
    /// Switch system; `reset` also resets every channel.
    SetSystem { system: SystemMode, reset: bool },
    /// Master volume, 0.0 to 1.0.
    MasterVolume(f32),
    /// Master pan, -1.0 (left) to 1.0 (right).
    MasterPan(f32),
    /// Master tuning in cents.
    MasterTuning(f32),
    /// Key shift applied to every channel, in semitones.
    TransposeAll(f32),
    /// Use For Drum Part on a global channel.
    Drums { channel: usize, drums: bool },
    /// Part key shift in semitones.
    KeyShift { channel: usize, semitones: f32 },
    /// Part parameter that maps onto a controller.
    Controller {
        channel: usize,
        controller: u8,
        value: u8,
    },
    /// XG part program change.
    Program { channel: usize, program: u8 },
    Unrecognized,
}

/// Decodes a sysex payload (without the leading 0xF0; a trailing 0xF7 is optional).
///
/// # Arguments
///
/// * `payload` - Message bytes after 0xF0
/// * `channel_offset` - First global channel of the port the message arrived on
/// * `system` - Current system, XG part parameters need XG mode
pub fn decode_sysex(payload: &[u8], channel_offset: usize, system: SystemMode) -> SysexCommand {
    let data = match payload.last() {
        Some(0xF7) => &payload[..payload.len() - 1],
        _ => payload,
    };
    let byte = |i: usize| data.get(i).copied();

    let command = match byte(0) {
        Some(UNIVERSAL_NON_REALTIME) | Some(UNIVERSAL_REALTIME) => decode_universal(data),
        Some(ROLAND) => decode_roland(data, channel_offset),
        Some(YAMAHA) => decode_yamaha(data, channel_offset, system),
        _ => SysexCommand::Unrecognized,
    };

    if command == SysexCommand::Unrecognized {
        tracing::warn!("Unrecognized system exclusive: {}", hex(payload));
    }
    command
}

fn decode_universal(data: &[u8]) -> SysexCommand {
    match (data.get(2), data.get(3)) {
        // Device control
        (Some(0x04), Some(0x01)) => match (data.get(4), data.get(5)) {
            (Some(&lsb), Some(&msb)) => {
                SysexCommand::MasterVolume((((msb as u16) << 7) | lsb as u16) as f32 / 16384.0)
            }
            (Some(&msb), None) => SysexCommand::MasterVolume(msb as f32 / 127.0),
            _ => SysexCommand::Unrecognized,
        },
        (Some(0x04), Some(0x02)) => match (data.get(4), data.get(5)) {
            (Some(&lsb), Some(&msb)) => {
                let balance = (((msb as u16) << 7) | lsb as u16) as f32;
                SysexCommand::MasterPan((balance - 8192.0) / 8192.0)
            }
            _ => SysexCommand::Unrecognized,
        },
        (Some(0x04), Some(0x03)) => match (data.get(5), data.get(6)) {
            (Some(&msb), Some(&lsb)) => {
                let value = (((msb as i32) << 7) | lsb as i32) - 8192;
                SysexCommand::MasterTuning((value as f32 / 81.92).floor())
            }
            _ => SysexCommand::Unrecognized,
        },
        (Some(0x04), Some(0x04)) => match data.get(5) {
            Some(&msb) => SysexCommand::MasterTuning((msb as f32 - 64.0) * 100.0),
            None => SysexCommand::Unrecognized,
        },
        // General MIDI system messages
        (Some(0x09), Some(0x01)) => SysexCommand::SetSystem {
            system: SystemMode::Gm,
            reset: false,
        },
        (Some(0x09), Some(0x03)) => SysexCommand::SetSystem {
            system: SystemMode::Gm2,
            reset: false,
        },
        (Some(0x09), Some(_)) => SysexCommand::SetSystem {
            system: SystemMode::Gs,
            reset: false,
        },
        _ => SysexCommand::Unrecognized,
    }
}

fn decode_roland(data: &[u8], channel_offset: usize) -> SysexCommand {
    if data.len() < 8 || data[3] != ROLAND_DATA_SET {
        return SysexCommand::Unrecognized;
    }
    let value = data[7];

    match data[2] {
        GS_MODEL => {
            if data[6] == 0x7F {
                return match value {
                    0x00 => SysexCommand::SetSystem {
                        system: SystemMode::Gs,
                        reset: true,
                    },
                    0x7F => SysexCommand::SetSystem {
                        system: SystemMode::Gm2,
                        reset: true,
                    },
                    _ => SysexCommand::Unrecognized,
                };
            }
            if data[4] != 0x40 {
                return SysexCommand::Unrecognized;
            }

            if data[5] & 0x10 != 0 {
                let channel = GS_PART_TO_CHANNEL[(data[5] & 0x0F) as usize] as usize + channel_offset;
                return match data[6] {
                    0x15 => SysexCommand::Drums {
                        channel,
                        drums: value > 0 && data[5] >> 4 != 0,
                    },
                    0x16 => SysexCommand::KeyShift {
                        channel,
                        semitones: value as f32 - 64.0,
                    },
                    0x1C if value > 0 => SysexCommand::Controller {
                        channel,
                        controller: controller::PAN,
                        value,
                    },
                    0x21 => SysexCommand::Controller {
                        channel,
                        controller: controller::CHORUS_DEPTH,
                        value,
                    },
                    0x22 => SysexCommand::Controller {
                        channel,
                        controller: controller::REVERB_DEPTH,
                        value,
                    },
                    _ => SysexCommand::Unrecognized,
                };
            }

            match (data[5], data[6]) {
                (0x00, 0x06) => SysexCommand::MasterPan((value as f32 - 64.0) / 64.0),
                (0x00, 0x05) => SysexCommand::MasterTuning((value as f32 - 64.0) * 100.0),
                (0x00, 0x04) => SysexCommand::MasterVolume(value as f32 / 127.0),
                _ => SysexCommand::Unrecognized,
            }
        }
        // SC-55 master volume
        SC55_MODEL if data[4] == 0x10 => SysexCommand::MasterVolume(value as f32 / 100.0),
        _ => SysexCommand::Unrecognized,
    }
}

fn decode_yamaha(data: &[u8], channel_offset: usize, system: SystemMode) -> SysexCommand {
    if data.len() < 7 || data[2] != XG_MODEL {
        return SysexCommand::Unrecognized;
    }
    let value = data[6];

    match (data[3], data[4]) {
        // XG system parameters
        (0x00, 0x00) => match data[5] {
            0x04 => SysexCommand::MasterVolume(value as f32 / 127.0),
            0x06 => SysexCommand::TransposeAll(value as f32 - 64.0),
            0x7E => SysexCommand::SetSystem {
                system: SystemMode::Xg,
                reset: true,
            },
            _ => SysexCommand::Unrecognized,
        },
        // XG part parameters, only meaningful in XG mode
        (0x08, part) if system == SystemMode::Xg => {
            let channel = part as usize + channel_offset;
            match data[5] {
                0x01 => SysexCommand::Controller {
                    channel,
                    controller: controller::BANK_SELECT,
                    value,
                },
                0x02 => SysexCommand::Controller {
                    channel,
                    controller: controller::BANK_SELECT_LSB,
                    value,
                },
                0x03 => SysexCommand::Program {
                    channel,
                    program: value,
                },
                0x08 => SysexCommand::KeyShift {
                    channel,
                    semitones: value as f32 - 64.0,
                },
                0x0B => SysexCommand::Controller {
                    channel,
                    controller: controller::MAIN_VOLUME,
                    value,
                },
                0x0E if value > 0 => SysexCommand::Controller {
                    channel,
                    controller: controller::PAN,
                    value,
                },
                0x12 => SysexCommand::Controller {
                    channel,
                    controller: controller::CHORUS_DEPTH,
                    value,
                },
                0x13 => SysexCommand::Controller {
                    channel,
                    controller: controller::REVERB_DEPTH,
                    value,
                },
                _ => SysexCommand::Unrecognized,
            }
        }
        _ => SysexCommand::Unrecognized,
    }
}

/// True for a Roland GS reset (`41 xx 42 12 40 00 7F 00 ..`).
pub fn is_gs_on(payload: &[u8]) -> bool {
    payload.len() > 6 && payload[0] == ROLAND && payload[2] == GS_MODEL && payload[6] == 0x7F
}

/// True for Universal GM / GM2 system on (`7E xx 09 ..`).
pub fn is_gm_on(payload: &[u8]) -> bool {
    payload.len() > 2 && payload[0] == UNIVERSAL_NON_REALTIME && payload[2] == 0x09
}

/// True for Yamaha XG system on (`43 1x 4C 00 00 7E 00`).
pub fn is_xg_on(payload: &[u8]) -> bool {
    payload.len() > 6
        && payload[0] == YAMAHA
        && payload[2] == XG_MODEL
        && payload[5] == 0x7E
        && payload[6] == 0x00
}

/// Complete GS reset message (payload after 0xF0).
pub fn gs_on_payload() -> Vec<u8> {
    vec![ROLAND, 0x10, GS_MODEL, ROLAND_DATA_SET, 0x40, 0x00, 0x7F, 0x00, 0x41, 0xF7]
}

/// "Use For Drum Part" message turning `channel` into a rhythm part (payload after 0xF0).
pub fn gs_drum_part_payload(channel: u8) -> Vec<u8> {
    let address = 0x10 | gs_part_for_channel(channel);
    let checksum = roland_checksum(&[0x40, address, 0x15, 0x01]);
    vec![
        ROLAND,
        0x10,
        GS_MODEL,
        ROLAND_DATA_SET,
        0x40,
        address,
        0x15,
        0x01,
        checksum,
        0xF7,
    ]
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

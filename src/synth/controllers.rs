//! Controller tables shared by every channel.
//!
//! Controller values are kept as 14-bit numbers (`value << 7`) so that
//! MSB/LSB pairs keep their full resolution.

use crate::midi::controller;

/// Number of MIDI continuous controllers.
pub const CONTROLLER_COUNT: usize = 128;

/// Center position of the 14-bit pitch wheel.
pub const PITCH_WHEEL_CENTER: u16 = 8192;

/// Pitch-bend range after a reset, in semitones.
pub const DEFAULT_PITCH_BEND_RANGE: f32 = 2.0;

/// Portamento control has only a 7-bit key; 1 marks "no key set".
pub const PORTAMENTO_CONTROL_UNSET: u16 = 1;

/// Stored value of controller 64 and above that counts as "pedal down".
pub const PEDAL_THRESHOLD: u8 = 64;

/// Seven-bit value a controller returns to on reset.
///
/// Values follow Falcosoft MIDI Player 6.
pub const fn reset_value(cc: u8) -> u8 {
    match cc {
        controller::MAIN_VOLUME => 100,
        controller::BALANCE | controller::PAN => 64,
        controller::EXPRESSION => 127,
        // Portamento on/off
        65 => 127,
        // Sound controllers: resonance, release, attack, brightness, decay, vibrato x3
        71..=78 => 64,
        controller::GENERAL_PURPOSE_6 | controller::GENERAL_PURPOSE_8 => 64,
        controller::NRPN_LSB | controller::NRPN_MSB | controller::RPN_LSB | controller::RPN_MSB => 127,
        _ => 0,
    }
}

/// 14-bit reset values for all 128 controllers.
pub fn reset_table() -> [u16; CONTROLLER_COUNT] {
    let mut table: [u16; CONTROLLER_COUNT] = std::array::from_fn(|cc| (reset_value(cc as u8) as u16) << 7);
    table[controller::PORTAMENTO_CONTROL as usize] = PORTAMENTO_CONTROL_UNSET;
    table
}

/// Controllers left untouched by Reset All Controllers (CC 121), per RP-15.
pub fn survives_rp15_reset(cc: u8) -> bool {
    matches!(
        cc,
        controller::BANK_SELECT
            | controller::BANK_SELECT_LSB
            | controller::MAIN_VOLUME
            | 39 // volume LSB
            | controller::PAN
            | 42 // pan LSB
            | 70..=79 // sound controllers
            | controller::REVERB_DEPTH
            | 92 // tremolo
            | controller::CHORUS_DEPTH
            | 94 // detune
            | 95 // phaser
    )
}

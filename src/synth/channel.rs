//! Per-channel protocol and parameter state.
//!
//! A [`ChannelParameterState`] consumes channel-voice messages and keeps the
//! controller table, locks, the RPN/NRPN data-entry state machine and the
//! derived parameters (bend range, tuning, vibrato, modulation depth).
//! Every change it accepts is queued as a [`ParameterChange`] for the
//! owning processor to forward to the voice backend.

use super::controllers::{
    reset_table, survives_rp15_reset, CONTROLLER_COUNT, DEFAULT_PITCH_BEND_RANGE, PEDAL_THRESHOLD,
    PITCH_WHEEL_CENTER,
};
use super::snapshot::ChannelSnapshot;
use crate::midi::{controller, PERCUSSION_CHANNEL};
use serde::{Deserialize, Serialize};

/// Cents per step of the 14-bit fine tuning RPN (100 cents / 8192).
const FINE_TUNING_CENTS_PER_STEP: f32 = 0.012_207_031;

/// Modulation depth (in cents) that corresponds to a multiplier of 1.
const DEFAULT_MODULATION_CENTS: f32 = 50.0;

/// Data-entry value meaning "leave this NRPN parameter unchanged".
const NRPN_NO_CHANGE: u8 = 64;

/// Registered parameter numbers (MSB << 7 | LSB).
mod rpn {
    pub const PITCH_BEND_RANGE: u16 = 0x0000;
    pub const FINE_TUNING: u16 = 0x0001;
    pub const COARSE_TUNING: u16 = 0x0002;
    pub const MODULATION_DEPTH: u16 = 0x0005;
    pub const NULL: u16 = 0x3FFF;
}

/// Non-registered parameters as (MSB, LSB) pairs, GS/XG layout.
mod nrpn {
    pub const VIBRATO_RATE: (u8, u8) = (0x01, 0x08);
    pub const VIBRATO_DEPTH: (u8, u8) = (0x01, 0x09);
    pub const VIBRATO_DELAY: (u8, u8) = (0x01, 0x0A);
    pub const DRUM_REVERB: (u8, u8) = (0x01, 0x1D);
    pub const DRUM_CHORUS: (u8, u8) = (0x01, 0x1E);
    pub const BRIGHTNESS: (u8, u8) = (0x01, 0x20);
}

/// Which parameter selector was touched last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataEntryState {
    /// Nothing selected; data entry is ignored.
    #[default]
    Idle,
    /// RPN MSB (CC 101) received.
    RpCoarse,
    /// RPN LSB (CC 100) received.
    RpFine,
    /// NRPN MSB (CC 99) received.
    NrpCoarse,
    /// NRPN LSB (CC 98) received.
    NrpFine,
}

impl DataEntryState {
    /// State after controller `cc`; controllers other than 98-101 leave it unchanged.
    pub fn after_controller(self, cc: u8) -> Self {
        match cc {
            controller::NRPN_MSB => DataEntryState::NrpCoarse,
            controller::NRPN_LSB => DataEntryState::NrpFine,
            controller::RPN_MSB => DataEntryState::RpCoarse,
            controller::RPN_LSB => DataEntryState::RpFine,
            _ => self,
        }
    }

    /// True while a registered parameter is selected.
    pub fn is_registered(self) -> bool {
        matches!(self, DataEntryState::RpCoarse | DataEntryState::RpFine)
    }
}

/// Vibrato set through NRPN, in Hz / cents / seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vibrato {
    pub rate: f32,
    pub depth: f32,
    pub delay: f32,
}

impl Vibrato {
    /// Vibrato seeded when a file first addresses any vibrato NRPN.
    pub const SEEDED: Vibrato = Vibrato {
        rate: 8.0,
        depth: 50.0,
        delay: 0.6,
    };

    pub fn is_zero(&self) -> bool {
        self.rate == 0.0 && self.depth == 0.0 && self.delay == 0.0
    }
}

/// A change the backend should apply to a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterChange {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8 },
    Controller { controller: u8, value: u8 },
    Program { bank: u16, program: u8, drums: bool },
    PitchBend(u16),
    ChannelPressure(u8),
    PolyPressure { key: u8, pressure: u8 },
    PitchBendRange(f32),
    /// Total channel tuning in cents.
    Tuning(f32),
    /// Modulation depth multiplier (1.0 = 50 cents).
    ModulationDepth(f32),
    Vibrato(Vibrato),
    /// Stop every voice on the channel.
    StopAll { immediate: bool },
    /// Controllers returned to their defaults.
    Reset,
}

/// Parameter state of one MIDI channel.
#[derive(Debug, Clone)]
pub struct ChannelParameterState {
    /// Global channel index (port * 16 + channel).
    number: usize,
    controllers: [u16; CONTROLLER_COUNT],
    locked: [bool; CONTROLLER_COUNT],
    program: u8,
    bank: u16,
    drums: bool,
    lock_preset: bool,
    pitch_bend: u16,
    pitch_bend_range: f32,
    coarse_tuning_cents: f32,
    fine_tuning_cents: f32,
    fine_tuning_msb: u8,
    /// Key shift in semitones; the fractional part tunes in cents.
    transpose: f32,
    modulation_cents: f32,
    vibrato: Vibrato,
    vibrato_locked: bool,
    sustain: bool,
    data_entry: DataEntryState,
    rpn: u16,
    nrpn_coarse: u8,
    nrpn_fine: u8,
    pending: Vec<ParameterChange>,
}

impl ChannelParameterState {
    /// Creates a channel in its reset state. Channel 9 of every port starts as drums.
    pub fn new(number: usize) -> Self {
        Self {
            number,
            controllers: reset_table(),
            locked: [false; CONTROLLER_COUNT],
            program: 0,
            bank: 0,
            drums: number % 16 == PERCUSSION_CHANNEL as usize,
            lock_preset: false,
            pitch_bend: PITCH_WHEEL_CENTER,
            pitch_bend_range: DEFAULT_PITCH_BEND_RANGE,
            coarse_tuning_cents: 0.0,
            fine_tuning_cents: 0.0,
            fine_tuning_msb: 64,
            transpose: 0.0,
            modulation_cents: DEFAULT_MODULATION_CENTS,
            vibrato: Vibrato::default(),
            vibrato_locked: false,
            sustain: false,
            data_entry: DataEntryState::Idle,
            rpn: rpn::NULL,
            nrpn_coarse: 127,
            nrpn_fine: 127,
            pending: Vec::new(),
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    /// 14-bit stored value of a controller.
    pub fn controller(&self, cc: u8) -> u16 {
        self.controllers[(cc & 0x7F) as usize]
    }

    /// Coarse (7-bit) value of a controller.
    pub fn controller_value(&self, cc: u8) -> u8 {
        (self.controller(cc) >> 7) as u8
    }

    pub fn is_locked(&self, cc: u8) -> bool {
        self.locked[(cc & 0x7F) as usize]
    }

    pub fn program(&self) -> u8 {
        self.program
    }

    pub fn bank(&self) -> u16 {
        self.bank
    }

    pub fn is_drums(&self) -> bool {
        self.drums
    }

    pub fn is_preset_locked(&self) -> bool {
        self.lock_preset
    }

    pub fn current_pitch_bend(&self) -> u16 {
        self.pitch_bend
    }

    /// Pitch-bend range in semitones.
    pub fn pitch_bend_range(&self) -> f32 {
        self.pitch_bend_range
    }

    /// Total tuning in cents: coarse + fine RPN tuning plus the fractional transpose.
    pub fn tuning_cents(&self) -> f32 {
        self.coarse_tuning_cents + self.fine_tuning_cents + self.transpose.fract() * 100.0
    }

    pub fn transpose(&self) -> f32 {
        self.transpose
    }

    /// Modulation depth multiplier (1.0 = 50 cents).
    pub fn modulation_multiplier(&self) -> f32 {
        self.modulation_cents / DEFAULT_MODULATION_CENTS
    }

    pub fn vibrato(&self) -> Vibrato {
        self.vibrato
    }

    pub fn is_sustained(&self) -> bool {
        self.sustain
    }

    pub fn data_entry_state(&self) -> DataEntryState {
        self.data_entry
    }

    /// Currently selected registered parameter number.
    pub fn selected_rpn(&self) -> u16 {
        self.rpn
    }

    /// Takes the changes queued since the last call.
    pub fn take_changes(&mut self) -> Vec<ParameterChange> {
        std::mem::take(&mut self.pending)
    }

    fn push(&mut self, change: ParameterChange) {
        self.pending.push(change);
    }

    /// Starts a note, applying the channel transpose to melodic channels.
    ///
    /// A velocity of 0 is a note-off.
    pub fn note_on(&mut self, key: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(key);
            return;
        }
        let key = self.shifted_key(key);
        self.push(ParameterChange::NoteOn {
            key,
            velocity: velocity & 0x7F,
        });
    }

    pub fn note_off(&mut self, key: u8) {
        let key = self.shifted_key(key);
        self.push(ParameterChange::NoteOff { key });
    }

    fn shifted_key(&self, key: u8) -> u8 {
        if self.drums {
            return key & 0x7F;
        }
        (key as i16 + self.transpose.trunc() as i16).clamp(0, 127) as u8
    }

    /// Applies a controller change.
    ///
    /// # Returns
    ///
    /// `false` if the controller is locked and the change was rejected.
    pub fn controller_change(&mut self, cc: u8, value: u8) -> bool {
        let cc = cc & 0x7F;
        let value = value & 0x7F;

        if self.locked[cc as usize] {
            tracing::debug!(
                "Channel {}: controller {} is locked, ignoring value {}",
                self.number,
                cc,
                value
            );
            return false;
        }

        // LSB half of a 14-bit controller
        if (33..64).contains(&cc) && cc != controller::DATA_ENTRY_LSB {
            let msb = (cc - 32) as usize;
            if self.locked[msb] {
                return false;
            }
            self.controllers[cc as usize] = (value as u16) << 7;
            self.controllers[msb] = (self.controllers[msb] & 0x3F80) | value as u16;
            self.push(ParameterChange::Controller {
                controller: cc,
                value,
            });
            return true;
        }

        self.controllers[cc as usize] = (value as u16) << 7;
        self.data_entry = self.data_entry.after_controller(cc);

        match cc {
            controller::ALL_SOUND_OFF => self.push(ParameterChange::StopAll { immediate: true }),
            controller::ALL_NOTES_OFF => self.push(ParameterChange::StopAll { immediate: false }),
            controller::RESET_ALL_CONTROLLERS => self.reset_controllers_rp15(),
            controller::SUSTAIN_PEDAL => self.sustain = value >= PEDAL_THRESHOLD,
            controller::BANK_SELECT => self.set_bank(value as u16),
            controller::NRPN_MSB => self.nrpn_coarse = value,
            controller::NRPN_LSB => self.nrpn_fine = value,
            controller::RPN_MSB => self.rpn = (value as u16) << 7,
            controller::RPN_LSB => self.rpn = (self.rpn & 0x3F80) | value as u16,
            controller::DATA_ENTRY_MSB => self.data_entry_coarse(value),
            controller::DATA_ENTRY_LSB => self.data_entry_fine(value),
            _ => {}
        }

        self.push(ParameterChange::Controller {
            controller: cc,
            value,
        });
        true
    }

    fn data_entry_coarse(&mut self, value: u8) {
        match self.data_entry {
            DataEntryState::RpCoarse | DataEntryState::RpFine => self.registered_coarse(value),
            DataEntryState::NrpFine => self.non_registered_coarse(value),
            DataEntryState::Idle | DataEntryState::NrpCoarse => {
                tracing::debug!(
                    "Channel {}: data entry {} with no parameter selected",
                    self.number,
                    value
                );
            }
        }
    }

    fn data_entry_fine(&mut self, value: u8) {
        if !self.data_entry.is_registered() {
            return;
        }
        match self.rpn {
            rpn::PITCH_BEND_RANGE => {
                self.pitch_bend_range = self.pitch_bend_range.trunc() + value as f32 / 128.0;
                self.push(ParameterChange::PitchBendRange(self.pitch_bend_range));
            }
            rpn::FINE_TUNING => {
                let combined = ((self.fine_tuning_msb as u16) << 7) | value as u16;
                self.set_fine_tuning(combined);
            }
            rpn::MODULATION_DEPTH => {
                self.modulation_cents += value as f32 / 128.0 * 100.0;
                self.push(ParameterChange::ModulationDepth(self.modulation_multiplier()));
            }
            rpn::NULL => self.reset_parameters(),
            _ => {}
        }
    }

    fn registered_coarse(&mut self, value: u8) {
        match self.rpn {
            rpn::PITCH_BEND_RANGE => {
                self.pitch_bend_range = value as f32;
                self.push(ParameterChange::PitchBendRange(self.pitch_bend_range));
                tracing::debug!(
                    "Channel {}: pitch bend range {} semitones",
                    self.number,
                    value
                );
            }
            rpn::FINE_TUNING => {
                self.fine_tuning_msb = value;
                self.set_fine_tuning((value as u16) << 7);
            }
            rpn::COARSE_TUNING => {
                self.coarse_tuning_cents = (value as f32 - 64.0) * 100.0;
                self.push(ParameterChange::Tuning(self.tuning_cents()));
            }
            rpn::MODULATION_DEPTH => {
                self.modulation_cents = value as f32 * 100.0;
                self.push(ParameterChange::ModulationDepth(self.modulation_multiplier()));
            }
            rpn::NULL => self.reset_parameters(),
            other => {
                tracing::debug!(
                    "Channel {}: unsupported RPN {:#06x} = {}",
                    self.number,
                    other,
                    value
                );
            }
        }
    }

    fn set_fine_tuning(&mut self, combined: u16) {
        self.fine_tuning_cents = (combined as f32 - 8192.0) * FINE_TUNING_CENTS_PER_STEP;
        self.push(ParameterChange::Tuning(self.tuning_cents()));
    }

    fn non_registered_coarse(&mut self, value: u8) {
        let parameter = (self.nrpn_coarse, self.nrpn_fine);
        match parameter {
            nrpn::VIBRATO_RATE | nrpn::VIBRATO_DEPTH | nrpn::VIBRATO_DELAY => {
                if value == NRPN_NO_CHANGE || self.vibrato_locked {
                    return;
                }
                if self.vibrato.is_zero() {
                    self.vibrato = Vibrato::SEEDED;
                }
                let v = value as f32;
                match parameter {
                    nrpn::VIBRATO_RATE => self.vibrato.rate = v / 64.0 * 8.0,
                    nrpn::VIBRATO_DEPTH => self.vibrato.depth = v / 2.0,
                    _ => self.vibrato.delay = (v / 64.0) / 3.0,
                }
                self.push(ParameterChange::Vibrato(self.vibrato));
            }
            nrpn::BRIGHTNESS => {
                self.controller_change(controller::BRIGHTNESS, value);
            }
            nrpn::DRUM_REVERB if self.drums => {
                self.controller_change(controller::REVERB_DEPTH, value);
            }
            nrpn::DRUM_CHORUS if self.drums => {
                self.controller_change(controller::CHORUS_DEPTH, value);
            }
            nrpn::DRUM_REVERB | nrpn::DRUM_CHORUS => {}
            (msb, lsb) => {
                if value != NRPN_NO_CHANGE {
                    tracing::warn!(
                        "Channel {}: unrecognized NRPN {:02X}{:02X} = {}",
                        self.number,
                        msb,
                        lsb,
                        value
                    );
                }
            }
        }
    }

    /// Clears the parameter selection (RPN null).
    pub fn reset_parameters(&mut self) {
        self.data_entry = DataEntryState::Idle;
        self.rpn = rpn::NULL;
        self.nrpn_coarse = 127;
        self.nrpn_fine = 127;
    }

    /// Stores a bank number, ignored while the preset is locked.
    pub fn set_bank(&mut self, bank: u16) {
        if self.lock_preset {
            return;
        }
        self.bank = bank;
    }

    /// Changes the program.
    ///
    /// # Returns
    ///
    /// `false` if the preset is locked.
    pub fn program_change(&mut self, program: u8) -> bool {
        if self.lock_preset {
            return false;
        }
        self.program = program & 0x7F;
        self.push(ParameterChange::Program {
            bank: self.bank,
            program: self.program,
            drums: self.drums,
        });
        true
    }

    /// Queues the current preset again, ignoring the preset lock.
    pub fn refresh_program(&mut self) {
        self.push(ParameterChange::Program {
            bank: self.bank,
            program: self.program,
            drums: self.drums,
        });
    }

    /// Sets the 14-bit pitch wheel from its two data bytes.
    pub fn pitch_bend(&mut self, msb: u8, lsb: u8) {
        self.pitch_bend = ((msb as u16 & 0x7F) << 7) | (lsb as u16 & 0x7F);
        self.push(ParameterChange::PitchBend(self.pitch_bend));
    }

    pub fn channel_pressure(&mut self, pressure: u8) {
        self.push(ParameterChange::ChannelPressure(pressure & 0x7F));
    }

    pub fn poly_pressure(&mut self, key: u8, pressure: u8) {
        let key = self.shifted_key(key);
        self.push(ParameterChange::PolyPressure {
            key,
            pressure: pressure & 0x7F,
        });
    }

    /// Turns the channel into a drum channel (or back).
    ///
    /// # Returns
    ///
    /// `false` if the preset is locked.
    pub fn set_drums(&mut self, drums: bool) -> bool {
        if self.lock_preset {
            return false;
        }
        if self.drums != drums {
            self.drums = drums;
            self.push(ParameterChange::Program {
                bank: self.bank,
                program: self.program,
                drums,
            });
        }
        true
    }

    /// Locks or unlocks a controller against further changes.
    pub fn lock_controller(&mut self, cc: u8, locked: bool) {
        self.locked[(cc & 0x7F) as usize] = locked;
    }

    /// Locks the preset: program changes, bank selects and drum changes are ignored.
    pub fn set_preset_lock(&mut self, locked: bool) {
        self.lock_preset = locked;
    }

    /// Suppresses vibrato NRPN updates.
    pub fn set_vibrato_lock(&mut self, locked: bool) {
        self.vibrato_locked = locked;
    }

    /// Sets the channel key shift in semitones (fractions tune in cents).
    pub fn set_transpose(&mut self, semitones: f32) {
        self.transpose = semitones;
        self.push(ParameterChange::Tuning(self.tuning_cents()));
    }

    /// Full channel reset.
    ///
    /// Locked controllers keep their values. Vibrato and sustain are cleared.
    /// Transpose and the preset lock are preserved.
    pub fn channel_reset(&mut self) {
        let saved: Vec<(usize, u16)> = (0..CONTROLLER_COUNT)
            .filter(|&cc| self.locked[cc])
            .map(|cc| (cc, self.controllers[cc]))
            .collect();

        self.controllers = reset_table();
        for &(cc, value) in &saved {
            self.controllers[cc] = value;
        }

        self.vibrato = Vibrato::default();
        self.sustain = false;
        self.pitch_bend = PITCH_WHEEL_CENTER;
        self.pitch_bend_range = DEFAULT_PITCH_BEND_RANGE;
        self.coarse_tuning_cents = 0.0;
        self.fine_tuning_cents = 0.0;
        self.fine_tuning_msb = 64;
        self.modulation_cents = DEFAULT_MODULATION_CENTS;
        self.reset_parameters();

        self.push(ParameterChange::Reset);
        for cc in [
            controller::MAIN_VOLUME,
            controller::PAN,
            controller::EXPRESSION,
        ] {
            if !self.locked[cc as usize] {
                let value = self.controller_value(cc);
                self.push(ParameterChange::Controller {
                    controller: cc,
                    value,
                });
            }
        }
        for (cc, value) in saved {
            self.push(ParameterChange::Controller {
                controller: cc as u8,
                value: (value >> 7) as u8,
            });
        }
        self.push(ParameterChange::PitchBend(self.pitch_bend));
    }

    /// Reset All Controllers (CC 121), limited to the RP-15 set.
    fn reset_controllers_rp15(&mut self) {
        let table = reset_table();
        for cc in 0..CONTROLLER_COUNT {
            if !survives_rp15_reset(cc as u8) && !self.locked[cc] {
                self.controllers[cc] = table[cc];
            }
        }
        self.vibrato = Vibrato::default();
        self.sustain = false;
        self.pitch_bend = PITCH_WHEEL_CENTER;
        self.reset_parameters();
        self.push(ParameterChange::PitchBend(self.pitch_bend));
    }

    /// Captures the lock state of this channel.
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: self.number,
            lock_preset: self.lock_preset,
            bank: self.bank,
            program: self.program,
            drum_channel: self.drums,
            locked_controllers: self.locked.to_vec(),
            controllers: self.controllers.to_vec(),
        }
    }

    /// Restores locks and locked values from a snapshot.
    pub fn restore(&mut self, snapshot: &ChannelSnapshot) {
        self.lock_preset = false;
        self.bank = snapshot.bank;
        self.set_drums(snapshot.drum_channel);
        self.program_change(snapshot.program);
        self.lock_preset = snapshot.lock_preset;

        for cc in 0..CONTROLLER_COUNT {
            let locked = snapshot.locked_controllers.get(cc).copied().unwrap_or(false);
            if locked {
                let value = snapshot.controllers.get(cc).copied().unwrap_or(0);
                self.locked[cc] = false;
                self.controller_change(cc as u8, (value >> 7) as u8);
            }
            self.locked[cc] = locked;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_rpn(channel: &mut ChannelParameterState, msb: u8, lsb: u8) {
        channel.controller_change(controller::RPN_MSB, msb);
        channel.controller_change(controller::RPN_LSB, lsb);
    }

    fn select_nrpn(channel: &mut ChannelParameterState, msb: u8, lsb: u8) {
        channel.controller_change(controller::NRPN_MSB, msb);
        channel.controller_change(controller::NRPN_LSB, lsb);
    }

    #[test]
    fn test_data_entry_transitions() {
        use DataEntryState::*;
        let table = [
            (Idle, controller::RPN_MSB, RpCoarse),
            (RpCoarse, controller::RPN_LSB, RpFine),
            (RpFine, controller::NRPN_MSB, NrpCoarse),
            (NrpCoarse, controller::NRPN_LSB, NrpFine),
            (NrpFine, controller::DATA_ENTRY_MSB, NrpFine),
            (Idle, controller::MAIN_VOLUME, Idle),
            (NrpFine, controller::RPN_LSB, RpFine),
        ];
        for (from, cc, to) in table {
            assert_eq!(from.after_controller(cc), to, "{:?} + CC{}", from, cc);
        }
    }

    #[test]
    fn test_locked_controller_rejected() {
        let mut channel = ChannelParameterState::new(0);
        assert!(channel.controller_change(controller::MAIN_VOLUME, 90));
        channel.lock_controller(controller::MAIN_VOLUME, true);
        assert!(!channel.controller_change(controller::MAIN_VOLUME, 20));
        assert_eq!(channel.controller_value(controller::MAIN_VOLUME), 90);

        // LSB of a locked MSB is rejected too
        assert!(!channel.controller_change(39, 5));
        assert_eq!(channel.controller(controller::MAIN_VOLUME), 90 << 7);
    }

    #[test]
    fn test_controller_lsb_merges() {
        let mut channel = ChannelParameterState::new(0);
        channel.controller_change(controller::MODULATION_WHEEL, 10);
        channel.controller_change(33, 3);
        assert_eq!(channel.controller(controller::MODULATION_WHEEL), (10 << 7) | 3);
    }

    #[test]
    fn test_rpn_pitch_bend_range() {
        let mut channel = ChannelParameterState::new(0);
        select_rpn(&mut channel, 0, 0);
        assert_eq!(channel.data_entry_state(), DataEntryState::RpFine);
        channel.controller_change(controller::DATA_ENTRY_MSB, 12);
        assert_eq!(channel.pitch_bend_range(), 12.0);
        channel.controller_change(controller::DATA_ENTRY_LSB, 64);
        assert_eq!(channel.pitch_bend_range(), 12.5);
        assert!(channel
            .take_changes()
            .contains(&ParameterChange::PitchBendRange(12.0)));
    }

    #[test]
    fn test_rpn_tuning() {
        let mut channel = ChannelParameterState::new(0);
        select_rpn(&mut channel, 0, 2);
        channel.controller_change(controller::DATA_ENTRY_MSB, 66);
        assert_eq!(channel.tuning_cents(), 200.0);

        let mut channel = ChannelParameterState::new(0);
        select_rpn(&mut channel, 0, 1);
        channel.controller_change(controller::DATA_ENTRY_MSB, 65);
        channel.controller_change(controller::DATA_ENTRY_LSB, 0);
        assert!((channel.tuning_cents() - 1.5625).abs() < 1e-3);

        channel.controller_change(controller::DATA_ENTRY_LSB, 64);
        // (65 << 7 | 64) - 8192 = 192 steps
        assert!((channel.tuning_cents() - 192.0 * 0.01220703125).abs() < 1e-3);
    }

    #[test]
    fn test_rpn_modulation_depth() {
        let mut channel = ChannelParameterState::new(0);
        assert_eq!(channel.modulation_multiplier(), 1.0);
        select_rpn(&mut channel, 0, 5);
        channel.controller_change(controller::DATA_ENTRY_MSB, 1);
        assert_eq!(channel.modulation_multiplier(), 2.0);
        channel.controller_change(controller::DATA_ENTRY_LSB, 64);
        assert_eq!(channel.modulation_multiplier(), 3.0);
    }

    #[test]
    fn test_rpn_null_resets_selection_only() {
        let mut channel = ChannelParameterState::new(0);
        channel.controller_change(controller::MAIN_VOLUME, 30);
        select_rpn(&mut channel, 0x7F, 0x7F);
        assert_eq!(channel.selected_rpn(), 0x3FFF);
        channel.controller_change(controller::DATA_ENTRY_MSB, 0);
        assert_eq!(channel.data_entry_state(), DataEntryState::Idle);
        assert_eq!(channel.controller_value(controller::MAIN_VOLUME), 30);

        // Data entry is now ignored
        channel.controller_change(controller::DATA_ENTRY_MSB, 24);
        assert_eq!(channel.pitch_bend_range(), 2.0);
    }

    #[test]
    fn test_nrpn_vibrato_no_change_sentinel() {
        let mut channel = ChannelParameterState::new(0);
        select_nrpn(&mut channel, 0x01, 0x08);
        channel.controller_change(controller::DATA_ENTRY_MSB, 64);
        assert_eq!(channel.vibrato(), Vibrato::default());
    }

    #[test]
    fn test_nrpn_vibrato_seeds_defaults() {
        let mut channel = ChannelParameterState::new(0);
        select_nrpn(&mut channel, 0x01, 0x08);
        channel.controller_change(controller::DATA_ENTRY_MSB, 96);

        let vibrato = channel.vibrato();
        assert_eq!(vibrato.rate, 12.0);
        assert_eq!(vibrato.depth, 50.0);
        assert!((vibrato.delay - 0.6).abs() < 1e-6);

        select_nrpn(&mut channel, 0x01, 0x09);
        channel.controller_change(controller::DATA_ENTRY_MSB, 40);
        assert_eq!(channel.vibrato().depth, 20.0);
        assert_eq!(channel.vibrato().rate, 12.0);
    }

    #[test]
    fn test_nrpn_vibrato_lock() {
        let mut channel = ChannelParameterState::new(0);
        channel.set_vibrato_lock(true);
        select_nrpn(&mut channel, 0x01, 0x0A);
        channel.controller_change(controller::DATA_ENTRY_MSB, 100);
        assert!(channel.vibrato().is_zero());
    }

    #[test]
    fn test_nrpn_forwarding() {
        let mut channel = ChannelParameterState::new(0);
        select_nrpn(&mut channel, 0x01, 0x20);
        channel.controller_change(controller::DATA_ENTRY_MSB, 90);
        assert_eq!(channel.controller_value(controller::BRIGHTNESS), 90);

        // Drum reverb is ignored on melodic channels
        select_nrpn(&mut channel, 0x01, 0x1D);
        channel.controller_change(controller::DATA_ENTRY_MSB, 70);
        assert_eq!(channel.controller_value(controller::REVERB_DEPTH), 0);

        let mut drums = ChannelParameterState::new(9);
        assert!(drums.is_drums());
        select_nrpn(&mut drums, 0x01, 0x1D);
        drums.controller_change(controller::DATA_ENTRY_MSB, 70);
        select_nrpn(&mut drums, 0x01, 0x1E);
        drums.controller_change(controller::DATA_ENTRY_MSB, 50);
        assert_eq!(drums.controller_value(controller::REVERB_DEPTH), 70);
        assert_eq!(drums.controller_value(controller::CHORUS_DEPTH), 50);
    }

    #[test]
    fn test_nrpn_needs_fine_selector() {
        let mut channel = ChannelParameterState::new(0);
        channel.controller_change(controller::NRPN_LSB, 0x08);
        channel.controller_change(controller::NRPN_MSB, 0x01);
        assert_eq!(channel.data_entry_state(), DataEntryState::NrpCoarse);
        channel.controller_change(controller::DATA_ENTRY_MSB, 96);
        assert!(channel.vibrato().is_zero());
    }

    #[test]
    fn test_reset_preserves_locks_and_transpose() {
        let mut channel = ChannelParameterState::new(2);
        channel.controller_change(controller::MAIN_VOLUME, 40);
        channel.controller_change(controller::PAN, 10);
        channel.controller_change(controller::SUSTAIN_PEDAL, 127);
        channel.lock_controller(controller::PAN, true);
        channel.set_transpose(3.0);
        channel.set_preset_lock(true);
        select_nrpn(&mut channel, 0x01, 0x08);
        channel.controller_change(controller::DATA_ENTRY_MSB, 80);
        assert!(channel.is_sustained());

        channel.channel_reset();

        assert_eq!(channel.controller_value(controller::MAIN_VOLUME), 100);
        assert_eq!(channel.controller_value(controller::PAN), 10);
        assert!(channel.is_locked(controller::PAN));
        assert_eq!(channel.transpose(), 3.0);
        assert!(channel.is_preset_locked());
        assert!(channel.vibrato().is_zero());
        assert!(!channel.is_sustained());
        assert_eq!(channel.data_entry_state(), DataEntryState::Idle);
    }

    #[test]
    fn test_reset_all_controllers_rp15() {
        let mut channel = ChannelParameterState::new(0);
        channel.controller_change(controller::MAIN_VOLUME, 40);
        channel.controller_change(controller::MODULATION_WHEEL, 90);
        channel.controller_change(controller::EXPRESSION, 10);
        channel.pitch_bend(0, 0);
        channel.controller_change(controller::RESET_ALL_CONTROLLERS, 0);

        assert_eq!(channel.controller_value(controller::MAIN_VOLUME), 40);
        assert_eq!(channel.controller_value(controller::MODULATION_WHEEL), 0);
        assert_eq!(channel.controller_value(controller::EXPRESSION), 127);
        assert_eq!(channel.current_pitch_bend(), PITCH_WHEEL_CENTER);
    }

    #[test]
    fn test_preset_lock() {
        let mut channel = ChannelParameterState::new(0);
        assert!(channel.program_change(5));
        channel.set_preset_lock(true);
        assert!(!channel.program_change(9));
        channel.controller_change(controller::BANK_SELECT, 8);
        assert!(!channel.set_drums(true));
        assert_eq!(channel.program(), 5);
        assert_eq!(channel.bank(), 0);
        assert!(!channel.is_drums());
    }

    #[test]
    fn test_note_transpose() {
        let mut channel = ChannelParameterState::new(0);
        channel.set_transpose(2.0);
        channel.take_changes();
        channel.note_on(60, 100);
        channel.note_on(60, 0);
        assert_eq!(
            channel.take_changes(),
            vec![
                ParameterChange::NoteOn {
                    key: 62,
                    velocity: 100
                },
                ParameterChange::NoteOff { key: 62 },
            ]
        );

        let mut drums = ChannelParameterState::new(9);
        drums.set_transpose(5.0);
        drums.take_changes();
        drums.note_on(36, 100);
        assert_eq!(
            drums.take_changes(),
            vec![ParameterChange::NoteOn {
                key: 36,
                velocity: 100
            }]
        );
    }

    #[test]
    fn test_snapshot_restore() {
        let mut channel = ChannelParameterState::new(3);
        channel.controller_change(controller::BANK_SELECT, 4);
        channel.program_change(20);
        channel.controller_change(controller::REVERB_DEPTH, 100);
        channel.lock_controller(controller::REVERB_DEPTH, true);
        channel.set_preset_lock(true);
        let snapshot = channel.snapshot();

        let mut other = ChannelParameterState::new(3);
        other.restore(&snapshot);
        assert_eq!(other.program(), 20);
        assert_eq!(other.bank(), 4);
        assert!(other.is_preset_locked());
        assert!(other.is_locked(controller::REVERB_DEPTH));
        assert_eq!(other.controller_value(controller::REVERB_DEPTH), 100);
    }
}

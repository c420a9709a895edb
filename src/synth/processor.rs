//! The synthesis processor.
//!
//! [`SynthProcessor`] owns the parameter state of every channel, the current
//! MIDI system and the master parameters. It interprets incoming messages,
//! lets each channel decide what changes, and forwards the resulting
//! intents to its [`VoiceBackend`].

use super::backend::VoiceBackend;
use super::channel::{ChannelParameterState, ParameterChange};
use super::snapshot::SynthSnapshot;
use super::sysex::{decode_sysex, SysexCommand, SystemMode};
use crate::midi::{classify_channel, controller, status, ChannelClass, MidiMessage, CHANNELS_PER_PORT, PERCUSSION_CHANNEL};

/// XG bank numbers that select a drum kit.
const XG_DRUM_BANKS: [u8; 3] = [120, 126, 127];
/// GM2 rhythm and melody bank MSBs.
const GM2_DRUM_BANK: u8 = 120;
const GM2_MELODY_BANK: u8 = 121;

pub struct SynthProcessor {
    channels: Vec<ChannelParameterState>,
    system: SystemMode,
    master_volume: f32,
    master_pan: f32,
    /// Master tuning in cents, added to every channel's own tuning.
    master_tuning: f32,
    backend: Box<dyn VoiceBackend>,
}

impl SynthProcessor {
    /// Creates a processor with one port (16 channels) in GS mode.
    pub fn new(backend: Box<dyn VoiceBackend>) -> Self {
        Self {
            channels: (0..CHANNELS_PER_PORT).map(ChannelParameterState::new).collect(),
            system: SystemMode::Gs,
            master_volume: 1.0,
            master_pan: 0.0,
            master_tuning: 0.0,
            backend,
        }
    }

    /// Adds 16 channels for another MIDI port.
    pub fn add_port(&mut self) {
        let first = self.channels.len();
        self.channels
            .extend((first..first + CHANNELS_PER_PORT).map(ChannelParameterState::new));
        self.backend.add_port();
        tracing::debug!("Added port {}, {} channels", first / CHANNELS_PER_PORT, self.channels.len());
    }

    /// Adds ports until `channel` exists.
    pub fn ensure_channel(&mut self, channel: usize) {
        while self.channels.len() <= channel {
            self.add_port();
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, channel: usize) -> Option<&ChannelParameterState> {
        self.channels.get(channel)
    }

    pub fn channels(&self) -> &[ChannelParameterState] {
        &self.channels
    }

    pub fn system(&self) -> SystemMode {
        self.system
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn master_pan(&self) -> f32 {
        self.master_pan
    }

    pub fn master_tuning(&self) -> f32 {
        self.master_tuning
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_master_pan(&mut self, pan: f32) {
        self.master_pan = pan.clamp(-1.0, 1.0);
    }

    /// Sets the master tuning in cents and retunes every channel.
    pub fn set_master_tuning(&mut self, cents: f32) {
        self.master_tuning = cents;
        for index in 0..self.channels.len() {
            let cents = self.channels[index].tuning_cents() + self.master_tuning;
            self.backend.apply(index, &ParameterChange::Tuning(cents));
        }
    }

    /// Runs `f` on a channel and forwards what it queued.
    fn with_channel<R>(
        &mut self,
        channel: usize,
        f: impl FnOnce(&mut ChannelParameterState) -> R,
    ) -> Option<R> {
        let Some(state) = self.channels.get_mut(channel) else {
            tracing::debug!("Ignoring message for missing channel {}", channel);
            return None;
        };
        let result = f(state);
        self.flush(channel);
        Some(result)
    }

    fn flush(&mut self, channel: usize) {
        let Some(state) = self.channels.get_mut(channel) else {
            return;
        };
        for change in state.take_changes() {
            let change = match change {
                ParameterChange::Tuning(cents) => ParameterChange::Tuning(cents + self.master_tuning),
                other => other,
            };
            self.backend.apply(channel, &change);
        }
    }

    pub fn note_on(&mut self, channel: usize, key: u8, velocity: u8) {
        self.with_channel(channel, |c| c.note_on(key, velocity));
    }

    pub fn note_off(&mut self, channel: usize, key: u8) {
        self.with_channel(channel, |c| c.note_off(key));
    }

    /// Applies a controller change, interpreting bank select for the current system.
    ///
    /// # Returns
    ///
    /// `false` if the channel is missing or the controller is locked.
    pub fn controller_change(&mut self, channel: usize, cc: u8, value: u8) -> bool {
        let system = self.system;
        let accepted = self.with_channel(channel, |c| {
            if !c.controller_change(cc, value) {
                return false;
            }
            match cc & 0x7F {
                controller::BANK_SELECT => select_bank(c, system, value & 0x7F),
                controller::BANK_SELECT_LSB if system == SystemMode::Xg && !c.is_drums() => {
                    // XG variation banks live in the LSB
                    if c.bank() == 0 {
                        c.set_bank((value & 0x7F) as u16);
                    }
                }
                _ => {}
            }
            true
        });
        accepted.unwrap_or(false)
    }

    /// # Returns
    ///
    /// `false` if the channel is missing or its preset is locked.
    pub fn program_change(&mut self, channel: usize, program: u8) -> bool {
        self.with_channel(channel, |c| c.program_change(program))
            .unwrap_or(false)
    }

    /// Pitch wheel from its two data bytes.
    pub fn pitch_wheel(&mut self, channel: usize, msb: u8, lsb: u8) {
        self.with_channel(channel, |c| c.pitch_bend(msb, lsb));
    }

    pub fn channel_pressure(&mut self, channel: usize, pressure: u8) {
        self.with_channel(channel, |c| c.channel_pressure(pressure));
    }

    pub fn poly_pressure(&mut self, channel: usize, key: u8, pressure: u8) {
        self.with_channel(channel, |c| c.poly_pressure(key, pressure));
    }

    pub fn lock_controller(&mut self, channel: usize, cc: u8, locked: bool) {
        self.with_channel(channel, |c| c.lock_controller(cc, locked));
    }

    pub fn set_preset_lock(&mut self, channel: usize, locked: bool) {
        self.with_channel(channel, |c| c.set_preset_lock(locked));
    }

    pub fn set_vibrato_lock(&mut self, channel: usize, locked: bool) {
        self.with_channel(channel, |c| c.set_vibrato_lock(locked));
    }

    /// Key shift of one channel in semitones.
    pub fn set_transpose(&mut self, channel: usize, semitones: f32) {
        self.with_channel(channel, |c| c.set_transpose(semitones));
    }

    /// Marks a channel as drums (ignored under a preset lock).
    pub fn set_drums(&mut self, channel: usize, drums: bool) -> bool {
        self.with_channel(channel, |c| c.set_drums(drums))
            .unwrap_or(false)
    }

    /// Decodes and applies a system exclusive message.
    ///
    /// # Arguments
    ///
    /// * `payload` - Bytes after 0xF0, usually ending with 0xF7
    /// * `channel_offset` - First channel of the port the message came from
    pub fn system_exclusive(&mut self, payload: &[u8], channel_offset: usize) {
        let command = decode_sysex(payload, channel_offset, self.system);
        self.apply_sysex(command);
    }

    fn apply_sysex(&mut self, command: SysexCommand) {
        match command {
            SysexCommand::SetSystem { system, reset } => {
                if reset {
                    self.reset_all_controllers();
                }
                self.system = system;
                tracing::info!("System set to {}", system);
            }
            SysexCommand::MasterVolume(volume) => self.set_master_volume(volume),
            SysexCommand::MasterPan(pan) => self.set_master_pan(pan),
            SysexCommand::MasterTuning(cents) => self.set_master_tuning(cents),
            SysexCommand::TransposeAll(semitones) => {
                for channel in 0..self.channels.len() {
                    self.set_transpose(channel, semitones);
                }
            }
            SysexCommand::Drums { channel, drums } => {
                if self.set_drums(channel, drums) {
                    tracing::debug!("Channel {} drums: {}", channel, drums);
                }
            }
            SysexCommand::KeyShift { channel, semitones } => self.set_transpose(channel, semitones),
            SysexCommand::Controller {
                channel,
                controller,
                value,
            } => {
                self.controller_change(channel, controller, value);
            }
            SysexCommand::Program { channel, program } => {
                self.program_change(channel, program);
            }
            SysexCommand::Unrecognized => {}
        }
    }

    /// Plays one file message. Meta events are ignored.
    pub fn process_message(&mut self, message: &MidiMessage, channel_offset: usize) {
        match classify_channel(message.status) {
            ChannelClass::Voice(ch) => {
                let channel = channel_offset + ch as usize;
                let d0 = message.data.first().copied().unwrap_or(0);
                let d1 = message.data.get(1).copied().unwrap_or(0);
                match message.family() {
                    status::NOTE_OFF => self.note_off(channel, d0),
                    status::NOTE_ON => self.note_on(channel, d0, d1),
                    status::POLY_PRESSURE => self.poly_pressure(channel, d0, d1),
                    status::CONTROLLER_CHANGE => {
                        self.controller_change(channel, d0, d1);
                    }
                    status::PROGRAM_CHANGE => {
                        self.program_change(channel, d0);
                    }
                    status::CHANNEL_PRESSURE => self.channel_pressure(channel, d0),
                    status::PITCH_BEND => self.pitch_wheel(channel, d1, d0),
                    _ => {}
                }
            }
            ChannelClass::Sysex => self.system_exclusive(&message.data, channel_offset),
            ChannelClass::System | ChannelClass::Meta => {}
        }
    }

    /// System reset: every channel is reset, channel 10 of each port becomes
    /// drums and the system returns to GS. Locks survive.
    pub fn reset_all_controllers(&mut self) {
        self.backend.reset();
        self.system = SystemMode::Gs;
        for index in 0..self.channels.len() {
            self.with_channel(index, |c| {
                if c.is_preset_locked() {
                    c.refresh_program();
                } else {
                    c.set_bank(0);
                    c.set_drums(index % CHANNELS_PER_PORT == PERCUSSION_CHANNEL as usize);
                    c.program_change(0);
                }
                c.channel_reset();
            });
        }
        tracing::debug!("Reset all controllers on {} channels", self.channels.len());
    }

    /// Stops every voice on every channel.
    pub fn stop_all(&mut self, immediate: bool) {
        for channel in 0..self.channels.len() {
            self.backend
                .apply(channel, &ParameterChange::StopAll { immediate });
        }
    }

    /// Renders one block and applies the master volume and pan.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.backend.render(left, right);

        if self.master_volume == 1.0 && self.master_pan == 0.0 {
            return;
        }
        let left_gain = self.master_volume * (1.0 - self.master_pan).min(1.0);
        let right_gain = self.master_volume * (1.0 + self.master_pan).min(1.0);
        left.iter_mut().for_each(|s| *s *= left_gain);
        right.iter_mut().for_each(|s| *s *= right_gain);
    }

    pub fn voice_count(&self) -> usize {
        self.backend.voice_count()
    }

    /// Captures the locks of every channel.
    pub fn snapshot(&self) -> SynthSnapshot {
        SynthSnapshot {
            channels: self.channels.iter().map(ChannelParameterState::snapshot).collect(),
            system: self.system,
            master_volume: self.master_volume,
            master_pan: self.master_pan,
        }
    }

    /// Restores a snapshot, adding ports for channels that do not exist yet.
    pub fn apply_snapshot(&mut self, snapshot: &SynthSnapshot) {
        for channel_snapshot in &snapshot.channels {
            self.ensure_channel(channel_snapshot.channel);
            self.with_channel(channel_snapshot.channel, |c| c.restore(channel_snapshot));
        }
        self.system = snapshot.system;
        self.set_master_volume(snapshot.master_volume);
        self.set_master_pan(snapshot.master_pan);
    }
}

/// Bank select MSB, as the current system reads it.
fn select_bank(channel: &mut ChannelParameterState, system: SystemMode, value: u8) {
    let percussion_slot = channel.number() % CHANNELS_PER_PORT == PERCUSSION_CHANNEL as usize;
    match system {
        SystemMode::Gm => channel.set_bank(0),
        SystemMode::Gs => {}
        SystemMode::Xg => {
            if XG_DRUM_BANKS.contains(&value) {
                channel.set_drums(true);
            } else if !percussion_slot {
                channel.set_drums(false);
            }
        }
        SystemMode::Gm2 => match value {
            GM2_DRUM_BANK => {
                channel.set_drums(true);
            }
            GM2_MELODY_BANK => {
                channel.set_drums(false);
            }
            _ => {}
        },
    }
}

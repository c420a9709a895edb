//! Voice rendering backends.
//!
//! The processor never talks to a synthesizer directly. It forwards each
//! accepted [`ParameterChange`] to a [`VoiceBackend`], which turns it into
//! sound. [`RustySynthBackend`] renders SoundFont voices with rustysynth;
//! [`RecordingBackend`] only records what it was asked to do.

use super::channel::ParameterChange;
use crate::midi::{controller, status, CHANNELS_PER_PORT, PERCUSSION_CHANNEL};
use anyhow::{Context, Result};
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Bank number rustysynth reserves for percussion presets.
const PERCUSSION_BANK: i32 = 128;

/// Sink for channel intents.
pub trait VoiceBackend: Send {
    /// Applies one change to a global channel (port * 16 + channel).
    fn apply(&mut self, channel: usize, change: &ParameterChange);

    /// Makes room for 16 more channels.
    fn add_port(&mut self) {}

    /// Silences every voice and resets the synthesizer.
    fn reset(&mut self);

    /// Renders one block of stereo audio, overwriting the buffers.
    fn render(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Number of sounding notes.
    fn voice_count(&self) -> usize;
}

/// Renders voices with one rustysynth [`Synthesizer`] per port.
pub struct RustySynthBackend {
    soundfont: Arc<SoundFont>,
    settings: SynthesizerSettings,
    ports: Vec<Synthesizer>,
    /// Sounding (channel, key) pairs.
    active: HashSet<(usize, u8)>,
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
}

impl RustySynthBackend {
    /// Creates a backend from a loaded SoundFont with a single port.
    ///
    /// # Errors
    ///
    /// Returns error if the synthesizer cannot be created
    pub fn new(soundfont: Arc<SoundFont>, sample_rate: u32) -> Result<Self> {
        let settings = SynthesizerSettings::new(sample_rate as i32);
        let synth = Synthesizer::new(&soundfont, &settings)
            .map_err(|e| anyhow::anyhow!("Failed to create synthesizer: {:?}", e))?;
        Ok(Self {
            soundfont,
            settings,
            ports: vec![synth],
            active: HashSet::new(),
            scratch_left: Vec::new(),
            scratch_right: Vec::new(),
        })
    }

    /// Loads a SoundFont file and creates a backend for it.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened, is not a valid
    /// SoundFont, or the synthesizer cannot be created
    pub fn from_file<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self> {
        let soundfont = load_soundfont(path.as_ref())?;
        Self::new(soundfont, sample_rate)
    }

    fn send(&mut self, channel: usize, command: u8, data1: i32, data2: i32) {
        let port = channel / CHANNELS_PER_PORT;
        if let Some(synth) = self.ports.get_mut(port) {
            let local = (channel % CHANNELS_PER_PORT) as i32;
            synth.process_midi_message(local, command as i32, data1, data2);
        }
    }

    fn send_controller(&mut self, channel: usize, cc: u8, value: i32) {
        self.send(channel, status::CONTROLLER_CHANGE, cc as i32, value);
    }

    /// Sets a registered parameter through the synthesizer's own RPN handling.
    fn send_rpn(&mut self, channel: usize, rpn: u8, msb: i32, lsb: i32) {
        self.send_controller(channel, controller::RPN_MSB, 0);
        self.send_controller(channel, controller::RPN_LSB, rpn as i32);
        self.send_controller(channel, controller::DATA_ENTRY_MSB, msb);
        self.send_controller(channel, controller::DATA_ENTRY_LSB, lsb);
        self.send_controller(channel, controller::RPN_MSB, 127);
        self.send_controller(channel, controller::RPN_LSB, 127);
    }

    fn set_tuning(&mut self, channel: usize, cents: f32) {
        let coarse = (cents / 100.0).round().clamp(-64.0, 63.0);
        let fine = cents - coarse * 100.0;
        let fine = (8192.0 + fine / 100.0 * 8192.0).round().clamp(0.0, 16383.0) as i32;
        self.send_rpn(channel, 2, coarse as i32 + 64, 0);
        self.send_rpn(channel, 1, fine >> 7, fine & 0x7F);
    }
}

/// Reads a SoundFont into memory.
///
/// # Errors
///
/// Returns error if the file cannot be opened or parsed
pub fn load_soundfont(path: &Path) -> Result<Arc<SoundFont>> {
    let mut file = BufReader::new(
        File::open(path).with_context(|| format!("Failed to open SoundFont: {}", path.display()))?,
    );
    let soundfont = SoundFont::new(&mut file)
        .map_err(|e| anyhow::anyhow!("Failed to load SoundFont: {:?}", e))?;
    tracing::info!(
        "Loaded SoundFont {} ({} presets)",
        path.display(),
        soundfont.get_presets().len()
    );
    Ok(Arc::new(soundfont))
}

impl VoiceBackend for RustySynthBackend {
    fn apply(&mut self, channel: usize, change: &ParameterChange) {
        match *change {
            ParameterChange::NoteOn { key, velocity } => {
                self.send(channel, status::NOTE_ON, key as i32, velocity as i32);
                self.active.insert((channel, key));
            }
            ParameterChange::NoteOff { key } => {
                self.send(channel, status::NOTE_OFF, key as i32, 0);
                self.active.remove(&(channel, key));
            }
            ParameterChange::Controller { controller: cc, value } => match cc {
                // Bank arrives with Program; data entry arrives resolved
                controller::BANK_SELECT
                | controller::BANK_SELECT_LSB
                | controller::DATA_ENTRY_MSB
                | controller::DATA_ENTRY_LSB
                | controller::NRPN_LSB
                | controller::NRPN_MSB
                | controller::RPN_LSB
                | controller::RPN_MSB
                | controller::ALL_SOUND_OFF
                | controller::ALL_NOTES_OFF => {}
                _ => self.send_controller(channel, cc, value as i32),
            },
            ParameterChange::Program {
                bank,
                program,
                drums,
            } => {
                let percussion_slot = channel % CHANNELS_PER_PORT == PERCUSSION_CHANNEL as usize;
                let bank = match (drums, percussion_slot) {
                    // The synthesizer adds the percussion bank itself on channel 10
                    (true, true) => 0,
                    (true, false) => PERCUSSION_BANK,
                    (false, _) => bank as i32,
                };
                self.send_controller(channel, controller::BANK_SELECT, bank);
                self.send(channel, status::PROGRAM_CHANGE, program as i32, 0);
            }
            ParameterChange::PitchBend(value) => {
                self.send(
                    channel,
                    status::PITCH_BEND,
                    (value & 0x7F) as i32,
                    (value >> 7) as i32,
                );
            }
            ParameterChange::ChannelPressure(pressure) => {
                self.send(channel, status::CHANNEL_PRESSURE, pressure as i32, 0);
            }
            ParameterChange::PolyPressure { key, pressure } => {
                self.send(channel, status::POLY_PRESSURE, key as i32, pressure as i32);
            }
            ParameterChange::PitchBendRange(semitones) => {
                let whole = semitones.trunc().clamp(0.0, 127.0) as i32;
                let cents = (semitones.fract() * 100.0).round() as i32;
                self.send_rpn(channel, 0, whole, cents.clamp(0, 127));
            }
            ParameterChange::Tuning(cents) => self.set_tuning(channel, cents),
            ParameterChange::ModulationDepth(_) | ParameterChange::Vibrato(_) => {
                tracing::trace!("Channel {}: {:?} not supported by rustysynth", channel, change);
            }
            ParameterChange::StopAll { immediate } => {
                let cc = if immediate {
                    controller::ALL_SOUND_OFF
                } else {
                    controller::ALL_NOTES_OFF
                };
                self.send_controller(channel, cc, 0);
                self.active.retain(|&(c, _)| c != channel);
            }
            ParameterChange::Reset => {
                self.send_controller(channel, controller::RESET_ALL_CONTROLLERS, 0);
            }
        }
    }

    fn add_port(&mut self) {
        match Synthesizer::new(&self.soundfont, &self.settings) {
            Ok(synth) => self.ports.push(synth),
            Err(e) => tracing::error!("Failed to create synthesizer for new port: {:?}", e),
        }
    }

    fn reset(&mut self) {
        for synth in &mut self.ports {
            synth.reset();
        }
        self.active.clear();
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        right.fill(0.0);
        let frames = left.len().min(right.len());
        self.scratch_left.resize(frames, 0.0);
        self.scratch_right.resize(frames, 0.0);

        for synth in &mut self.ports {
            synth.render(&mut self.scratch_left, &mut self.scratch_right);
            for i in 0..frames {
                left[i] += self.scratch_left[i];
                right[i] += self.scratch_right[i];
            }
        }
    }

    fn voice_count(&self) -> usize {
        self.active.len()
    }
}

/// Something a [`RecordingBackend`] was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Change {
        channel: usize,
        change: ParameterChange,
    },
    PortAdded,
    Reset,
}

/// Shared view of the events a [`RecordingBackend`] received.
pub type BackendLog = Arc<Mutex<Vec<BackendEvent>>>;

/// Backend that renders silence and records every call.
///
/// Used for dry runs and to observe the processor in tests.
#[derive(Default)]
pub struct RecordingBackend {
    log: BackendLog,
    active: HashSet<(usize, u8)>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the event log, readable after the backend is moved away.
    pub fn log(&self) -> BackendLog {
        Arc::clone(&self.log)
    }

    fn record(&self, event: BackendEvent) {
        if let Ok(mut log) = self.log.lock() {
            log.push(event);
        }
    }
}

impl VoiceBackend for RecordingBackend {
    fn apply(&mut self, channel: usize, change: &ParameterChange) {
        match *change {
            ParameterChange::NoteOn { key, .. } => {
                self.active.insert((channel, key));
            }
            ParameterChange::NoteOff { key } => {
                self.active.remove(&(channel, key));
            }
            ParameterChange::StopAll { .. } => self.active.retain(|&(c, _)| c != channel),
            _ => {}
        }
        self.record(BackendEvent::Change {
            channel,
            change: change.clone(),
        });
    }

    fn add_port(&mut self) {
        self.record(BackendEvent::PortAdded);
    }

    fn reset(&mut self) {
        self.active.clear();
        self.record(BackendEvent::Reset);
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        right.fill(0.0);
    }

    fn voice_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_backend_tracks_voices() {
        let mut backend = RecordingBackend::new();
        let log = backend.log();
        backend.apply(0, &ParameterChange::NoteOn { key: 60, velocity: 90 });
        backend.apply(1, &ParameterChange::NoteOn { key: 62, velocity: 90 });
        assert_eq!(backend.voice_count(), 2);

        backend.apply(0, &ParameterChange::NoteOff { key: 60 });
        assert_eq!(backend.voice_count(), 1);
        backend.apply(1, &ParameterChange::StopAll { immediate: true });
        assert_eq!(backend.voice_count(), 0);

        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_recording_backend_renders_silence() {
        let mut backend = RecordingBackend::new();
        let mut left = vec![1.0; 8];
        let mut right = vec![1.0; 8];
        backend.render(&mut left, &mut right);
        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn test_missing_soundfont_is_an_error() {
        let result = RustySynthBackend::from_file("/nonexistent/font.sf2", 44100);
        assert!(result.is_err());
    }
}

//! External MIDI output ports.

use crate::midi::{controller, status, CHANNELS_PER_PORT};
use std::sync::{Arc, Mutex};

/// A port that accepts raw MIDI bytes.
pub trait MidiOutput: Send {
    fn send(&mut self, bytes: &[u8]);

    fn name(&self) -> &str;
}

/// Bytes sent to a port on attach and detach: All-Sound-Off and
/// All-Notes-Off on every channel, then a system reset.
pub fn reset_burst() -> Vec<Vec<u8>> {
    let mut burst = Vec::with_capacity(CHANNELS_PER_PORT * 2 + 1);
    for channel in 0..CHANNELS_PER_PORT as u8 {
        burst.push(vec![
            status::CONTROLLER_CHANGE | channel,
            controller::ALL_SOUND_OFF,
            0,
        ]);
        burst.push(vec![
            status::CONTROLLER_CHANGE | channel,
            controller::ALL_NOTES_OFF,
            0,
        ]);
    }
    burst.push(vec![status::RESET]);
    burst
}

/// Shared log of what a [`RecordingOutput`] received.
pub type OutputLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// Keeps every message it receives. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    name: String,
    log: OutputLog,
}

impl RecordingOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: OutputLog::default(),
        }
    }

    pub fn log(&self) -> OutputLog {
        Arc::clone(&self.log)
    }
}

impl MidiOutput for RecordingOutput {
    fn send(&mut self, bytes: &[u8]) {
        if let Ok(mut log) = self.log.lock() {
            log.push(bytes.to_vec());
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Prints every message as hex through the log.
#[derive(Debug, Default)]
pub struct TraceOutput;

impl MidiOutput for TraceOutput {
    fn send(&mut self, bytes: &[u8]) {
        tracing::info!(target: "midiseq::midi_out", "{:02X?}", bytes);
    }

    fn name(&self) -> &str {
        "trace"
    }
}

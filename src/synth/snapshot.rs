//! Captured lock state of the synthesizer.
//!
//! A snapshot records, per channel, which controllers and presets the user
//! locked and at what values. It can be restored onto a live processor or
//! baked into a file with [`crate::midi::apply_snapshot_to_midi`].

use super::controllers::{reset_table, CONTROLLER_COUNT};
use super::sysex::SystemMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid binary snapshot: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Lock state of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Global channel index (port * 16 + channel).
    pub channel: usize,

    /// Program, bank and drum flag are frozen.
    pub lock_preset: bool,

    pub bank: u16,

    pub program: u8,

    pub drum_channel: bool,

    /// One flag per controller.
    pub locked_controllers: Vec<bool>,

    /// 14-bit controller values (`value << 7`).
    pub controllers: Vec<u16>,
}

impl ChannelSnapshot {
    /// An unlocked channel in its reset state.
    pub fn unlocked(channel: usize) -> Self {
        Self {
            channel,
            lock_preset: false,
            bank: 0,
            program: 0,
            drum_channel: channel % 16 == 9,
            locked_controllers: vec![false; CONTROLLER_COUNT],
            controllers: reset_table().to_vec(),
        }
    }

    /// Whether a controller is locked. Missing entries count as unlocked.
    pub fn is_locked(&self, cc: u8) -> bool {
        self.locked_controllers
            .get(cc as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Coarse (7-bit) value of a controller.
    pub fn controller_value(&self, cc: u8) -> u8 {
        let value = self.controllers.get(cc as usize).copied().unwrap_or(0);
        (value >> 7) as u8
    }

    /// Locks a controller at a 7-bit value.
    pub fn lock_controller(&mut self, cc: u8, value: u8) {
        let index = (cc & 0x7F) as usize;
        if self.locked_controllers.len() < CONTROLLER_COUNT {
            self.locked_controllers.resize(CONTROLLER_COUNT, false);
        }
        if self.controllers.len() < CONTROLLER_COUNT {
            self.controllers.resize(CONTROLLER_COUNT, 0);
        }
        self.locked_controllers[index] = true;
        self.controllers[index] = ((value & 0x7F) as u16) << 7;
    }

    /// Locks the preset at the given bank and program.
    pub fn lock_preset(&mut self, bank: u16, program: u8, drums: bool) {
        self.lock_preset = true;
        self.bank = bank;
        self.program = program & 0x7F;
        self.drum_channel = drums;
    }

    /// Controllers that are locked, in ascending order.
    pub fn locked(&self) -> impl Iterator<Item = u8> + '_ {
        self.locked_controllers
            .iter()
            .enumerate()
            .filter(|(_, &locked)| locked)
            .map(|(cc, _)| cc as u8)
    }

    /// True when nothing on this channel is locked.
    pub fn is_empty(&self) -> bool {
        !self.lock_preset && self.locked().next().is_none()
    }
}

/// Lock state of the whole synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthSnapshot {
    pub channels: Vec<ChannelSnapshot>,

    #[serde(default)]
    pub system: SystemMode,

    #[serde(default = "default_master_volume")]
    pub master_volume: f32,

    #[serde(default)]
    pub master_pan: f32,
}

fn default_master_volume() -> f32 {
    1.0
}

impl SynthSnapshot {
    /// Saves the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file writing fails
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads a snapshot from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if file reading or parsing fails
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Saves the snapshot in binary form.
    pub fn save_binary<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotError> {
        let data = bincode::serialize(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Loads a binary snapshot.
    pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let data = fs::read(path)?;
        Ok(bincode::deserialize(&data)?)
    }

    /// Loads either format, choosing by extension (`.json` is JSON, anything else binary).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let is_json = path
            .as_ref()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::load_json(path)
        } else {
            Self::load_binary(path)
        }
    }
}

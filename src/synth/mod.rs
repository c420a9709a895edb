//! Channel parameter state and the synthesis processor.
//!
//! This module turns MIDI messages into synthesis intents:
//! - Per-channel controllers, locks and the RPN/NRPN data-entry protocol
//! - GS, XG and GM/GM2 system exclusive dialects
//! - Lock snapshots with JSON and binary persistence
//! - A processor that forwards intents to a voice backend (rustysynth)

pub mod backend;
mod channel;
pub mod controllers;
mod processor;
mod snapshot;
pub mod sysex;

pub use backend::{load_soundfont, RecordingBackend, RustySynthBackend, VoiceBackend};
pub use channel::{ChannelParameterState, DataEntryState, ParameterChange, Vibrato};
pub use processor::SynthProcessor;
pub use snapshot::{ChannelSnapshot, SnapshotError, SynthSnapshot};
pub use sysex::{decode_sysex, SysexCommand, SystemMode};

//! Playback transport.
//!
//! Two domains connected only by a typed mailbox:
//! - [`Sequencer`] runs on the caller's thread and mirrors the clock
//! - [`SequencerEngine`] runs on the audio side and owns playback state

pub mod clock;
mod engine;
pub mod midi_out;
pub mod protocol;
mod sequencer;

pub use clock::{AudioClock, HighResolutionClock, ManualClock, SampleClock};
pub use engine::SequencerEngine;
pub use midi_out::{MidiOutput, RecordingOutput, TraceOutput};
pub use protocol::{connect, Command, ControlEndpoint, EngineEndpoint, Reply, SongChange};
pub use sequencer::{Sequencer, SequencerEvent};

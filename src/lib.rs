//! midiseq - Standard MIDI File decoding and a GS/XG-aware playback engine.
//!
//! This library provides the pieces of a MIDI player:
//! - [`midi`]: the message codec, SMF parser and writer, and the snapshot rewriter
//! - [`synth`]: per-channel parameter state, sysex dialects and the synthesis processor
//! - [`transport`]: the control-side sequencer and the audio-side engine
//! - [`audio`]: real-time output and offline WAV rendering
//! - [`config`]: engine configuration

pub mod audio;
pub mod config;
pub mod midi;
pub mod synth;
pub mod transport;

// Re-export commonly used types
pub use audio::{render_to_wav, AudioOutput, EngineHost};
pub use config::{ConfigError, EngineConfig};
pub use midi::{apply_snapshot_to_midi, parse_midi, MidiFileParser, MidiMessage, ParseError, ParsedMidi};
pub use synth::{SnapshotError, SynthProcessor, SynthSnapshot};
pub use transport::{connect, Sequencer, SequencerEngine, SequencerEvent};

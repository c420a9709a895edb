//! Audio output for the playback engine.
//!
//! This module hosts the engine on the audio side:
//! - Real-time output through rodio, pulling fixed-size blocks
//! - Offline rendering of a song to a WAV file with hound

pub mod output;
pub mod render;

pub use output::{AudioOutput, EngineHost, EngineSource, BUFFER_SIZE};
pub use render::render_to_wav;

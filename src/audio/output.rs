//! Real-time audio output.
//!
//! The [`EngineHost`] is the audio side of the transport. It is moved into
//! the rodio audio thread inside an [`EngineSource`], or driven inline by
//! the offline renderer.

use crate::transport::{AudioClock, EngineEndpoint, SampleClock, SequencerEngine};
use anyhow::{Context, Result};
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::sync::Arc;
use std::time::Duration;

/// Frames per engine tick for real-time playback.
/// Smaller = tighter timing but higher CPU usage.
pub const BUFFER_SIZE: usize = 256;

/// The engine together with its mailbox end and the clock it drives.
pub struct EngineHost {
    engine: SequencerEngine,
    endpoint: EngineEndpoint,
    clock: Arc<SampleClock>,
}

impl EngineHost {
    pub fn new(engine: SequencerEngine, endpoint: EngineEndpoint, clock: Arc<SampleClock>) -> Self {
        Self {
            engine,
            endpoint,
            clock,
        }
    }

    pub fn clock(&self) -> Arc<SampleClock> {
        Arc::clone(&self.clock)
    }

    pub fn engine(&self) -> &SequencerEngine {
        &self.engine
    }

    /// Renders one block.
    ///
    /// Pending commands are applied first, then every event due at the
    /// block's start time is played, then audio is rendered and the clock
    /// moves forward by the block length.
    pub fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let now = self.clock.now();
        while let Some(command) = self.endpoint.try_recv() {
            self.engine.handle_command(command, now);
        }
        self.engine.process_tick(now);
        for reply in self.engine.take_replies() {
            self.endpoint.post(reply);
        }

        self.engine.render(left, right);
        self.clock.advance(left.len() as u64);
    }
}

/// rodio source that pulls interleaved stereo from an [`EngineHost`].
pub struct EngineSource {
    host: EngineHost,
    sample_rate: u32,
    left_buf: Vec<f32>,
    right_buf: Vec<f32>,
    /// Current position in the buffer.
    buf_pos: usize,
    /// Current channel (0 = left, 1 = right).
    channel: usize,
}

impl EngineSource {
    pub fn new(host: EngineHost, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let sample_rate = host.clock.sample_rate();
        Self {
            host,
            sample_rate,
            left_buf: vec![0.0; block_size],
            right_buf: vec![0.0; block_size],
            buf_pos: block_size, // Start at end to trigger first render
            channel: 0,
        }
    }
}

impl Iterator for EngineSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.buf_pos >= self.left_buf.len() {
            self.host
                .render_block(&mut self.left_buf, &mut self.right_buf);
            self.buf_pos = 0;
        }

        // Interleave stereo samples: L, R, L, R, ...
        let sample = if self.channel == 0 {
            self.left_buf[self.buf_pos]
        } else {
            self.right_buf[self.buf_pos]
        };

        self.channel = 1 - self.channel;
        if self.channel == 0 {
            self.buf_pos += 1;
        }

        Some(sample)
    }
}

impl Source for EngineSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// A running output stream. Dropping it stops audio.
pub struct AudioOutput {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
}

impl AudioOutput {
    /// Opens the default output device and starts pulling from `host`.
    ///
    /// # Errors
    ///
    /// Returns error if no output device can be opened or playback
    /// cannot start.
    pub fn start(host: EngineHost, block_size: usize) -> Result<Self> {
        let (stream, stream_handle) =
            OutputStream::try_default().context("Failed to open audio output")?;

        let source = EngineSource::new(host, block_size);
        stream_handle
            .play_raw(source)
            .context("Failed to start audio playback")?;

        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
        })
    }
}

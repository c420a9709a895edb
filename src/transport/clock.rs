//! Clock sources for the transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Share of the instantaneous error folded into the high-resolution offset
/// on every sample.
pub const SMOOTHING: f64 = 0.01;

/// A monotonic audio clock in seconds.
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Counts rendered frames. Written by the audio host, read by anyone.
#[derive(Debug)]
pub struct SampleClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl SampleClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Moves the clock forward by `frames` rendered frames.
    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

impl AudioClock for SampleClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    // f64 bits
    seconds: AtomicU64,
}

impl ManualClock {
    pub fn new(seconds: f64) -> Self {
        Self {
            seconds: AtomicU64::new(seconds.to_bits()),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.seconds.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::Acquire))
    }
}

/// Wall-clock estimate of the playback position, smoothed toward the audio
/// clock. For display only; never schedule from it.
#[derive(Debug)]
pub struct HighResolutionClock {
    epoch: Instant,
    offset: f64,
}

impl Default for HighResolutionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HighResolutionClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset: 0.0,
        }
    }

    /// Seconds since this clock was created.
    pub fn wall_now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Re-anchors the offset after a seek or resume.
    pub fn resync(&mut self, audio_now: f64, wall_now: f64, rate: f64) {
        self.offset = (audio_now - wall_now) * rate;
    }

    /// Keeps the estimate continuous across a playback rate change.
    pub fn rescale(&mut self, old_rate: f64, new_rate: f64) {
        if old_rate != 0.0 {
            self.offset *= new_rate / old_rate;
        }
    }

    /// Nudges the offset toward `current` and returns the smoothed estimate.
    ///
    /// # Arguments
    ///
    /// * `current` - Playback time derived from the audio clock
    /// * `absolute_start` - Audio-clock time at which playback started
    /// * `rate` - Playback rate
    /// * `wall` - Wall-clock reading, seconds
    pub fn smooth(&mut self, current: f64, absolute_start: f64, rate: f64, wall: f64) -> f64 {
        let elapsed = (wall - absolute_start) * rate;
        let estimated = self.offset + elapsed;
        self.offset += (current - estimated) * SMOOTHING * rate;
        self.offset + elapsed
    }
}

//! Engine configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Command-line flags override what the file says.

use crate::midi::NameEncoding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or saving a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Frames rendered per engine tick.
    pub block_size: usize,
    /// Encoding of track names and other text.
    pub name_encoding: NameEncoding,
    /// Start playback at the first note instead of tick 0.
    pub skip_to_first_note_on: bool,
    /// Seeking while paused stays paused.
    pub preserve_playback_state: bool,
    pub loop_enabled: bool,
    /// Number of loops; `None` loops forever.
    pub loop_count: Option<u32>,
    pub auto_play: bool,
    pub playback_rate: f64,
    /// Seconds rendered after the song ends, for note release.
    pub release_tail: f64,
    pub soundfont: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 256,
            name_encoding: NameEncoding::default(),
            skip_to_first_note_on: true,
            preserve_playback_state: false,
            loop_enabled: false,
            loop_count: None,
            auto_play: true,
            playback_rate: 1.0,
            release_tail: 2.0,
            soundfont: None,
        }
    }
}

impl EngineConfig {
    /// Loads a JSON config file and checks its values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be positive".into()));
        }
        if !(self.playback_rate > 0.0 && self.playback_rate.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "playback_rate must be positive, got {}",
                self.playback_rate
            )));
        }
        if self.release_tail < 0.0 {
            return Err(ConfigError::Invalid("release_tail must not be negative".into()));
        }
        Ok(())
    }
}

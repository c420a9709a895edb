//! Offline rendering to WAV.
//!
//! Drives the same engine, mailbox and clock as live playback, but pulls
//! blocks as fast as possible and writes them to a file.

use super::output::EngineHost;
use crate::config::EngineConfig;
use crate::midi::ParsedMidi;
use crate::synth::SynthProcessor;
use crate::transport::{connect, SampleClock, Sequencer, SequencerEngine, SequencerEvent};
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;
use std::sync::Arc;

/// Renders one song to a 16-bit stereo WAV file.
///
/// Rendering stops once the engine reports the song finished and the
/// release tail has played, or when the song length plus the tail is
/// reached, whichever comes first.
///
/// # Arguments
///
/// * `synth` - The processor to render with
/// * `midi` - The song
/// * `config` - Sample rate, block size and release tail
/// * `output_path` - Path for the output WAV file
/// * `progress_callback` - Optional callback for progress updates (0.0 to 1.0)
///
/// # Returns
///
/// The number of frames written
///
/// # Errors
///
/// Returns error if the output file cannot be created or written.
pub fn render_to_wav<P, F>(
    synth: SynthProcessor,
    midi: Arc<ParsedMidi>,
    config: &EngineConfig,
    output_path: P,
    mut progress_callback: Option<F>,
) -> Result<u64>
where
    P: AsRef<Path>,
    F: FnMut(f32),
{
    let sample_rate = config.sample_rate.max(1);
    let block_size = config.block_size.max(1);

    let (control, endpoint) = connect();
    let clock = Arc::new(SampleClock::new(sample_rate));
    let mut host = EngineHost::new(SequencerEngine::new(synth), endpoint, Arc::clone(&clock));
    let mut sequencer = Sequencer::new(control, clock);
    sequencer.set_skip_to_first_note_on(false);
    sequencer.load_playlist(vec![Arc::clone(&midi)], true);

    let tail_frames = (config.release_tail.max(0.0) * sample_rate as f64) as u64;
    let total_frames = (midi.duration * sample_rate as f64) as u64 + tail_frames;

    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output_path.as_ref(), spec).with_context(|| {
        format!(
            "Failed to create output WAV file: {}",
            output_path.as_ref().display()
        )
    })?;

    let mut left_buf = vec![0.0f32; block_size];
    let mut right_buf = vec![0.0f32; block_size];
    let mut written = 0u64;
    let mut stop_at = total_frames;

    while written < stop_at {
        let frames = ((stop_at - written) as usize).min(block_size);
        host.render_block(&mut left_buf[..frames], &mut right_buf[..frames]);

        for i in 0..frames {
            // Convert f32 (-1.0 to 1.0) to i16
            let left_sample = (left_buf[i] * 32767.0).clamp(-32768.0, 32767.0) as i16;
            let right_sample = (right_buf[i] * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(left_sample)?;
            writer.write_sample(right_sample)?;
        }
        written += frames as u64;

        for event in sequencer.poll() {
            if event == (SequencerEvent::Paused { finished: true }) {
                stop_at = stop_at.min(written + tail_frames);
                tracing::debug!("Song finished at frame {}", written);
            }
        }

        if let Some(ref mut callback) = progress_callback {
            callback((written as f32 / stop_at.max(1) as f32).min(1.0));
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    tracing::info!(
        "Rendered {:.1}s to {}",
        written as f64 / sample_rate as f64,
        output_path.as_ref().display()
    );

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{sequence_with, MidiMessage};
    use crate::synth::RecordingBackend;

    #[test]
    fn test_render_writes_song_and_tail() {
        let midi = sequence_with(
            480,
            &[],
            vec![vec![
                MidiMessage::note_on(0, 0, 60, 100),
                MidiMessage::note_off(960, 0, 60),
            ]],
        );
        let config = EngineConfig {
            sample_rate: 1000,
            block_size: 100,
            release_tail: 0.5,
            ..Default::default()
        };
        let path = std::env::temp_dir().join(format!("midiseq_render_{}.wav", std::process::id()));
        let mut last_progress = 0.0;

        let frames = render_to_wav(
            SynthProcessor::new(Box::new(RecordingBackend::new())),
            Arc::new(midi),
            &config,
            &path,
            Some(|p: f32| last_progress = p),
        )
        .unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        let samples = reader.len();
        std::fs::remove_file(&path).ok();

        // One second of song, the finished pause lands within the song, then the tail.
        assert!(frames <= 1500);
        assert!(frames >= 1000);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 1000);
        assert_eq!(samples as u64, frames * 2);
        assert_eq!(last_progress, 1.0);
    }
}

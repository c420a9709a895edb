//! midiseq - command-line MIDI player and tools.
//!
//! Plays Standard MIDI Files through a SoundFont, renders them to WAV,
//! prints file information, and bakes locked channel settings into a file.
//!
//! # Usage
//!
//! ```bash
//! midiseq info song.mid other.mid
//! midiseq play --soundfont gm.sf2 --loop 2 song.mid
//! midiseq render --soundfont gm.sf2 song.mid song.wav
//! midiseq lock song.mid locks.json locked.mid
//! midiseq lock --clear 9 --transpose 0:-1.5 song.mid edited.mid
//! ```

use anyhow::{bail, Context, Result};
use midiseq::audio::{render_to_wav, AudioOutput, EngineHost};
use midiseq::config::EngineConfig;
use midiseq::midi::{
    apply_snapshot_to_midi, export_to_midi, meta, modify_midi, ChannelEdits, MidiFileParser,
    ParsedMidi, RewriteReport,
};
use midiseq::synth::{RustySynthBackend, SynthProcessor, SynthSnapshot};
use midiseq::transport::{
    connect, SampleClock, Sequencer, SequencerEngine, SequencerEvent, TraceOutput,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How often the player checks for replies.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subcommand {
    Info,
    Play,
    Render,
    Lock,
}

/// Command-line options for the application.
struct CliOptions {
    command: Subcommand,
    /// Path to a SoundFont file.
    soundfont: Option<PathBuf>,
    config: Option<PathBuf>,
    /// Locks to restore before playback.
    snapshot: Option<PathBuf>,
    /// `Some(0)` loops forever.
    loop_count: Option<u32>,
    rate: Option<f64>,
    /// Send MIDI to the log instead of the synthesizer.
    midi_trace: bool,
    /// Channels to clear and transpose when locking.
    edits: ChannelEdits,
    files: Vec<PathBuf>,
}

fn print_help(program: &str) {
    eprintln!("midiseq - MIDI player and tools");
    eprintln!();
    eprintln!("Usage: {} <COMMAND> [OPTIONS] <FILES>...", program);
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  info <files...>                      Print information about MIDI files");
    eprintln!("  play <files...>                      Play MIDI files as a playlist");
    eprintln!("  render <in.mid> <out.wav>            Render a MIDI file to WAV");
    eprintln!("  lock <in.mid> [snapshot] <out.mid>   Write locked channel settings into a file");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -sf, --soundfont PATH  SoundFont file (.sf2)");
    eprintln!("  -c, --config PATH      JSON configuration file");
    eprintln!("  -s, --snapshot PATH    Apply locks from a snapshot before playing");
    eprintln!("  -l, --loop N           Loop N times (0 loops forever)");
    eprintln!("  -r, --rate R           Playback rate");
    eprintln!("      --midi-trace       Log MIDI output instead of synthesizing it");
    eprintln!("      --clear CH         (lock) Remove every event of a channel");
    eprintln!("      --transpose CH:ST  (lock) Transpose a channel by ST semitones");
    eprintln!("  -h, --help             Print this help message");
    eprintln!();
    eprintln!("Set RUST_LOG=midiseq=debug for detailed logs.");
}

impl CliOptions {
    /// Parses command-line arguments.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let program = args.first().map(String::as_str).unwrap_or("midiseq");
        let mut command = None;
        let mut soundfont = None;
        let mut config = None;
        let mut snapshot = None;
        let mut loop_count = None;
        let mut rate = None;
        let mut midi_trace = false;
        let mut edits = ChannelEdits::default();
        let mut files = Vec::new();
        let mut i = 1;

        let value = |i: usize, flag: &str| -> Result<&String> {
            args.get(i)
                .with_context(|| format!("{} requires an argument", flag))
        };

        while i < args.len() {
            match args[i].as_str() {
                "--soundfont" | "-sf" => {
                    i += 1;
                    soundfont = Some(PathBuf::from(value(i, "--soundfont")?));
                }
                "--config" | "-c" => {
                    i += 1;
                    config = Some(PathBuf::from(value(i, "--config")?));
                }
                "--snapshot" | "-s" => {
                    i += 1;
                    snapshot = Some(PathBuf::from(value(i, "--snapshot")?));
                }
                "--loop" | "-l" => {
                    i += 1;
                    let text = value(i, "--loop")?;
                    loop_count = Some(
                        text.parse()
                            .with_context(|| format!("Invalid loop count: {}", text))?,
                    );
                }
                "--rate" | "-r" => {
                    i += 1;
                    let text = value(i, "--rate")?;
                    rate = Some(
                        text.parse()
                            .with_context(|| format!("Invalid playback rate: {}", text))?,
                    );
                }
                "--midi-trace" => midi_trace = true,
                "--clear" => {
                    i += 1;
                    let text = value(i, "--clear")?;
                    edits.clear.push(
                        text.parse()
                            .with_context(|| format!("Invalid channel: {}", text))?,
                    );
                }
                "--transpose" => {
                    i += 1;
                    edits.transpose.push(parse_transpose(value(i, "--transpose")?)?);
                }
                "--help" | "-h" => {
                    print_help(program);
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
                other if command.is_none() => {
                    command = Some(match other {
                        "info" => Subcommand::Info,
                        "play" => Subcommand::Play,
                        "render" => Subcommand::Render,
                        "lock" => Subcommand::Lock,
                        _ => {
                            eprintln!("Unknown command: {}", other);
                            eprintln!("Use --help for usage information");
                            std::process::exit(1);
                        }
                    });
                }
                other => files.push(PathBuf::from(other)),
            }
            i += 1;
        }

        let Some(command) = command else {
            print_help(program);
            std::process::exit(1);
        };

        Ok(Self {
            command,
            soundfont,
            config,
            snapshot,
            loop_count,
            rate,
            midi_trace,
            edits,
            files,
        })
    }

    /// Command-line flags win over the config file.
    fn apply_overrides(&self, config: &mut EngineConfig) {
        if let Some(path) = &self.soundfont {
            config.soundfont = Some(path.clone());
        }
        if let Some(count) = self.loop_count {
            config.loop_enabled = true;
            config.loop_count = (count > 0).then_some(count);
        }
        if let Some(rate) = self.rate {
            config.playback_rate = rate;
        }
    }
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    match cli.command {
        Subcommand::Info => run_info(&cli, &config),
        Subcommand::Play => run_play(&cli, &config),
        Subcommand::Render => run_render(&cli, &config),
        Subcommand::Lock => run_lock(&cli, &config),
    }
}

/// Formats seconds as m:ss.s
fn format_time(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor();
    format!("{}:{:04.1}", minutes as u64, seconds - minutes * 60.0)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reads and parses every file in parallel. Files that fail to parse are
/// reported and left out.
fn load_songs(files: &[PathBuf], config: &EngineConfig) -> Result<Vec<Arc<ParsedMidi>>> {
    if files.is_empty() {
        bail!("No MIDI files given");
    }
    let mut inputs = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read MIDI file: {}", path.display()))?;
        inputs.push((file_stem(path), bytes));
    }

    let parser = MidiFileParser::with_encoding(config.name_encoding);
    let mut songs = Vec::with_capacity(files.len());
    for (path, result) in files.iter().zip(parser.parse_playlist(&inputs)) {
        match result {
            Ok(midi) => songs.push(Arc::new(midi)),
            Err(err) => {
                tracing::error!("Skipping {}: {}", path.display(), err);
            }
        }
    }
    if songs.is_empty() {
        bail!("None of the given files could be parsed");
    }
    Ok(songs)
}

fn build_synth(config: &EngineConfig, snapshot: Option<&Path>) -> Result<SynthProcessor> {
    let soundfont = config
        .soundfont
        .as_ref()
        .context("A SoundFont is required (use --soundfont or the config file)")?;
    let backend = RustySynthBackend::from_file(soundfont, config.sample_rate)?;
    let mut synth = SynthProcessor::new(Box::new(backend));
    if let Some(path) = snapshot {
        let snapshot = SynthSnapshot::load(path)
            .with_context(|| format!("Failed to load snapshot: {}", path.display()))?;
        synth.apply_snapshot(&snapshot);
        tracing::info!("Applied snapshot with {} channels", snapshot.channels.len());
    }
    Ok(synth)
}

fn run_info(cli: &CliOptions, config: &EngineConfig) -> Result<()> {
    for midi in load_songs(&cli.files, config)? {
        let channels: usize = midi.used_channels.iter().map(|c| c.len()).sum();
        println!("{}", midi.name);
        println!(
            "  format {}, {} tracks, {} ticks per quarter",
            midi.format,
            midi.track_count(),
            midi.division
        );
        println!(
            "  duration {}, first note at {}",
            format_time(midi.duration),
            format_time(midi.first_note_on_seconds())
        );
        println!(
            "  loop {}..{} ticks, {} tempo changes, {} messages",
            midi.loop_points.start,
            midi.loop_points.end,
            midi.tempo_changes.len(),
            midi.message_count()
        );
        println!(
            "  {} channel(s) with notes, keys {}..{}, {} lyrics",
            channels,
            midi.key_range.0,
            midi.key_range.1,
            midi.lyrics.len()
        );
        if !midi.copyright.is_empty() {
            println!("  copyright: {}", midi.copyright);
        }
    }
    Ok(())
}

fn run_play(cli: &CliOptions, config: &EngineConfig) -> Result<()> {
    let synth = build_synth(config, cli.snapshot.as_deref())?;
    let songs = load_songs(&cli.files, config)?;
    let song_count = songs.len();

    let (control, endpoint) = connect();
    let clock = Arc::new(SampleClock::new(config.sample_rate));
    let host = EngineHost::new(SequencerEngine::new(synth), endpoint, Arc::clone(&clock));
    let _output = AudioOutput::start(host, config.block_size)?;

    let mut sequencer = Sequencer::new(control, clock);
    sequencer.set_skip_to_first_note_on(config.skip_to_first_note_on);
    sequencer.set_preserve_playback_state(config.preserve_playback_state);
    sequencer.set_loop(config.loop_enabled, config.loop_count);
    if config.playback_rate != 1.0 {
        sequencer.set_playback_rate(config.playback_rate);
    }
    if cli.midi_trace {
        sequencer.connect_midi_output(Some(Box::new(TraceOutput)));
    }
    sequencer.load_playlist(songs, config.auto_play);
    if !config.auto_play {
        sequencer.play(false);
    }

    let mut current = 0;
    let mut stdout = std::io::stdout();
    loop {
        std::thread::sleep(POLL_INTERVAL);
        for event in sequencer.poll() {
            match event {
                SequencerEvent::SongChanged {
                    index,
                    name,
                    duration,
                } => {
                    current = index;
                    println!("[{}/{}] {} ({})", index + 1, song_count, name, format_time(duration));
                }
                SequencerEvent::Text {
                    text,
                    kind: meta::LYRIC,
                    ..
                } => {
                    print!("{}", text);
                    stdout.flush().ok();
                }
                SequencerEvent::Text {
                    text,
                    kind: meta::MARKER,
                    ..
                } => println!("-- {}", text),
                SequencerEvent::Paused { finished: true } if current + 1 >= song_count => {
                    println!();
                    return Ok(());
                }
                SequencerEvent::LoadError(message) => bail!("Playback failed: {}", message),
                _ => {}
            }
        }
    }
}

fn run_render(cli: &CliOptions, config: &EngineConfig) -> Result<()> {
    let [input, output] = cli.files.as_slice() else {
        bail!("render needs <in.mid> <out.wav>");
    };
    let synth = build_synth(config, cli.snapshot.as_deref())?;
    let midi = MidiFileParser::with_encoding(config.name_encoding)
        .parse_file(input)
        .with_context(|| format!("Failed to parse {}", input.display()))?;

    let mut last_step = 0;
    let frames = render_to_wav(
        synth,
        Arc::new(midi),
        config,
        output,
        Some(|progress: f32| {
            let step = (progress * 10.0) as u32;
            if step > last_step {
                last_step = step;
                eprint!("\rRendering... {:3}%", step * 10);
            }
        }),
    )?;
    eprintln!();
    println!(
        "Wrote {} ({})",
        output.display(),
        format_time(frames as f64 / config.sample_rate as f64)
    );
    Ok(())
}

/// Parses `CH:SEMITONES`, e.g. `3:-2.5`.
fn parse_transpose(text: &str) -> Result<(usize, f32)> {
    let (channel, semitones) = text
        .split_once(':')
        .with_context(|| format!("Expected CH:SEMITONES, got {}", text))?;
    let channel = channel
        .parse()
        .with_context(|| format!("Invalid channel: {}", channel))?;
    let semitones: f32 = semitones
        .parse()
        .with_context(|| format!("Invalid semitones: {}", semitones))?;
    if !semitones.is_finite() {
        bail!("Invalid semitones: {}", text);
    }
    Ok((channel, semitones))
}

fn run_lock(cli: &CliOptions, config: &EngineConfig) -> Result<()> {
    let (input, snapshot_path, output) = match cli.files.as_slice() {
        [input, snapshot, output] => (input, Some(snapshot), output),
        [input, output] if !cli.edits.is_empty() => (input, None, output),
        _ => bail!("lock needs <in.mid> <snapshot> <out.mid>, or --clear/--transpose with <in.mid> <out.mid>"),
    };
    let mut midi = MidiFileParser::with_encoding(config.name_encoding)
        .parse_file(input)
        .with_context(|| format!("Failed to parse {}", input.display()))?;

    if let Some(path) = snapshot_path {
        let snapshot = SynthSnapshot::load(path)
            .with_context(|| format!("Failed to load snapshot: {}", path.display()))?;
        let report = apply_snapshot_to_midi(&mut midi, &snapshot.channels);
        println!(
            "Locked {} preset(s) and {} controller(s), removed {} event(s)",
            report.presets.len(),
            report.controllers.len(),
            report.events_removed
        );
        if report.gs_inserted {
            println!("Inserted a GS reset");
        }
        print_skipped(&report);
    }

    if !cli.edits.is_empty() {
        let report = modify_midi(&mut midi, &cli.edits);
        println!(
            "Cleared {:?}, transposed {:?}, removed {} event(s)",
            report.cleared, report.transposed, report.events_removed
        );
        print_skipped(&report);
    }

    export_to_midi(&midi, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn print_skipped(report: &RewriteReport) {
    if !report.skipped.is_empty() {
        println!("Skipped channels without notes: {:?}", report.skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transpose() {
        assert_eq!(parse_transpose("3:-2.5").unwrap(), (3, -2.5));
        assert_eq!(parse_transpose("17:12").unwrap(), (17, 12.0));
        assert!(parse_transpose("3").is_err());
        assert!(parse_transpose("x:1").is_err());
        assert!(parse_transpose("1:NaN").is_err());
    }
}

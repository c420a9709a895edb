//! Control-side view of playback.
//!
//! [`Sequencer`] never touches the engine's state. It sends commands through
//! its [`ControlEndpoint`] and mirrors the playback clock locally from the
//! audio clock and the replies it receives, so the position can be read at
//! any time without a round trip.

use super::clock::{AudioClock, HighResolutionClock};
use super::midi_out::{reset_burst, MidiOutput};
use super::protocol::{Command, ControlEndpoint, Reply, SongChange};
use crate::midi::ParsedMidi;
use std::sync::Arc;
use uuid::Uuid;

/// Clock nudge applied after attaching or detaching a MIDI port, so the
/// engine seeks and resends controller state.
const MIDI_OUTPUT_RESYNC: f64 = 0.1;

/// What a reply means to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SequencerEvent {
    SongChanged {
        index: usize,
        name: String,
        duration: f64,
    },
    TimeChanged(f64),
    Text {
        text: String,
        kind: u8,
        lyric_index: Option<usize>,
    },
    Paused {
        finished: bool,
    },
    TempoChanged(f64),
    LoadError(String),
}

pub struct Sequencer {
    endpoint: ControlEndpoint,
    clock: Arc<dyn AudioClock>,
    high_resolution: HighResolutionClock,
    session: Uuid,
    span: tracing::Span,
    midi: Option<Arc<ParsedMidi>>,
    song_index: usize,
    song_count: usize,
    paused_time: Option<f64>,
    absolute_start: f64,
    playback_rate: f64,
    finished: bool,
    loop_enabled: bool,
    loop_count: Option<u32>,
    preserve_playback_state: bool,
    midi_output: Option<Box<dyn MidiOutput>>,
}

impl Sequencer {
    pub fn new(endpoint: ControlEndpoint, clock: Arc<dyn AudioClock>) -> Self {
        let session = Uuid::new_v4();
        let span = tracing::info_span!("session", id = %session);
        span.in_scope(|| tracing::debug!("Sequencer created"));
        Self {
            endpoint,
            clock,
            high_resolution: HighResolutionClock::new(),
            session,
            span,
            midi: None,
            song_index: 0,
            song_count: 0,
            paused_time: Some(0.0),
            absolute_start: 0.0,
            playback_rate: 1.0,
            finished: false,
            loop_enabled: false,
            loop_count: None,
            preserve_playback_state: false,
            midi_output: None,
        }
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn midi(&self) -> Option<&Arc<ParsedMidi>> {
        self.midi.as_ref()
    }

    pub fn song_index(&self) -> usize {
        self.song_index
    }

    pub fn song_count(&self) -> usize {
        self.song_count
    }

    pub fn duration(&self) -> f64 {
        self.midi.as_ref().map_or(0.0, |midi| midi.duration)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_time.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    fn send(&self, command: Command) {
        let _enter = self.span.enter();
        tracing::trace!("-> {:?}", CommandTag(&command));
        self.endpoint.send(command);
    }

    /// Playback position in seconds, from the audio clock.
    pub fn current_time(&self) -> f64 {
        match self.paused_time {
            Some(time) => time,
            None => (self.clock.now() - self.absolute_start) * self.playback_rate,
        }
    }

    /// Smoothed position for display. Never schedule from it.
    pub fn current_high_resolution_time(&mut self) -> f64 {
        if let Some(time) = self.paused_time {
            return time;
        }
        let current = self.current_time();
        let wall = self.high_resolution.wall_now();
        self.high_resolution
            .smooth(current, self.absolute_start, self.playback_rate, wall)
    }

    fn recalculate_start_time(&mut self, time: f64) {
        let now = self.clock.now();
        self.absolute_start = now - time / self.playback_rate;
        let wall = self.high_resolution.wall_now();
        self.high_resolution.resync(now, wall, self.playback_rate);
    }

    /// Starts or resumes. A finished song restarts from zero.
    pub fn play(&mut self, reset_time: bool) {
        let reset_time = reset_time || self.finished;
        let from = if reset_time {
            0.0
        } else {
            self.paused_time.unwrap_or_else(|| self.current_time())
        };
        self.recalculate_start_time(from);
        self.paused_time = None;
        self.finished = false;
        self.send(Command::Play { reset_time });
    }

    pub fn pause(&mut self) {
        if self.is_paused() {
            return;
        }
        self.paused_time = Some(self.current_time());
        self.send(Command::Pause);
    }

    pub fn stop(&mut self) {
        self.send(Command::Stop);
    }

    /// Seeks. Playback resumes unless paused with the playback state preserved.
    pub fn set_current_time(&mut self, time: f64) {
        if !(self.is_paused() && self.preserve_playback_state) {
            self.paused_time = None;
            self.finished = false;
        }
        self.recalculate_start_time(time.max(0.0));
        self.send(Command::SetTime(time));
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        if !(rate > 0.0 && rate.is_finite()) {
            tracing::warn!("Ignoring playback rate {}", rate);
            return;
        }
        let time = self.current_time();
        self.high_resolution.rescale(self.playback_rate, rate);
        self.playback_rate = rate;
        if !self.is_paused() {
            self.recalculate_start_time(time);
        }
        self.send(Command::SetPlaybackRate(rate));
    }

    /// `count: None` loops forever.
    pub fn set_loop(&mut self, enabled: bool, count: Option<u32>) {
        self.loop_enabled = enabled;
        self.loop_count = count;
        self.send(Command::SetLoop { enabled, count });
    }

    pub fn set_skip_to_first_note_on(&self, skip: bool) {
        self.send(Command::SetSkipToFirstNoteOn(skip));
    }

    pub fn set_preserve_playback_state(&mut self, preserve: bool) {
        self.preserve_playback_state = preserve;
        self.send(Command::SetPreservePlaybackState(preserve));
    }

    /// Sends a new playlist. More than one song turns looping off.
    pub fn load_playlist(&mut self, songs: Vec<Arc<ParsedMidi>>, auto_play: bool) {
        self.pause();
        self.song_count = songs.len();
        if self.song_count > 1 {
            self.loop_enabled = false;
        }
        {
            let _enter = self.span.enter();
            tracing::info!("Loading {} songs", songs.len());
        }
        self.send(Command::LoadPlaylist { songs, auto_play });
        if !auto_play {
            self.paused_time = Some(self.current_time());
        }
    }

    pub fn next_song(&self) {
        self.send(Command::ChangeSong(SongChange::Forward));
    }

    pub fn previous_song(&self) {
        self.send(Command::ChangeSong(SongChange::Backward));
    }

    pub fn jump_to_song(&self, index: usize) {
        self.send(Command::ChangeSong(SongChange::Index(index)));
    }

    /// Attaches or detaches the external MIDI port.
    ///
    /// Both the outgoing and the incoming port get the reset burst, and the
    /// position is nudged back so the engine resends its state.
    pub fn connect_midi_output(&mut self, output: Option<Box<dyn MidiOutput>>) {
        let burst = reset_burst();
        if let Some(old) = self.midi_output.as_mut() {
            for bytes in &burst {
                old.send(bytes);
            }
        }
        self.midi_output = output;
        let attached = match self.midi_output.as_mut() {
            Some(new) => {
                for bytes in &burst {
                    new.send(bytes);
                }
                let _enter = self.span.enter();
                tracing::info!("MIDI output attached: {}", new.name());
                true
            }
            None => false,
        };
        self.send(Command::SetMidiPassthrough(attached));
        let time = self.current_time() - MIDI_OUTPUT_RESYNC;
        self.set_current_time(time);
    }

    /// Applies one reply to the local mirror.
    pub fn handle_reply(&mut self, reply: Reply) -> Option<SequencerEvent> {
        let _enter = self.span.clone().entered();
        tracing::trace!("<- {}", reply.tag());
        match reply {
            Reply::RawMidiEvent(bytes) => {
                if let Some(output) = self.midi_output.as_mut() {
                    if bytes.first().is_some_and(|&status| status >= 0x80) {
                        output.send(&bytes);
                    }
                }
                None
            }
            Reply::SongChanged {
                midi,
                index,
                auto_play,
            } => {
                self.song_index = index;
                self.recalculate_start_time(0.0);
                if auto_play {
                    self.paused_time = None;
                }
                self.finished = false;
                let event = SequencerEvent::SongChanged {
                    index,
                    name: midi.name.clone(),
                    duration: midi.duration,
                };
                tracing::info!("Now playing {:?}", midi.name);
                self.midi = Some(midi);
                Some(event)
            }
            Reply::TimeChanged { time, sent_at } => {
                self.absolute_start = sent_at - time / self.playback_rate;
                let wall = self.high_resolution.wall_now();
                self.high_resolution
                    .resync(self.clock.now(), wall, self.playback_rate);
                if self.is_paused() && self.preserve_playback_state {
                    self.paused_time = Some(time);
                } else {
                    self.paused_time = None;
                }
                Some(SequencerEvent::TimeChanged(time))
            }
            Reply::PauseAck { finished } => {
                self.paused_time = Some(self.current_time());
                self.finished = finished;
                Some(SequencerEvent::Paused { finished })
            }
            Reply::TextEvent {
                data,
                kind,
                lyric_index,
            } => Some(SequencerEvent::Text {
                text: String::from_utf8_lossy(&data).into_owned(),
                kind,
                lyric_index,
            }),
            Reply::TempoChanged(tempo) => Some(SequencerEvent::TempoChanged(tempo)),
            Reply::LoadError(message) => {
                tracing::error!("Engine failed to load: {}", message);
                Some(SequencerEvent::LoadError(message))
            }
        }
    }

    /// Handles every reply that has arrived.
    pub fn poll(&mut self) -> Vec<SequencerEvent> {
        self.endpoint
            .drain()
            .into_iter()
            .filter_map(|reply| self.handle_reply(reply))
            .collect()
    }
}

/// Logs a command by name, without its payload.
struct CommandTag<'a>(&'a Command);

impl std::fmt::Debug for CommandTag<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            Command::LoadPlaylist { .. } => "loadPlaylist",
            Command::ChangeSong(_) => "changeSong",
            Command::SetTime(_) => "setTime",
            Command::SetPlaybackRate(_) => "setPlaybackRate",
            Command::SetLoop { .. } => "setLoop",
            Command::SetMidiPassthrough(_) => "setMidiPassthrough",
            Command::Pause => "pause",
            Command::Play { .. } => "play",
            Command::Stop => "stop",
            Command::SetSkipToFirstNoteOn(_) => "setSkipToFirstNoteOn",
            Command::SetPreservePlaybackState(_) => "setPreservePlaybackState",
        };
        f.write_str(name)
    }
}

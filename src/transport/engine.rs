//! The playback engine.
//!
//! [`SequencerEngine`] owns the playlist, the [`SynthProcessor`] and every
//! piece of playback state. It is driven from the audio side: commands come
//! in through [`SequencerEngine::handle_command`], time advances through
//! [`SequencerEngine::process_tick`], and replies are collected for the host
//! to post back to the control domain.

use super::midi_out::reset_burst;
use super::protocol::{Command, Reply, SongChange};
use crate::midi::{
    classify_channel, controller, meta, status, ChannelClass, MidiMessage, ParsedMidi,
    CHANNELS_PER_PORT, DEFAULT_TEMPO,
};
use crate::synth::controllers::{reset_value, survives_rp15_reset, CONTROLLER_COUNT, PITCH_WHEEL_CENTER};
use crate::synth::SynthProcessor;
use std::collections::HashMap;
use std::sync::Arc;

/// Controllers replayed verbatim while seeking: data entry, parameter
/// selection, bank select and Reset All Controllers.
fn replays_during_seek(cc: u8) -> bool {
    matches!(
        cc,
        controller::DATA_ENTRY_MSB
            | controller::DATA_ENTRY_LSB
            | 96 // data increment
            | 97 // data decrement
            | controller::NRPN_LSB
            | controller::NRPN_MSB
            | controller::RPN_LSB
            | controller::RPN_MSB
            | controller::BANK_SELECT
            | controller::BANK_SELECT_LSB
            | controller::RESET_ALL_CONTROLLERS
    )
}

fn seconds_per_tick(tempo: f64, division: u16) -> f64 {
    60.0 / (tempo * division.max(1) as f64)
}

/// Where a seek stops.
#[derive(Debug, Clone, Copy)]
enum SeekTarget {
    Seconds(f64),
    Ticks(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlayingNote {
    channel: usize,
    key: u8,
    velocity: u8,
}

/// Per-channel state collected while seeking.
#[derive(Debug, Clone)]
struct SavedChannel {
    pitch_bend: u16,
    program: Option<u8>,
    bank: u8,
    actual_bank: u8,
    controllers: [u8; CONTROLLER_COUNT],
}

impl SavedChannel {
    fn new() -> Self {
        Self {
            pitch_bend: PITCH_WHEEL_CENTER,
            program: None,
            bank: 0,
            actual_bank: 0,
            controllers: std::array::from_fn(|cc| reset_value(cc as u8)),
        }
    }

    /// Reset All Controllers as RP-15 defines it.
    fn reset_controllers(&mut self) {
        self.pitch_bend = PITCH_WHEEL_CENTER;
        for cc in 0..CONTROLLER_COUNT as u8 {
            if !survives_rp15_reset(cc) {
                self.controllers[cc as usize] = reset_value(cc);
            }
        }
    }
}

pub struct SequencerEngine {
    synth: SynthProcessor,
    songs: Vec<Arc<ParsedMidi>>,
    song_index: usize,
    midi: Option<Arc<ParsedMidi>>,
    /// Cursor into every track.
    event_index: Vec<usize>,
    /// Song time of the next event to play, in seconds.
    played_time: f64,
    /// Seconds per tick at the current tempo.
    tick_seconds: f64,
    /// Port of every track, updated by MIDI Port meta events.
    track_ports: Vec<u8>,
    /// First channel of every assigned port.
    port_offsets: HashMap<u8, usize>,
    next_port_offset: usize,
    loop_enabled: bool,
    /// Remaining loops; `None` loops forever.
    loop_count: Option<u32>,
    playing_notes: Vec<PlayingNote>,
    paused_time: Option<f64>,
    absolute_start: f64,
    playback_rate: f64,
    active: bool,
    passthrough: bool,
    skip_to_first_note_on: bool,
    preserve_playback_state: bool,
    /// Audio clock reading of the current call.
    now: f64,
    outbox: Vec<Reply>,
}

impl SequencerEngine {
    pub fn new(synth: SynthProcessor) -> Self {
        Self {
            synth,
            songs: Vec::new(),
            song_index: 0,
            midi: None,
            event_index: Vec::new(),
            played_time: 0.0,
            tick_seconds: seconds_per_tick(DEFAULT_TEMPO as f64, 480),
            track_ports: Vec::new(),
            port_offsets: HashMap::new(),
            next_port_offset: 0,
            loop_enabled: false,
            loop_count: None,
            playing_notes: Vec::new(),
            paused_time: Some(0.0),
            absolute_start: 0.0,
            playback_rate: 1.0,
            active: false,
            passthrough: false,
            skip_to_first_note_on: true,
            preserve_playback_state: false,
            now: 0.0,
            outbox: Vec::new(),
        }
    }

    pub fn synth(&self) -> &SynthProcessor {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut SynthProcessor {
        &mut self.synth
    }

    pub fn midi(&self) -> Option<&Arc<ParsedMidi>> {
        self.midi.as_ref()
    }

    pub fn song_index(&self) -> usize {
        self.song_index
    }

    pub fn song_count(&self) -> usize {
        self.songs.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_time.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn loop_count(&self) -> Option<u32> {
        self.loop_count
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn set_skip_to_first_note_on(&mut self, skip: bool) {
        self.skip_to_first_note_on = skip;
    }

    pub fn set_preserve_playback_state(&mut self, preserve: bool) {
        self.preserve_playback_state = preserve;
    }

    pub fn set_loop(&mut self, enabled: bool, count: Option<u32>) {
        self.loop_enabled = enabled;
        self.loop_count = count;
    }

    /// Replies produced since the last call.
    pub fn take_replies(&mut self) -> Vec<Reply> {
        std::mem::take(&mut self.outbox)
    }

    fn post(&mut self, reply: Reply) {
        self.outbox.push(reply);
    }

    fn post_raw(&mut self, bytes: Vec<u8>) {
        self.post(Reply::RawMidiEvent(bytes));
    }

    /// Applies one command at audio time `now`.
    pub fn handle_command(&mut self, command: Command, now: f64) {
        self.now = now;
        match command {
            Command::LoadPlaylist { songs, auto_play } => self.load_playlist(songs, auto_play),
            Command::ChangeSong(SongChange::Forward) => self.next_song(),
            Command::ChangeSong(SongChange::Backward) => self.previous_song(),
            Command::ChangeSong(SongChange::Index(index)) => self.jump_to_song(index),
            Command::SetTime(time) => self.set_current_time(time),
            Command::SetPlaybackRate(rate) => self.set_playback_rate(rate),
            Command::SetLoop { enabled, count } => self.set_loop(enabled, count),
            Command::SetMidiPassthrough(enabled) => {
                self.passthrough = enabled;
                tracing::info!("MIDI passthrough {}", if enabled { "on" } else { "off" });
            }
            Command::Pause => self.pause(false),
            Command::Play { reset_time } => self.play(reset_time),
            Command::Stop => self.stop(),
            Command::SetSkipToFirstNoteOn(skip) => self.set_skip_to_first_note_on(skip),
            Command::SetPreservePlaybackState(preserve) => self.set_preserve_playback_state(preserve),
        }
    }

    /// Playback position in seconds.
    pub fn current_time(&self) -> f64 {
        match self.paused_time {
            Some(time) => time,
            None => (self.now - self.absolute_start) * self.playback_rate,
        }
    }

    fn recalculate_start_time(&mut self, time: f64) {
        self.absolute_start = self.now - time / self.playback_rate;
    }

    fn can_loop(&self) -> bool {
        self.loop_enabled && self.loop_count.map_or(true, |count| count > 0)
    }

    fn consume_loop(&mut self) {
        if let Some(count) = self.loop_count.as_mut() {
            *count = count.saturating_sub(1);
            tracing::debug!("Loops left: {}", count);
        }
    }

    fn start_ticks(&self, midi: &ParsedMidi) -> u32 {
        if self.skip_to_first_note_on {
            midi.first_note_on.saturating_sub(1)
        } else {
            0
        }
    }

    fn channel_offset(&self, track: usize) -> usize {
        self.track_ports
            .get(track)
            .and_then(|port| self.port_offsets.get(port))
            .copied()
            .unwrap_or(0)
    }

    /// Track holding the earliest pending event.
    fn next_event_track(&self, midi: &ParsedMidi) -> Option<usize> {
        midi.tracks
            .iter()
            .enumerate()
            .filter_map(|(index, track)| {
                track
                    .get(self.event_index[index])
                    .map(|message| (message.ticks, index))
            })
            .min()
            .map(|(_, index)| index)
    }

    fn event_at(midi: &ParsedMidi, track: usize, index: usize) -> Option<&MidiMessage> {
        midi.tracks.get(track).and_then(|t| t.get(index))
    }

    /// Plays every event that is due at `now`.
    pub fn process_tick(&mut self, now: f64) {
        self.now = now;
        if !self.active {
            return;
        }
        let Some(midi) = self.midi.clone() else {
            return;
        };
        let current = self.current_time();

        while self.played_time < current {
            let Some(track) = self.next_event_track(&midi) else {
                self.finish_song(&midi);
                return;
            };
            let Some(event) = Self::event_at(&midi, track, self.event_index[track]) else {
                return;
            };
            let event_ticks = event.ticks;
            self.process_event(event, track, &midi);
            self.event_index[track] += 1;

            let Some(next_track) = self.next_event_track(&midi) else {
                if self.can_loop() {
                    self.consume_loop();
                    self.set_time_ticks(midi.loop_points.start);
                } else {
                    self.finish_song(&midi);
                }
                return;
            };
            let next_ticks = midi.tracks[next_track][self.event_index[next_track]].ticks;
            self.played_time += self.tick_seconds * next_ticks.saturating_sub(event_ticks) as f64;

            let can_loop = self.can_loop();
            if can_loop && midi.loop_points.end <= event_ticks {
                self.consume_loop();
                self.set_time_ticks(midi.loop_points.start);
                return;
            } else if current >= midi.duration {
                if can_loop {
                    self.consume_loop();
                    self.set_time_ticks(midi.loop_points.start);
                } else {
                    self.finish_song(&midi);
                }
                return;
            }
        }
    }

    fn finish_song(&mut self, midi: &ParsedMidi) {
        tracing::debug!("Song finished: {}", midi.name);
        self.pause(true);
        if self.songs.len() > 1 {
            self.next_song();
        }
    }

    fn process_event(&mut self, event: &MidiMessage, track: usize, midi: &ParsedMidi) {
        if self.passthrough && event.status >= 0x80 {
            self.post_raw(event.to_wire_bytes());
            return;
        }
        if event.is_meta() {
            self.process_meta(event, track, midi);
            return;
        }

        let offset = self.channel_offset(track);
        match classify_channel(event.status) {
            ChannelClass::Voice(ch) => {
                let channel = offset + ch as usize;
                let key = event.data.first().copied().unwrap_or(0);
                let velocity = event.data.get(1).copied().unwrap_or(0);
                match event.family() {
                    status::NOTE_ON if velocity > 0 => {
                        self.synth.note_on(channel, key, velocity);
                        self.playing_notes.push(PlayingNote {
                            channel,
                            key,
                            velocity,
                        });
                    }
                    status::NOTE_ON | status::NOTE_OFF => {
                        self.synth.note_off(channel, key);
                        if let Some(pos) = self
                            .playing_notes
                            .iter()
                            .position(|n| n.key == key && n.channel == channel)
                        {
                            self.playing_notes.remove(pos);
                        }
                    }
                    _ => self.synth.process_message(event, offset),
                }
            }
            ChannelClass::Sysex => self.synth.process_message(event, offset),
            ChannelClass::System | ChannelClass::Meta => {}
        }
    }

    fn process_meta(&mut self, event: &MidiMessage, track: usize, midi: &ParsedMidi) {
        match event.status {
            meta::SET_TEMPO => {
                if event.data.len() < 3 {
                    return;
                }
                let micros = u32::from_be_bytes([0, event.data[0], event.data[1], event.data[2]]);
                let mut tempo = if micros == 0 {
                    0.0
                } else {
                    60_000_000.0 / micros as f64
                };
                if tempo <= 0.0 {
                    tracing::warn!("Invalid tempo, falling back to {} BPM", DEFAULT_TEMPO);
                    tempo = DEFAULT_TEMPO as f64;
                }
                self.tick_seconds = seconds_per_tick(tempo, midi.division);
                self.post(Reply::TempoChanged(tempo));
            }
            meta::MIDI_PORT => {
                if let Some(&port) = event.data.first() {
                    self.assign_port(track, port, midi);
                }
            }
            meta::TEXT
            | meta::COPYRIGHT
            | meta::TRACK_NAME
            | meta::INSTRUMENT_NAME
            | meta::LYRIC
            | meta::MARKER
            | meta::CUE_POINT
            | meta::PROGRAM_NAME => {
                // Karaoke files carry their lyrics in text events
                if midi.is_karaoke && matches!(event.status, meta::TEXT | meta::LYRIC) {
                    let lyric_index = midi.lyric_ticks.iter().position(|&ticks| ticks == event.ticks);
                    self.post(Reply::TextEvent {
                        data: event.data.clone(),
                        kind: meta::LYRIC,
                        lyric_index,
                    });
                    return;
                }
                let lyric_index = (event.status == meta::LYRIC).then(|| {
                    let position = midi
                        .lyric_ticks
                        .iter()
                        .position(|&ticks| ticks == event.ticks)
                        .map_or(0, |index| index + 1);
                    position.min(midi.lyrics.len().saturating_sub(1))
                });
                self.post(Reply::TextEvent {
                    data: event.data.clone(),
                    kind: event.status,
                    lyric_index,
                });
            }
            _ => {}
        }
    }

    /// Gives `port` a block of 16 channels. Tracks without notes keep port 0.
    fn assign_port(&mut self, track: usize, port: u8, midi: &ParsedMidi) {
        if midi.used_channels.get(track).map_or(true, |channels| channels.is_empty()) {
            return;
        }
        if self.next_port_offset == 0 {
            self.next_port_offset = CHANNELS_PER_PORT;
            self.port_offsets.insert(port, 0);
        }
        if !self.port_offsets.contains_key(&port) {
            if self.synth.channel_count() < self.next_port_offset + CHANNELS_PER_PORT - 1 {
                self.synth.add_port();
            }
            self.port_offsets.insert(port, self.next_port_offset);
            self.next_port_offset += CHANNELS_PER_PORT;
        }
        if let Some(slot) = self.track_ports.get_mut(track) {
            *slot = port;
        }
    }

    fn reset_timers(&mut self, track_count: usize) {
        self.played_time = 0.0;
        self.event_index = vec![0; track_count];
    }

    fn route_controller(&mut self, channel: usize, cc: u8, value: u8) {
        if self.passthrough {
            self.post_raw(vec![
                status::CONTROLLER_CHANGE | (channel % CHANNELS_PER_PORT) as u8,
                cc,
                value,
            ]);
        } else {
            self.synth.controller_change(channel, cc, value);
        }
    }

    fn route_pitch_wheel(&mut self, channel: usize, value: u16) {
        let msb = (value >> 7) as u8 & 0x7F;
        let lsb = value as u8 & 0x7F;
        if self.passthrough {
            self.post_raw(vec![
                status::PITCH_BEND | (channel % CHANNELS_PER_PORT) as u8,
                lsb,
                msb,
            ]);
        } else {
            self.synth.pitch_wheel(channel, msb, lsb);
        }
    }

    fn route_program(&mut self, channel: usize, program: u8) {
        if self.passthrough {
            self.post_raw(vec![
                status::PROGRAM_CHANGE | (channel % CHANNELS_PER_PORT) as u8,
                program,
            ]);
        } else {
            self.synth.program_change(channel, program);
        }
    }

    fn send_midi_reset(&mut self) {
        if self.passthrough {
            for bytes in reset_burst() {
                self.post_raw(bytes);
            }
        }
    }

    /// Replays the song from the start up to `target` without sounding any
    /// note, then restores the last program, pitch bend and controllers of
    /// every channel.
    ///
    /// # Returns
    ///
    /// `false` if the song ended before the target was reached.
    fn play_to(&mut self, target: SeekTarget) -> bool {
        let Some(midi) = self.midi.clone() else {
            return false;
        };
        self.tick_seconds = seconds_per_tick(DEFAULT_TEMPO as f64, midi.division);
        self.synth.reset_all_controllers();
        self.send_midi_reset();
        self.reset_timers(midi.tracks.len());

        let multi_port = midi.port_of.windows(2).any(|pair| pair[0] != pair[1]);
        let mut saved = vec![SavedChannel::new(); self.synth.channel_count()];

        loop {
            let Some(track) = self.next_event_track(&midi) else {
                self.stop();
                return false;
            };
            let Some(event) = Self::event_at(&midi, track, self.event_index[track]) else {
                self.stop();
                return false;
            };
            let reached = match target {
                SeekTarget::Ticks(ticks) => event.ticks >= ticks,
                SeekTarget::Seconds(time) => self.played_time >= time,
            };
            if reached {
                break;
            }

            let empty_track = multi_port
                && midi
                    .used_channels
                    .get(track)
                    .map_or(true, |channels| channels.is_empty());
            let channel = event
                .channel()
                .map(|ch| self.channel_offset(track) + ch as usize);

            match (event.is_voice(), channel) {
                (true, Some(channel)) => {
                    if saved.len() <= channel {
                        saved.resize(channel + 1, SavedChannel::new());
                    }
                    let d0 = event.data.first().copied().unwrap_or(0);
                    let d1 = event.data.get(1).copied().unwrap_or(0);
                    match event.family() {
                        status::NOTE_ON => {
                            saved[channel].controllers[controller::PORTAMENTO_CONTROL as usize] = d0;
                        }
                        status::NOTE_OFF => {}
                        status::PITCH_BEND => {
                            saved[channel].pitch_bend = (d1 as u16) << 7 | d0 as u16;
                        }
                        status::PROGRAM_CHANGE if !empty_track => {
                            let slot = &mut saved[channel];
                            slot.program = Some(d0);
                            slot.actual_bank = slot.bank;
                        }
                        status::CONTROLLER_CHANGE if !empty_track => {
                            if replays_during_seek(d0) {
                                if d0 == controller::BANK_SELECT {
                                    saved[channel].bank = d1;
                                } else {
                                    if d0 == controller::RESET_ALL_CONTROLLERS {
                                        saved[channel].reset_controllers();
                                    }
                                    self.route_controller(channel, d0, d1);
                                }
                            } else {
                                saved[channel].controllers[d0 as usize & 0x7F] = d1;
                            }
                        }
                        status::PROGRAM_CHANGE | status::CONTROLLER_CHANGE => {}
                        _ => self.process_event(event, track, &midi),
                    }
                }
                _ => self.process_event(event, track, &midi),
            }

            let event_ticks = event.ticks;
            self.event_index[track] += 1;
            let Some(next_track) = self.next_event_track(&midi) else {
                self.stop();
                return false;
            };
            let next_ticks = midi.tracks[next_track][self.event_index[next_track]].ticks;
            self.played_time += self.tick_seconds * next_ticks.saturating_sub(event_ticks) as f64;
        }

        for (channel, state) in saved.iter().enumerate() {
            self.route_pitch_wheel(channel, state.pitch_bend);
            for cc in 0..CONTROLLER_COUNT as u8 {
                let value = state.controllers[cc as usize];
                if value != reset_value(cc) && !replays_during_seek(cc) {
                    self.route_controller(channel, cc, value);
                }
            }
            if let Some(program) = state.program {
                self.route_controller(channel, controller::BANK_SELECT, state.actual_bank);
                self.route_program(channel, program);
            }
        }
        true
    }

    /// Seeks to an absolute tick and resumes.
    pub fn set_time_ticks(&mut self, ticks: u32) {
        let Some(midi) = self.midi.clone() else {
            return;
        };
        self.stop();
        self.playing_notes.clear();
        self.paused_time = None;
        self.post(Reply::TimeChanged {
            time: midi.ticks_to_seconds(ticks),
            sent_at: self.now,
        });
        let not_finished = self.play_to(SeekTarget::Ticks(ticks));
        self.recalculate_start_time(self.played_time);
        if not_finished {
            self.resume();
        }
    }

    /// Seeks to `time` seconds.
    pub fn set_current_time(&mut self, time: f64) {
        let Some(midi) = self.midi.clone() else {
            return;
        };
        if time > midi.duration || time < 0.0 {
            self.set_time_ticks(self.start_ticks(&midi));
            return;
        }
        if self.skip_to_first_note_on && time < midi.first_note_on_seconds() {
            self.set_time_ticks(self.start_ticks(&midi));
            return;
        }

        self.stop();
        self.playing_notes.clear();
        let was_paused = self.is_paused() && self.preserve_playback_state;
        self.paused_time = None;
        self.post(Reply::TimeChanged {
            time,
            sent_at: self.now,
        });
        if midi.duration == 0.0 {
            tracing::warn!("No duration!");
            self.paused_time = Some(0.0);
            self.post(Reply::PauseAck { finished: true });
            return;
        }
        self.play_to(SeekTarget::Seconds(time));
        self.recalculate_start_time(time);
        if was_paused {
            self.pause(false);
        } else {
            self.resume();
        }
    }

    /// Changes the rate without moving the playback position.
    pub fn set_playback_rate(&mut self, rate: f64) {
        if !(rate > 0.0 && rate.is_finite()) {
            tracing::warn!("Ignoring playback rate {}", rate);
            return;
        }
        let time = self.current_time();
        self.playback_rate = rate;
        self.set_current_time(time);
    }

    /// Starts or resumes playback. A finished song restarts from the beginning.
    pub fn play(&mut self, reset_time: bool) {
        let Some(midi) = self.midi.clone() else {
            return;
        };
        if reset_time || self.current_time() >= midi.duration {
            self.paused_time = None;
            self.set_current_time(0.0);
            return;
        }
        self.resume();
    }

    fn resume(&mut self) {
        if let Some(paused) = self.paused_time.take() {
            self.recalculate_start_time(paused);
        }
        if !self.passthrough {
            for note in self.playing_notes.clone() {
                self.synth.note_on(note.channel, note.key, note.velocity);
            }
        }
        self.active = true;
    }

    pub fn pause(&mut self, finished: bool) {
        if self.is_paused() {
            tracing::warn!("Already paused");
            return;
        }
        self.paused_time = Some(self.current_time());
        self.stop();
        self.post(Reply::PauseAck { finished });
    }

    /// Silences everything without touching the position.
    pub fn stop(&mut self) {
        self.active = false;
        for channel in 0..CHANNELS_PER_PORT {
            self.synth
                .controller_change(channel, controller::SUSTAIN_PEDAL, 0);
        }
        self.synth.stop_all(false);
        if self.passthrough {
            let note_offs: Vec<Vec<u8>> = self
                .playing_notes
                .iter()
                .map(|note| {
                    vec![
                        status::NOTE_OFF | (note.channel % CHANNELS_PER_PORT) as u8,
                        note.key,
                        0,
                    ]
                })
                .collect();
            for bytes in note_offs {
                self.post_raw(bytes);
            }
            for channel in 0..CHANNELS_PER_PORT as u8 {
                self.post_raw(vec![
                    status::CONTROLLER_CHANGE | channel,
                    controller::ALL_NOTES_OFF,
                    0,
                ]);
            }
        }
    }

    pub fn load_playlist(&mut self, songs: Vec<Arc<ParsedMidi>>, auto_play: bool) {
        if songs.is_empty() {
            tracing::warn!("Empty playlist");
            self.post(Reply::LoadError("playlist is empty".into()));
            return;
        }
        self.songs = songs;
        self.song_index = 0;
        if self.songs.len() > 1 {
            self.loop_enabled = false;
        }
        tracing::info!("Loaded playlist of {} songs", self.songs.len());
        self.load_current_song(auto_play);
    }

    fn load_current_song(&mut self, auto_play: bool) {
        if let Some(midi) = self.songs.get(self.song_index).cloned() {
            self.load_sequence(midi, auto_play);
        }
    }

    fn load_sequence(&mut self, midi: Arc<ParsedMidi>, auto_play: bool) {
        self.stop();
        self.tick_seconds = seconds_per_tick(DEFAULT_TEMPO as f64, midi.division);
        self.midi = Some(Arc::clone(&midi));

        self.track_ports = midi.port_of.clone();
        self.track_ports.resize(midi.tracks.len(), 0);
        self.port_offsets.clear();
        self.next_port_offset = 0;
        for (track, &port) in midi.port_of.iter().enumerate() {
            self.assign_port(track, port, &midi);
        }
        self.reset_timers(midi.tracks.len());

        tracing::info!(
            "Song {}: {:?}, {:.1}s",
            self.song_index,
            midi.name,
            midi.duration
        );
        self.post(Reply::SongChanged {
            midi: Arc::clone(&midi),
            index: self.song_index,
            auto_play,
        });

        if midi.duration <= 1.0 {
            tracing::warn!("Very short song ({:.2}s), disabling loop", midi.duration);
            self.loop_enabled = false;
        }
        if auto_play {
            self.play(true);
        } else {
            self.set_time_ticks(self.start_ticks(&midi));
            self.pause(false);
        }
    }

    /// Advances to the next song, wrapping around. A single song restarts.
    pub fn next_song(&mut self) {
        match self.songs.len() {
            0 => {}
            1 => self.set_current_time(0.0),
            len => {
                self.song_index = (self.song_index + 1) % len;
                self.load_current_song(true);
            }
        }
    }

    /// Goes back one song, wrapping around. A single song restarts.
    pub fn previous_song(&mut self) {
        match self.songs.len() {
            0 => {}
            1 => self.set_current_time(0.0),
            len => {
                self.song_index = (self.song_index + len - 1) % len;
                self.load_current_song(true);
            }
        }
    }

    fn jump_to_song(&mut self, index: usize) {
        if self.songs.is_empty() {
            return;
        }
        self.song_index = index % self.songs.len();
        self.load_current_song(true);
    }

    /// Renders one block of audio.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.synth.render(left, right);
    }
}

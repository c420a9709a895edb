//! Baking locked synthesizer state into a MIDI file.
//!
//! When the user locks a preset or a controller during playback, the file on
//! its own would not reproduce what they hear. [`apply_snapshot_to_midi`]
//! edits the tracks so any standard player starts each locked channel with
//! the locked values: conflicting events are removed and a single
//! replacement is placed right before the channel's first note.
//!
//! [`modify_midi`] is the manual counterpart: it removes whole channels and
//! transposes others, with the fractional part of a shift written as an RPN
//! fine tuning.
//!
//! Both are one-shot export passes. The edited file is meant to be written
//! out, not played back by the engine that produced the snapshot.

use super::message::MidiMessage;
use super::sequence::ParsedMidi;
use super::{controller, status, CHANNELS_PER_PORT, PERCUSSION_CHANNEL};
use crate::synth::sysex::{gs_drum_part_payload, gs_on_payload, is_gm_on, is_gs_on};
use crate::synth::ChannelSnapshot;

/// Summary of the edits made by [`apply_snapshot_to_midi`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteReport {
    /// Channels whose locked preset was written into the file.
    pub presets: Vec<usize>,
    /// Locked (channel, controller) pairs written into the file.
    pub controllers: Vec<(usize, u8)>,
    /// Channels with a lock but no note-on to anchor it.
    pub skipped: Vec<usize>,
    /// A GS reset was added at the start of the first track.
    pub gs_inserted: bool,
    /// GM/GM2 system-on messages removed in favor of GS.
    pub gm_removed: usize,
    /// Events deleted because they contradicted a lock or sat on a cleared channel.
    pub events_removed: usize,
    /// Channels emptied by [`modify_midi`].
    pub cleared: Vec<usize>,
    /// Channels whose notes were shifted by [`modify_midi`].
    pub transposed: Vec<usize>,
}

/// Channel edits applied by [`modify_midi`]. Channels are global
/// (`port * 16 + channel`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelEdits {
    /// Channels whose voice messages are all removed.
    pub clear: Vec<usize>,
    /// Key shifts in semitones. The fractional part becomes a fine tuning.
    pub transpose: Vec<(usize, f32)>,
}

impl ChannelEdits {
    pub fn is_empty(&self) -> bool {
        self.clear.is_empty() && self.transpose.is_empty()
    }
}

/// Position of an event: (track, index within track).
type Location = (usize, usize);

/// Rewrites `midi` so that it reproduces the locks in `snapshot`.
///
/// For every channel with a locked preset:
/// 1. Banks or drums outside the default layout require GS, so a GS reset is
///    inserted when the file has none, and GM system-on messages found
///    before it are removed.
/// 2. All program changes and bank selects on that channel (and port) are
///    removed.
/// 3. A drum-part sysex (when the channel must become a drum channel), a
///    bank select (when the bank is not 0) and a program change are inserted
///    before the channel's earliest note-on. A channel without a note-on
///    stops after step 2 and is reported as skipped.
///
/// For every locked controller, all changes of that controller on the
/// channel are removed and one change to the locked value is inserted before
/// the channel's first note-on. Controller locks on a channel without notes
/// leave the file untouched.
pub fn apply_snapshot_to_midi(midi: &mut ParsedMidi, snapshot: &[ChannelSnapshot]) -> RewriteReport {
    let mut report = RewriteReport::default();
    let mut gs_confirmed = false;

    for channel in snapshot {
        let (midi_channel, port) = split_channel(channel.channel);

        if channel.lock_preset {
            apply_preset(midi, channel, midi_channel, port, &mut gs_confirmed, &mut report);
        }

        for cc in channel.locked() {
            apply_controller(midi, channel, cc, midi_channel, port, &mut report);
        }
    }

    report
}

fn apply_preset(
    midi: &mut ParsedMidi,
    snapshot: &ChannelSnapshot,
    midi_channel: u8,
    port: u8,
    gs_confirmed: &mut bool,
    report: &mut RewriteReport,
) {
    let drums = snapshot.drum_channel && midi_channel != PERCUSSION_CHANNEL;
    let bank = if snapshot.drum_channel { 0 } else { snapshot.bank };

    if (drums || bank > 0) && !*gs_confirmed {
        ensure_gs_on(midi, report);
        *gs_confirmed = true;
    }

    report.events_removed += remove_matching(midi, port, |m| {
        m.is_program_change(midi_channel)
            || m.is_controller(midi_channel, controller::BANK_SELECT)
            || m.is_controller(midi_channel, controller::BANK_SELECT_LSB)
    });

    // Deletions shift indices, so the anchor is located afterwards
    let Some((track, index)) = earliest_note_on(midi, midi_channel, port) else {
        tracing::warn!(
            "Channel {} has a locked preset but no notes, not inserting it",
            snapshot.channel
        );
        report.skipped.push(snapshot.channel);
        return;
    };
    let ticks = midi.tracks[track][index].ticks;

    let mut inserted = Vec::with_capacity(3);
    if drums {
        inserted.push(MidiMessage::sysex(ticks, gs_drum_part_payload(midi_channel)));
    }
    if bank > 0 {
        inserted.push(MidiMessage::controller_change(
            ticks,
            midi_channel,
            controller::BANK_SELECT,
            (bank & 0x7F) as u8,
        ));
    }
    inserted.push(MidiMessage::program_change(ticks, midi_channel, snapshot.program));
    midi.tracks[track].splice(index..index, inserted);

    tracing::info!(
        "Setting channel {} to {}:{}{}",
        snapshot.channel,
        bank,
        snapshot.program,
        if drums { " (drums)" } else { "" }
    );
    report.presets.push(snapshot.channel);
}

fn apply_controller(
    midi: &mut ParsedMidi,
    snapshot: &ChannelSnapshot,
    cc: u8,
    midi_channel: u8,
    port: u8,
    report: &mut RewriteReport,
) {
    if first_note_on_in_file_order(midi, midi_channel, port).is_none() {
        tracing::warn!(
            "Controller {} is locked on channel {} but the channel has no notes",
            cc,
            snapshot.channel
        );
        if !report.skipped.contains(&snapshot.channel) {
            report.skipped.push(snapshot.channel);
        }
        return;
    }

    report.events_removed += remove_matching(midi, port, |m| m.is_controller(midi_channel, cc));

    let Some((track, index)) = first_note_on_in_file_order(midi, midi_channel, port) else {
        return;
    };
    let ticks = midi.tracks[track][index].ticks;
    let value = snapshot.controller_value(cc);
    midi.tracks[track].insert(
        index,
        MidiMessage::controller_change(ticks, midi_channel, cc, value),
    );
    tracing::debug!("Locked controller {} on channel {} to {}", cc, snapshot.channel, value);
    report.controllers.push((snapshot.channel, cc));
}

/// Clears and transposes channels of `midi`.
///
/// Cleared channels lose every voice message. Transposed channels have the
/// whole-semitone part of the shift added to the key of each note-on and
/// note-off, clamped to the key range. A fractional part is written as RPN
/// 0x0001 (fine tuning) before the channel's earliest note-on, with data entry
/// `64 + fine * 64` (64 is center, 96 is 50 cents up). Transposing a cleared
/// channel is a no-op.
pub fn modify_midi(midi: &mut ParsedMidi, edits: &ChannelEdits) -> RewriteReport {
    let mut report = RewriteReport::default();

    for &channel in &edits.clear {
        let (midi_channel, port) = split_channel(channel);
        let removed = remove_matching(midi, port, |m| m.channel() == Some(midi_channel));
        tracing::info!("Cleared channel {} ({} events)", channel, removed);
        report.events_removed += removed;
        report.cleared.push(channel);
    }

    for &(channel, semitones) in &edits.transpose {
        if edits.clear.contains(&channel) {
            continue;
        }
        let (midi_channel, port) = split_channel(channel);
        let Some((track, index)) = earliest_note_on(midi, midi_channel, port) else {
            tracing::warn!("Channel {} has no notes, not transposing it", channel);
            report.skipped.push(channel);
            continue;
        };

        let coarse = semitones.trunc();
        let fine = semitones - coarse;
        shift_keys(midi, midi_channel, port, coarse as i32);

        if fine != 0.0 {
            let ticks = midi.tracks[track][index].ticks;
            let cents = (fine * 64.0 + 64.0).clamp(0.0, 127.0) as u8;
            let rpn = [
                (controller::RPN_MSB, 0),
                (controller::RPN_LSB, 1),
                (controller::DATA_ENTRY_MSB, cents),
                (controller::DATA_ENTRY_LSB, 0),
            ]
            .map(|(cc, value)| MidiMessage::controller_change(ticks, midi_channel, cc, value));
            midi.tracks[track].splice(index..index, rpn);
        }

        tracing::info!("Transposed channel {} by {} semitones", channel, semitones);
        report.transposed.push(channel);
    }

    report
}

fn shift_keys(midi: &mut ParsedMidi, channel: u8, port: u8, semitones: i32) {
    if semitones == 0 {
        return;
    }
    for (track, messages) in midi.tracks.iter_mut().enumerate() {
        if midi.port_of.get(track).copied().unwrap_or(0) != port {
            continue;
        }
        for message in messages.iter_mut().filter(|m| m.channel() == Some(channel)) {
            if !matches!(message.family(), status::NOTE_ON | status::NOTE_OFF) {
                continue;
            }
            if let Some(key) = message.data.first_mut() {
                *key = (i32::from(*key) + semitones).clamp(0, 127) as u8;
            }
        }
    }
}

/// Splits a global channel into (channel, port).
fn split_channel(channel: usize) -> (u8, u8) {
    ((channel % CHANNELS_PER_PORT) as u8, (channel / CHANNELS_PER_PORT) as u8)
}

/// Makes sure the file turns GS on.
///
/// Tracks are scanned in order until a GS reset is found; GM system-on
/// messages met before it are deleted. Without a GS reset, one is inserted
/// at tick 0 of the first track.
fn ensure_gs_on(midi: &mut ParsedMidi, report: &mut RewriteReport) {
    for track in &mut midi.tracks {
        let mut index = 0;
        while index < track.len() {
            let message = &track[index];
            if message.is_sysex() {
                if is_gs_on(&message.data) {
                    tracing::info!("GS on detected");
                    return;
                }
                if is_gm_on(&message.data) {
                    tracing::info!("GM system on detected, removing it");
                    track.remove(index);
                    report.gm_removed += 1;
                    continue;
                }
            }
            index += 1;
        }
    }

    if let Some(first) = midi.tracks.first_mut() {
        tracing::info!("GS on not detected, adding it");
        first.insert(0, MidiMessage::sysex(0, gs_on_payload()));
        report.gs_inserted = true;
    }
}

fn port_of(midi: &ParsedMidi, track: usize) -> u8 {
    midi.port_of.get(track).copied().unwrap_or(0)
}

fn is_note_on_for(message: &MidiMessage, channel: u8) -> bool {
    message.status == status::NOTE_ON | channel
}

/// Earliest note-on on the channel over all tracks of the port, ties broken
/// by (track, index).
fn earliest_note_on(midi: &ParsedMidi, channel: u8, port: u8) -> Option<Location> {
    midi.tracks
        .iter()
        .enumerate()
        .filter(|(track, _)| port_of(midi, *track) == port)
        .filter_map(|(track, messages)| {
            messages
                .iter()
                .position(|m| is_note_on_for(m, channel))
                .map(|index| (messages[index].ticks, track, index))
        })
        .min()
        .map(|(_, track, index)| (track, index))
}

/// First note-on on the channel in the lowest-indexed track of the port that has one.
fn first_note_on_in_file_order(midi: &ParsedMidi, channel: u8, port: u8) -> Option<Location> {
    midi.tracks
        .iter()
        .enumerate()
        .filter(|(track, _)| port_of(midi, *track) == port)
        .find_map(|(track, messages)| {
            messages
                .iter()
                .position(|m| is_note_on_for(m, channel))
                .map(|index| (track, index))
        })
}

/// Removes matching events from every track of the port. Returns how many were removed.
fn remove_matching(midi: &mut ParsedMidi, port: u8, matches: impl Fn(&MidiMessage) -> bool) -> usize {
    let mut removed = 0;
    for (track, messages) in midi.tracks.iter_mut().enumerate() {
        if midi.port_of.get(track).copied().unwrap_or(0) != port {
            continue;
        }
        let before = messages.len();
        messages.retain(|m| !matches(m));
        removed += before - messages.len();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::sequence::tests::sequence_with;
    use crate::midi::{meta, parse_midi, write_midi};
    use crate::synth::{RecordingBackend, SynthProcessor};

    fn count(midi: &ParsedMidi, f: impl Fn(&MidiMessage) -> bool) -> usize {
        midi.tracks.iter().flatten().filter(|m| f(m)).count()
    }

    fn two_track_song() -> ParsedMidi {
        let conductor = vec![
            MidiMessage::meta(0, meta::TRACK_NAME, b"Song".to_vec()),
            MidiMessage::meta(0, meta::END_OF_TRACK, vec![]),
        ];
        let piano = vec![
            MidiMessage::controller_change(0, 0, controller::BANK_SELECT, 1),
            MidiMessage::program_change(0, 0, 4),
            MidiMessage::controller_change(0, 0, controller::MAIN_VOLUME, 90),
            MidiMessage::note_on(120, 0, 60, 100),
            MidiMessage::note_off(240, 0, 60),
            MidiMessage::program_change(240, 0, 7),
            MidiMessage::controller_change(300, 0, controller::MAIN_VOLUME, 40),
            MidiMessage::note_on(480, 0, 62, 100),
            MidiMessage::note_off(600, 0, 62),
            MidiMessage::meta(600, meta::END_OF_TRACK, vec![]),
        ];
        sequence_with(480, &[], vec![conductor, piano])
    }

    #[test]
    fn test_unlocked_snapshot_changes_nothing() {
        let mut midi = two_track_song();
        let original = midi.clone();
        let snapshot: Vec<ChannelSnapshot> = (0..16).map(ChannelSnapshot::unlocked).collect();

        let report = apply_snapshot_to_midi(&mut midi, &snapshot);

        assert_eq!(midi.tracks, original.tracks);
        assert_eq!(report, RewriteReport::default());
    }

    #[test]
    fn test_locked_bank_inserts_gs_on() {
        let mut midi = two_track_song();
        let mut channel = ChannelSnapshot::unlocked(0);
        channel.lock_preset(5, 10, false);

        let report = apply_snapshot_to_midi(&mut midi, &[channel]);

        assert!(report.gs_inserted);
        assert_eq!(report.presets, vec![0]);
        assert_eq!(count(&midi, |m| m.is_sysex() && is_gs_on(&m.data)), 1);
        assert_eq!(midi.tracks[0][0], MidiMessage::sysex(0, gs_on_payload()));

        let banks: Vec<_> = midi.tracks[1]
            .iter()
            .filter(|m| m.is_controller(0, controller::BANK_SELECT))
            .collect();
        assert_eq!(banks.len(), 1);
        assert_eq!(banks[0].data, vec![controller::BANK_SELECT, 5]);
        assert_eq!(banks[0].ticks, 120);

        let programs: Vec<_> = midi.tracks[1].iter().filter(|m| m.is_program_change(0)).collect();
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].data, vec![10]);
        assert_eq!(programs[0].ticks, 120);

        // bank, program, then the note itself
        let note = midi.tracks[1].iter().position(|m| m.is_note_on()).unwrap();
        assert!(midi.tracks[1][note - 2].is_controller(0, controller::BANK_SELECT));
        assert!(midi.tracks[1][note - 1].is_program_change(0));
    }

    #[test]
    fn test_existing_gs_on_is_kept_and_gm_on_removed() {
        let mut midi = two_track_song();
        midi.tracks[0].insert(0, MidiMessage::sysex(0, vec![0x7E, 0x7F, 0x09, 0x01, 0xF7]));
        midi.tracks[0].insert(1, MidiMessage::sysex(0, gs_on_payload()));
        let mut channel = ChannelSnapshot::unlocked(0);
        channel.lock_preset(3, 0, false);

        let report = apply_snapshot_to_midi(&mut midi, &[channel]);

        assert!(!report.gs_inserted);
        assert_eq!(report.gm_removed, 1);
        assert_eq!(count(&midi, |m| m.is_sysex() && is_gm_on(&m.data)), 0);
        assert_eq!(count(&midi, |m| m.is_sysex() && is_gs_on(&m.data)), 1);
    }

    #[test]
    fn test_bank_zero_needs_no_gs() {
        let mut midi = two_track_song();
        let mut channel = ChannelSnapshot::unlocked(0);
        channel.lock_preset(0, 33, false);

        let report = apply_snapshot_to_midi(&mut midi, &[channel]);

        assert!(!report.gs_inserted);
        assert_eq!(count(&midi, |m| m.is_controller(0, controller::BANK_SELECT)), 0);
        assert_eq!(count(&midi, |m| m.is_program_change(0)), 1);
    }

    #[test]
    fn test_drum_lock_round_trips_through_processor() {
        let piano = vec![
            MidiMessage::program_change(0, 3, 1),
            MidiMessage::note_on(10, 3, 36, 100),
            MidiMessage::note_off(20, 3, 36),
        ];
        let mut midi = sequence_with(96, &[], vec![piano]);
        let mut channel = ChannelSnapshot::unlocked(3);
        channel.lock_preset(0, 0, true);

        apply_snapshot_to_midi(&mut midi, &[channel]);

        let mut synth = SynthProcessor::new(Box::new(RecordingBackend::new()));
        for message in &midi.tracks[0] {
            synth.process_message(message, 0);
        }
        assert!(synth.channel(3).unwrap().is_drums());
        assert!(!synth.channel(2).unwrap().is_drums());
    }

    #[test]
    fn test_locked_controller_replaced() {
        let mut midi = two_track_song();
        let mut channel = ChannelSnapshot::unlocked(0);
        channel.lock_controller(controller::MAIN_VOLUME, 70);

        let report = apply_snapshot_to_midi(&mut midi, &[channel]);

        assert_eq!(report.controllers, vec![(0, controller::MAIN_VOLUME)]);
        assert_eq!(report.events_removed, 2);
        let volumes: Vec<_> = midi.tracks[1]
            .iter()
            .filter(|m| m.is_controller(0, controller::MAIN_VOLUME))
            .collect();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].data, vec![controller::MAIN_VOLUME, 70]);
        assert_eq!(volumes[0].ticks, 120);
        // The preset events are untouched
        assert_eq!(count(&midi, |m| m.is_program_change(0)), 2);
    }

    #[test]
    fn test_lock_without_notes_is_skipped() {
        let mut midi = two_track_song();
        let original = midi.clone();
        let mut channel = ChannelSnapshot::unlocked(5);
        channel.lock_preset(0, 2, false);
        channel.lock_controller(controller::PAN, 0);

        let report = apply_snapshot_to_midi(&mut midi, &[channel]);

        assert_eq!(report.skipped, vec![5]);
        assert!(report.presets.is_empty());
        assert_eq!(midi.tracks, original.tracks);
    }

    #[test]
    fn test_preset_lock_without_notes_still_cleans_up() {
        let mut midi = two_track_song();
        midi.tracks[1].insert(0, MidiMessage::program_change(0, 5, 30));
        midi.tracks[1].insert(0, MidiMessage::controller_change(0, 5, controller::BANK_SELECT, 8));
        let mut channel = ChannelSnapshot::unlocked(5);
        channel.lock_preset(2, 2, true);

        let report = apply_snapshot_to_midi(&mut midi, &[channel]);

        assert_eq!(report.skipped, vec![5]);
        // GS promotion and deletions run before the missing note-on is noticed
        assert!(report.gs_inserted);
        assert_eq!(report.events_removed, 2);
        assert_eq!(count(&midi, |m| m.is_program_change(5)), 0);
        assert_eq!(count(&midi, |m| m.is_controller(5, controller::BANK_SELECT)), 0);
        assert_eq!(count(&midi, |m| m.is_program_change(0)), 2);
    }

    #[test]
    fn test_other_port_untouched() {
        let mut midi = two_track_song();
        let second_port = vec![
            MidiMessage::program_change(0, 0, 50),
            MidiMessage::note_on(0, 0, 60, 100),
        ];
        midi.tracks.push(second_port);
        midi.port_of.push(1);
        let mut channel = ChannelSnapshot::unlocked(0);
        channel.lock_preset(0, 9, false);

        apply_snapshot_to_midi(&mut midi, &[channel]);

        assert_eq!(midi.tracks[2][0], MidiMessage::program_change(0, 0, 50));
        assert_eq!(count(&midi, |m| m.is_program_change(0)), 2);
    }

    #[test]
    fn test_earliest_note_on_tie_breaks_on_track() {
        let a = vec![MidiMessage::note_on(100, 1, 60, 100)];
        let b = vec![MidiMessage::note_on(100, 1, 64, 100)];
        let mut midi = sequence_with(96, &[], vec![a, b]);
        let mut channel = ChannelSnapshot::unlocked(1);
        channel.lock_preset(0, 5, false);

        apply_snapshot_to_midi(&mut midi, &[channel]);

        assert!(midi.tracks[0][0].is_program_change(1));
        assert_eq!(midi.tracks[1].len(), 1);
    }

    #[test]
    fn test_clear_channel_removes_voice_events_only() {
        let mut midi = two_track_song();
        midi.tracks[1].insert(3, MidiMessage::note_on(120, 1, 40, 90));

        let edits = ChannelEdits {
            clear: vec![0],
            ..Default::default()
        };
        let report = modify_midi(&mut midi, &edits);

        assert_eq!(report.cleared, vec![0]);
        assert_eq!(report.events_removed, 9);
        assert_eq!(count(&midi, |m| m.channel() == Some(0)), 0);
        assert_eq!(count(&midi, |m| m.channel() == Some(1)), 1);
        assert_eq!(count(&midi, |m| m.is_meta()), 3);
    }

    #[test]
    fn test_transpose_shifts_notes_and_clamps() {
        let notes = vec![
            MidiMessage::note_on(0, 2, 60, 100),
            MidiMessage::note_off(10, 2, 60),
            MidiMessage::note_on(20, 2, 125, 100),
            MidiMessage::note_off(30, 2, 125),
            MidiMessage::note_on(40, 3, 60, 100),
        ];
        let mut midi = sequence_with(96, &[], vec![notes]);

        let edits = ChannelEdits {
            transpose: vec![(2, 5.0)],
            ..Default::default()
        };
        let report = modify_midi(&mut midi, &edits);

        assert_eq!(report.transposed, vec![2]);
        let keys: Vec<u8> = midi.tracks[0].iter().map(|m| m.data[0]).collect();
        assert_eq!(keys, vec![65, 65, 127, 127, 60]);
        // Whole semitones need no tuning
        assert_eq!(midi.tracks[0].len(), 5);
    }

    #[test]
    fn test_fractional_transpose_adds_fine_tuning_rpn() {
        let mut midi = two_track_song();

        let edits = ChannelEdits {
            transpose: vec![(0, -1.5)],
            ..Default::default()
        };
        modify_midi(&mut midi, &edits);

        let note = midi.tracks[1].iter().position(|m| m.is_note_on()).unwrap();
        assert_eq!(midi.tracks[1][note].data[0], 59);
        let rpn: Vec<_> = midi.tracks[1][note - 4..note]
            .iter()
            .map(|m| (m.ticks, m.data.clone()))
            .collect();
        assert_eq!(
            rpn,
            vec![
                (120, vec![controller::RPN_MSB, 0]),
                (120, vec![controller::RPN_LSB, 1]),
                (120, vec![controller::DATA_ENTRY_MSB, 32]),
                (120, vec![controller::DATA_ENTRY_LSB, 0]),
            ]
        );

        // The inserted RPN lands on the fine tuning register of a live channel
        let mut synth = SynthProcessor::new(Box::new(RecordingBackend::new()));
        for message in &midi.tracks[1][..note] {
            synth.process_message(message, 0);
        }
        assert!((synth.channel(0).unwrap().tuning_cents() + 50.0).abs() < 0.01);
    }

    #[test]
    fn test_transpose_without_notes_is_skipped() {
        let mut midi = two_track_song();
        let original = midi.clone();

        let edits = ChannelEdits {
            clear: vec![3],
            transpose: vec![(3, 2.0), (7, 0.25)],
        };
        let report = modify_midi(&mut midi, &edits);

        assert_eq!(report.skipped, vec![7]);
        assert_eq!(report.cleared, vec![3]);
        assert!(report.transposed.is_empty());
        assert_eq!(midi.tracks, original.tracks);
    }

    #[test]
    fn test_rewritten_file_survives_export() {
        let mut midi = two_track_song();
        let mut channel = ChannelSnapshot::unlocked(0);
        channel.lock_preset(8, 10, false);
        apply_snapshot_to_midi(&mut midi, &[channel]);

        let reparsed = parse_midi(&write_midi(&midi)).unwrap();
        assert_eq!(reparsed.tracks, midi.tracks);
    }
}

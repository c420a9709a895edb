//! Typed mailbox between the control domain and the playback engine.
//!
//! Commands flow from the [`ControlEndpoint`] to the [`EngineEndpoint`] in
//! send order. Replies flow back with no ordering guarantee relative to
//! commands. Nothing else crosses the boundary.

use crate::midi::ParsedMidi;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::sync::Arc;

/// Direction of a song change within the playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SongChange {
    Forward,
    Backward,
    /// Jump straight to a playlist index.
    Index(usize),
}

/// Control to engine.
#[derive(Debug, Clone)]
pub enum Command {
    LoadPlaylist {
        songs: Vec<Arc<ParsedMidi>>,
        auto_play: bool,
    },
    ChangeSong(SongChange),
    /// Seek, in seconds.
    SetTime(f64),
    SetPlaybackRate(f64),
    /// `count: None` loops forever.
    SetLoop {
        enabled: bool,
        count: Option<u32>,
    },
    SetMidiPassthrough(bool),
    Pause,
    Play {
        reset_time: bool,
    },
    Stop,
    SetSkipToFirstNoteOn(bool),
    SetPreservePlaybackState(bool),
}

/// Engine to control.
#[derive(Debug, Clone)]
pub enum Reply {
    SongChanged {
        midi: Arc<ParsedMidi>,
        index: usize,
        auto_play: bool,
    },
    /// `sent_at` is the audio clock reading when the engine finished the seek.
    TimeChanged {
        time: f64,
        sent_at: f64,
    },
    /// Text-family meta event. `kind` is the meta type; `lyric_index` is set
    /// for lyrics only.
    TextEvent {
        data: Vec<u8>,
        kind: u8,
        lyric_index: Option<usize>,
    },
    PauseAck {
        finished: bool,
    },
    RawMidiEvent(Vec<u8>),
    /// New tempo in beats per minute.
    TempoChanged(f64),
    LoadError(String),
}

impl Reply {
    /// Tag used in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Reply::SongChanged { .. } => "songChanged",
            Reply::TimeChanged { .. } => "timeChanged",
            Reply::TextEvent { .. } => "textEvent",
            Reply::PauseAck { .. } => "pauseAck",
            Reply::RawMidiEvent(_) => "rawMidiEvent",
            Reply::TempoChanged(_) => "tempoChanged",
            Reply::LoadError(_) => "loadError",
        }
    }
}

/// The control side of the mailbox.
pub struct ControlEndpoint {
    commands: Sender<Command>,
    replies: Receiver<Reply>,
}

impl ControlEndpoint {
    /// Fire-and-forget. A gone engine is logged, not fatal.
    pub fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Engine is gone, command dropped");
        }
    }

    pub fn try_recv(&self) -> Option<Reply> {
        match self.replies.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Every reply that has arrived so far.
    pub fn drain(&self) -> Vec<Reply> {
        self.replies.try_iter().collect()
    }
}

/// The engine side of the mailbox.
pub struct EngineEndpoint {
    commands: Receiver<Command>,
    replies: Sender<Reply>,
}

impl EngineEndpoint {
    pub fn try_recv(&self) -> Option<Command> {
        self.commands.try_recv().ok()
    }

    /// Posts a reply. Never blocks.
    pub fn post(&self, reply: Reply) {
        if self.replies.send(reply).is_err() {
            tracing::debug!("Control side is gone, reply dropped");
        }
    }
}

/// Creates a connected pair of endpoints.
pub fn connect() -> (ControlEndpoint, EngineEndpoint) {
    let (command_tx, command_rx) = unbounded();
    let (reply_tx, reply_rx) = unbounded();
    (
        ControlEndpoint {
            commands: command_tx,
            replies: reply_rx,
        },
        EngineEndpoint {
            commands: command_rx,
            replies: reply_tx,
        },
    )
}

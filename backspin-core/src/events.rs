use crossbeam::channel::{Receiver, Sender};

use crate::{
    coordinator::SessionState,
    errors::SessionError,
    model::{ChatMessageData, CurrentTrack, ListenerData, SessionData},
};

pub type EventSender = Sender<SessionEvent>;
pub type EventReceiver = Receiver<SessionEvent>;

/// Events emitted by the coordinator for the surrounding UI to observe.
/// The UI is a passive observer; it never mutates coordinator state
/// directly.
#[derive(Debug)]
pub enum SessionEvent {
    /// The state machine moved to a new state.
    StateChanged { new_state: SessionState },
    /// The session document changed (status, track, moderation config).
    SessionUpdated { session: SessionData },
    /// The broadcast track changed and the local player was re-synced.
    TrackChanged { track: CurrentTrack },
    /// The staleness-filtered live roster changed.
    RosterUpdated { roster: Vec<ListenerData> },
    /// A chat message arrived that passed the viewer's block list.
    ChatReceived { message: ChatMessageData },
    /// A background task (heartbeat, subscription handling) hit an error.
    /// Surfaced the same way as foreground intent errors, never swallowed.
    BackgroundError { error: SessionError },
}

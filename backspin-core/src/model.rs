use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The type used for store-assigned document ids.
pub type SessionId = String;
pub type UserId = String;
pub type TrackId = String;

/// One live DJ broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub id: SessionId,
    /// The single user allowed to mutate playback and moderation state
    pub dj_id: UserId,
    pub dj_username: String,
    pub dj_profile_picture_url: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub tags: HashSet<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub current_track: Option<CurrentTrack>,
    pub chat_enabled: bool,
    /// No cap when absent
    pub max_listeners: Option<usize>,
    pub muted_user_ids: HashSet<UserId>,
    pub banned_user_ids: HashSet<UserId>,
    /// Best-effort mirror of the roster size. Advisory only, never used
    /// for capacity enforcement.
    pub listener_count: usize,
}

/// Lifecycle of a session. Transitions only live↔paused→ended, and
/// `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Live,
    Paused,
    Ended,
}

/// The track a session is currently broadcasting. Immutable once
/// published; superseded, never mutated, by the next track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentTrack {
    pub track_id: TrackId,
    pub title: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub artwork_url: Option<String>,
    /// The wall-clock time the DJ began playing it. Listeners reconstruct
    /// their playback offset from this single timestamp.
    pub started_at: DateTime<Utc>,
}

impl CurrentTrack {
    /// Two publishes describe the same playback if both the track and the
    /// moment it started match. Used to make sync application idempotent.
    pub fn same_playback(&self, other: &CurrentTrack) -> bool {
        self.track_id == other.track_id && self.started_at == other.started_at
    }
}

/// Presence record, one per (session, user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerData {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub user_profile_picture_url: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_seen_at: DateTime<Utc>,
}

/// A chat message. Append-only, owned by its author, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageData {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub user_profile_picture_url: Option<String>,
    pub message: String,
    /// Store-assigned; messages are ordered by this ascending, ties broken
    /// by insertion order of the store.
    pub timestamp: DateTime<Utc>,
    pub is_from_dj: bool,
}

/// The locally authenticated user driving this coordinator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub title: String,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub tags: HashSet<String>,
    pub chat_enabled: bool,
    pub max_listeners: Option<usize>,
    /// The DJ of the new session
    pub dj: UserProfile,
}

impl NewSession {
    pub fn titled(title: &str, dj: &UserProfile) -> Self {
        Self {
            title: title.to_string(),
            description: None,
            genre: None,
            tags: Default::default(),
            chat_enabled: true,
            max_listeners: None,
            dj: dj.clone(),
        }
    }
}

/// A partial update to the DJ-writable fields of a session. Fields left
/// as `None` are untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdatedSession {
    pub id: SessionId,
    pub status: Option<SessionStatus>,
    pub current_track: Option<Option<CurrentTrack>>,
    pub chat_enabled: Option<bool>,
    pub max_listeners: Option<Option<usize>>,
    pub listener_count: Option<usize>,
}

impl UpdatedSession {
    pub fn of(id: &SessionId) -> Self {
        Self {
            id: id.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub user_profile_picture_url: Option<String>,
    pub message: String,
    pub is_from_dj: bool,
}

use thiserror::Error;

use crate::{catalog::CatalogError, store::StoreError, transport::TransportError};

/// Every way an intent against the coordinator can be rejected. All of
/// these are recoverable: the state machine stays in its prior state and
/// the caller may retry the same intent.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not signed in")]
    NotAuthenticated,
    #[error("Only the DJ of this session can do that")]
    NotAuthorized,
    #[error("Session does not exist or has ended")]
    SessionNotFound,
    #[error("You are banned from this session")]
    Banned,
    #[error("Session is full")]
    SessionFull,
    #[error("Chat is disabled in this session")]
    ChatDisabled,
    #[error("You are muted in this session")]
    Muted,
    #[error("You are sending messages too quickly")]
    RateLimited,
    #[error("Message blocked: {0}")]
    ModerationBlocked(String),
    #[error("Could not find a playable track for {0}")]
    TrackResolutionFailed(String),
    #[error("Broadcast transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Playback failed: {0}")]
    Playback(#[from] CatalogError),
    #[error("Session store failed: {0}")]
    Store(#[from] StoreError),
    /// A coordinator intent was called from a state it does not apply to
    #[error("That action is not available right now")]
    InvalidState,
}

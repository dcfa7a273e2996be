use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::{
    ChatMessageData, ListenerData, NewChatMessage, NewSession, SessionData, SessionId,
    UpdatedSession, UserId,
};

pub type Result<T> = std::result::Result<T, StoreError>;
pub type BoxedSessionStore = std::sync::Arc<dyn SessionStore>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// An unknown or internal error happened with the store
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A document in the store doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    /// The store could not be reached within the configured bound
    #[error("store operation timed out")]
    Timeout,
}

impl StoreError {
    pub fn not_found(resource: &'static str, identifier: &str) -> Self {
        Self::NotFound {
            resource,
            identifier: identifier.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Which of a session's moderation sets a membership update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSetField {
    Muted,
    Banned,
}

/// Set membership operations are increment-safe at the store layer so
/// concurrent moderation edits never clobber each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Add,
    Remove,
}

/// Represents the external real-time document database the coordinator
/// reads, writes, and subscribes to. Multiple clients converge only
/// through this store; delivery of change notifications is at-least-once
/// and possibly reordered, so consumers must apply them idempotently.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, new_session: NewSession) -> Result<SessionData>;
    async fn session_by_id(&self, session_id: &SessionId) -> Result<SessionData>;
    async fn update_session(&self, updated: UpdatedSession) -> Result<SessionData>;
    async fn modify_user_set(
        &self,
        session_id: &SessionId,
        field: UserSetField,
        op: SetOp,
        user_id: &UserId,
    ) -> Result<()>;

    /// Upserts a listener record keyed by (session, user). Heartbeats reuse
    /// this with a fresh `last_seen_at`.
    async fn put_listener(&self, listener: ListenerData) -> Result<()>;
    /// One-shot roster query, used for capacity checks at join time.
    async fn listeners_for_session(&self, session_id: &SessionId) -> Result<Vec<ListenerData>>;

    /// Appends a chat message. The store assigns the timestamp and the
    /// insertion order that breaks timestamp ties.
    async fn append_chat_message(&self, new_message: NewChatMessage) -> Result<ChatMessageData>;
    async fn chat_history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ChatMessageData>>;

    async fn subscribe_session(&self, session_id: &SessionId) -> Result<Subscription<SessionData>>;
    async fn subscribe_chat(
        &self,
        session_id: &SessionId,
    ) -> Result<Subscription<ChatMessageData>>;
    /// Collection subscription delivering a fresh roster snapshot on every
    /// change to any listener record of the session.
    async fn subscribe_listeners(
        &self,
        session_id: &SessionId,
    ) -> Result<Subscription<Vec<ListenerData>>>;
}

/// A cancellable stream of change notifications from the store.
///
/// Replaces ad-hoc callbacks: the lifecycle is explicit, and cancelling
/// (or dropping) the subscription guarantees no further deliveries, so a
/// departed client cannot be resurrected by a late-arriving update.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

/// The publishing half handed to a store implementation.
pub struct SubscriptionSink<T> {
    sender: mpsc::UnboundedSender<T>,
}

impl<T> Subscription<T> {
    pub fn channel() -> (SubscriptionSink<T>, Subscription<T>) {
        let (sender, receiver) = mpsc::unbounded_channel();

        (SubscriptionSink { sender }, Subscription { receiver })
    }

    /// Waits for the next change. Returns `None` once the subscription is
    /// cancelled or the publishing side goes away.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Stops delivery. Changes already in flight are discarded.
    pub fn cancel(&mut self) {
        self.receiver.close();

        while self.receiver.try_recv().is_ok() {}
    }
}

impl<T> SubscriptionSink<T> {
    /// Delivers a change to the subscriber. Returns false if the
    /// subscription was cancelled, so publishers can prune it.
    pub fn publish(&self, item: T) -> bool {
        self.sender.send(item).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<T> Clone for SubscriptionSink<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

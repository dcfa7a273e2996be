use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use backspin_core::{
    ChatMessageData, ListenerData, NewChatMessage, NewSession, SessionData, SessionId,
    SessionStatus, SessionStore, SetOp, StoreError, Subscription, SubscriptionSink, UpdatedSession,
    UserId, UserSetField,
};

use crate::util::random_string;

type Result<T> = std::result::Result<T, StoreError>;

/// Per-session fan-out of change notifications to live subscriptions.
#[derive(Default)]
struct Watchers {
    session: Mutex<Vec<SubscriptionSink<SessionData>>>,
    chat: Mutex<Vec<SubscriptionSink<ChatMessageData>>>,
    listeners: Mutex<Vec<SubscriptionSink<Vec<ListenerData>>>>,
}

/// An in-process session store with real-time subscriptions.
///
/// Backs tests and explicitly offline/demo modes. Documents live in
/// dashmaps, change notifications fan out synchronously to every
/// subscription of the affected session, and cancelled subscriptions are
/// pruned on the next publish.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, SessionData>,
    /// Listener records per session, upserted by (session, user)
    listeners: DashMap<SessionId, Vec<ListenerData>>,
    /// Chat log per session; vector order is the insertion order that
    /// breaks timestamp ties
    chat: DashMap<SessionId, Vec<ChatMessageData>>,
    watchers: DashMap<SessionId, Watchers>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Default::default()
    }

    fn publish_session(&self, session: &SessionData) {
        if let Some(watchers) = self.watchers.get(&session.id) {
            watchers
                .session
                .lock()
                .retain(|sink| sink.publish(session.clone()));
        }
    }

    fn publish_chat(&self, message: &ChatMessageData) {
        if let Some(watchers) = self.watchers.get(&message.session_id) {
            watchers
                .chat
                .lock()
                .retain(|sink| sink.publish(message.clone()));
        }
    }

    fn publish_roster(&self, session_id: &SessionId) {
        let snapshot = self
            .listeners
            .get(session_id)
            .map(|l| l.value().clone())
            .unwrap_or_default();

        if let Some(watchers) = self.watchers.get(session_id) {
            watchers
                .listeners
                .lock()
                .retain(|sink| sink.publish(snapshot.clone()));
        }
    }

    fn session(&self, session_id: &SessionId) -> Result<SessionData> {
        self.sessions
            .get(session_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StoreError::not_found("session", session_id))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        let now = Utc::now();

        let session = SessionData {
            id: random_string(16),
            dj_id: new_session.dj.id,
            dj_username: new_session.dj.username,
            dj_profile_picture_url: new_session.dj.profile_picture_url,
            title: new_session.title,
            description: new_session.description,
            genre: new_session.genre,
            tags: new_session.tags,
            status: SessionStatus::Live,
            created_at: now,
            started_at: Some(now),
            current_track: None,
            chat_enabled: new_session.chat_enabled,
            max_listeners: new_session.max_listeners,
            muted_user_ids: Default::default(),
            banned_user_ids: Default::default(),
            listener_count: 0,
        };

        self.sessions.insert(session.id.clone(), session.clone());

        Ok(session)
    }

    async fn session_by_id(&self, session_id: &SessionId) -> Result<SessionData> {
        self.session(session_id)
    }

    async fn update_session(&self, updated: UpdatedSession) -> Result<SessionData> {
        let session = {
            let mut entry = self
                .sessions
                .get_mut(&updated.id)
                .ok_or_else(|| StoreError::not_found("session", &updated.id))?;

            if let Some(status) = updated.status {
                entry.status = status;
            }

            if let Some(track) = updated.current_track {
                entry.current_track = track;
            }

            if let Some(enabled) = updated.chat_enabled {
                entry.chat_enabled = enabled;
            }

            if let Some(max) = updated.max_listeners {
                entry.max_listeners = max;
            }

            if let Some(count) = updated.listener_count {
                entry.listener_count = count;
            }

            entry.clone()
        };

        self.publish_session(&session);

        Ok(session)
    }

    async fn modify_user_set(
        &self,
        session_id: &SessionId,
        field: UserSetField,
        op: SetOp,
        user_id: &UserId,
    ) -> Result<()> {
        let session = {
            let mut entry = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| StoreError::not_found("session", session_id))?;

            let set = match field {
                UserSetField::Muted => &mut entry.muted_user_ids,
                UserSetField::Banned => &mut entry.banned_user_ids,
            };

            match op {
                SetOp::Add => {
                    set.insert(user_id.clone());
                }
                SetOp::Remove => {
                    set.remove(user_id);
                }
            }

            entry.clone()
        };

        self.publish_session(&session);

        Ok(())
    }

    async fn put_listener(&self, listener: ListenerData) -> Result<()> {
        let session_id = listener.session_id.clone();

        {
            let mut records = self.listeners.entry(session_id.clone()).or_default();

            match records.iter_mut().find(|l| l.user_id == listener.user_id) {
                Some(existing) => *existing = listener,
                None => records.push(listener),
            }
        }

        self.publish_roster(&session_id);

        Ok(())
    }

    async fn listeners_for_session(&self, session_id: &SessionId) -> Result<Vec<ListenerData>> {
        Ok(self
            .listeners
            .get(session_id)
            .map(|l| l.value().clone())
            .unwrap_or_default())
    }

    async fn append_chat_message(&self, new_message: NewChatMessage) -> Result<ChatMessageData> {
        // Reject writes against sessions that don't exist, like a real
        // store with security rules would
        self.session(&new_message.session_id)?;

        let message = ChatMessageData {
            session_id: new_message.session_id.clone(),
            user_id: new_message.user_id,
            username: new_message.username,
            user_profile_picture_url: new_message.user_profile_picture_url,
            message: new_message.message,
            timestamp: Utc::now(),
            is_from_dj: new_message.is_from_dj,
        };

        self.chat
            .entry(new_message.session_id)
            .or_default()
            .push(message.clone());

        self.publish_chat(&message);

        Ok(message)
    }

    async fn chat_history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ChatMessageData>> {
        let log = self
            .chat
            .get(session_id)
            .map(|m| m.value().clone())
            .unwrap_or_default();

        let skip = log.len().saturating_sub(limit);

        Ok(log.into_iter().skip(skip).collect())
    }

    async fn subscribe_session(&self, session_id: &SessionId) -> Result<Subscription<SessionData>> {
        let (sink, subscription) = Subscription::channel();

        self.watchers
            .entry(session_id.clone())
            .or_default()
            .session
            .lock()
            .push(sink);

        Ok(subscription)
    }

    async fn subscribe_chat(
        &self,
        session_id: &SessionId,
    ) -> Result<Subscription<ChatMessageData>> {
        let (sink, subscription) = Subscription::channel();

        self.watchers
            .entry(session_id.clone())
            .or_default()
            .chat
            .lock()
            .push(sink);

        Ok(subscription)
    }

    async fn subscribe_listeners(
        &self,
        session_id: &SessionId,
    ) -> Result<Subscription<Vec<ListenerData>>> {
        let (sink, subscription) = Subscription::channel();

        self.watchers
            .entry(session_id.clone())
            .or_default()
            .listeners
            .lock()
            .push(sink);

        Ok(subscription)
    }
}

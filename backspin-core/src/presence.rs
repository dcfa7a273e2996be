use chrono::{DateTime, Utc};
use log::warn;
use tokio::task::JoinHandle;

use crate::{
    config::Config,
    errors::SessionError,
    events::{EventSender, SessionEvent},
    model::{ListenerData, SessionId, UserProfile},
    store::BoxedSessionStore,
};

/// Keeps "who is listening right now" observable despite no persistent
/// connection guarantee: every present client refreshes its own listener
/// record on a fixed interval, and the roster is derived by filtering out
/// records that have gone stale.
pub struct PresenceTracker {
    config: Config,
    store: BoxedSessionStore,
    events: EventSender,
}

/// Cancels the heartbeat task when cancelled or dropped, so no beat can
/// fire after the client has left.
pub struct PresenceHandle {
    task: JoinHandle<()>,
}

impl PresenceTracker {
    pub fn new(config: &Config, store: &BoxedSessionStore, events: &EventSender) -> Self {
        Self {
            config: config.clone(),
            store: store.clone(),
            events: events.clone(),
        }
    }

    /// Writes the initial listener record, then keeps it fresh until the
    /// returned handle is cancelled. The first beat happens before this
    /// returns, so a successful join is immediately visible in the roster.
    pub async fn start(
        &self,
        session_id: &SessionId,
        user: &UserProfile,
    ) -> Result<PresenceHandle, SessionError> {
        let joined_at = Utc::now();

        self.store
            .put_listener(listener_record(session_id, user, joined_at, joined_at))
            .await?;

        let store = self.store.clone();
        let events = self.events.clone();
        let interval = self.config.heartbeat_interval;
        let session_id = session_id.clone();
        let user = user.clone();

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            // The immediate tick; the initial record was already written
            timer.tick().await;

            loop {
                timer.tick().await;

                let beat = listener_record(&session_id, &user, joined_at, Utc::now());

                if let Err(e) = store.put_listener(beat).await {
                    warn!("Heartbeat for session {} failed: {}", session_id, e);

                    let _ = events.send(SessionEvent::BackgroundError {
                        error: SessionError::Store(e),
                    });
                }
            }
        });

        Ok(PresenceHandle { task })
    }

    /// Filters a roster snapshot down to the participants that are live
    /// right now. A record that is inactive or older than the staleness
    /// window is treated as absent even though it still exists in the
    /// store.
    pub fn live_roster(&self, records: Vec<ListenerData>, now: DateTime<Utc>) -> Vec<ListenerData> {
        let window = self.config.staleness_window_chrono();

        records
            .into_iter()
            .filter(|l| l.is_active && now.signed_duration_since(l.last_seen_at) <= window)
            .collect()
    }
}

impl PresenceHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for PresenceHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn listener_record(
    session_id: &SessionId,
    user: &UserProfile,
    joined_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
) -> ListenerData {
    ListenerData {
        session_id: session_id.clone(),
        user_id: user.id.clone(),
        username: user.username.clone(),
        user_profile_picture_url: user.profile_picture_url.clone(),
        joined_at,
        is_active: true,
        last_seen_at,
    }
}

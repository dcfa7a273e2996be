//! End-to-end scenarios: one DJ and several listeners, each with their own
//! coordinator, converging only through a shared in-memory session store.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;

use backspin_core::{
    BoxedBlockList, BoxedCatalogPlayer, BoxedModerator, BoxedSessionStore, BoxedTransport,
    CatalogPlayer, ChatMessageData, Collaborators, Config, CurrentTrack, ListenerData,
    NewChatMessage, NewSession, NoBlocks, ResolvedTrack, SessionCoordinator, SessionData,
    SessionError, SessionId, SessionState, SessionStatus, SessionStore, SetOp, StartSession,
    StoreError, Subscription, UpdatedSession, UserId, UserProfile, UserSetField,
};
use backspin_impls::{LocalCatalog, MemorySessionStore, NullTransport, TermListModerator};

struct Client {
    coordinator: Arc<SessionCoordinator>,
    catalog: Arc<LocalCatalog>,
}

/// Assembles an isolated coordinator for one user, sharing only the store
/// with the other clients.
fn client(store: &Arc<MemorySessionStore>, user_id: &str) -> Client {
    client_with_store(store.clone() as BoxedSessionStore, user_id)
}

fn client_with_store(store: BoxedSessionStore, user_id: &str) -> Client {
    let catalog = Arc::new(LocalCatalog::new());

    catalog.add_track(ResolvedTrack {
        track_id: "t1".to_string(),
        title: "Midnight Loop".to_string(),
        artist_name: "The Integration Tests".to_string(),
        album_name: None,
        artwork_url: None,
        duration: Some(Duration::from_secs(240)),
    });

    let collaborators = Collaborators {
        store,
        transport: Arc::new(NullTransport::new()) as BoxedTransport,
        catalog: catalog.clone() as BoxedCatalogPlayer,
        moderator: Arc::new(TermListModerator::new(&["spam"])) as BoxedModerator,
        block_list: Arc::new(NoBlocks) as BoxedBlockList,
    };

    let coordinator = SessionCoordinator::new(Config::default(), collaborators);

    coordinator.authenticate(UserProfile {
        id: user_id.to_string(),
        username: user_id.to_string(),
        profile_picture_url: None,
    });

    Client {
        coordinator,
        catalog,
    }
}

fn midnight_loop(started_secs_ago: i64) -> CurrentTrack {
    CurrentTrack {
        track_id: "t1".to_string(),
        title: "Midnight Loop".to_string(),
        artist_name: "The Integration Tests".to_string(),
        album_name: None,
        artwork_url: None,
        started_at: Utc::now() - chrono::Duration::seconds(started_secs_ago),
    }
}

/// Lets subscription deliveries propagate between the clients.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Delegates to an inner store, but the first listener write also flips
/// the session to paused. Models a DJ intent landing while another client
/// is between its fresh session read and its subscriptions going live.
struct PauseOnFirstListenerWrite {
    inner: Arc<MemorySessionStore>,
    armed: AtomicBool,
}

impl PauseOnFirstListenerWrite {
    fn over(inner: &Arc<MemorySessionStore>) -> Self {
        Self {
            inner: inner.clone(),
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl SessionStore for PauseOnFirstListenerWrite {
    async fn create_session(&self, new_session: NewSession) -> Result<SessionData, StoreError> {
        self.inner.create_session(new_session).await
    }

    async fn session_by_id(&self, session_id: &SessionId) -> Result<SessionData, StoreError> {
        self.inner.session_by_id(session_id).await
    }

    async fn update_session(&self, updated: UpdatedSession) -> Result<SessionData, StoreError> {
        self.inner.update_session(updated).await
    }

    async fn modify_user_set(
        &self,
        session_id: &SessionId,
        field: UserSetField,
        op: SetOp,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        self.inner.modify_user_set(session_id, field, op, user_id).await
    }

    async fn put_listener(&self, listener: ListenerData) -> Result<(), StoreError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.inner
                .update_session(UpdatedSession {
                    status: Some(SessionStatus::Paused),
                    ..UpdatedSession::of(&listener.session_id)
                })
                .await?;
        }

        self.inner.put_listener(listener).await
    }

    async fn listeners_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ListenerData>, StoreError> {
        self.inner.listeners_for_session(session_id).await
    }

    async fn append_chat_message(
        &self,
        new_message: NewChatMessage,
    ) -> Result<ChatMessageData, StoreError> {
        self.inner.append_chat_message(new_message).await
    }

    async fn chat_history(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<ChatMessageData>, StoreError> {
        self.inner.chat_history(session_id, limit).await
    }

    async fn subscribe_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Subscription<SessionData>, StoreError> {
        self.inner.subscribe_session(session_id).await
    }

    async fn subscribe_chat(
        &self,
        session_id: &SessionId,
    ) -> Result<Subscription<ChatMessageData>, StoreError> {
        self.inner.subscribe_chat(session_id).await
    }

    async fn subscribe_listeners(
        &self,
        session_id: &SessionId,
    ) -> Result<Subscription<Vec<ListenerData>>, StoreError> {
        self.inner.subscribe_listeners(session_id).await
    }
}

#[tokio::test]
async fn test_scenario_start_join_sync_and_pause() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let listener = client(&store, "luna");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .expect("session starts");

    assert_eq!(session.status, SessionStatus::Live);
    assert_eq!(dj.coordinator.state(), SessionState::Hosting);

    // The DJ is 30 seconds into a track before anyone joins
    dj.coordinator
        .broadcast_track(midnight_loop(30))
        .await
        .expect("track is published");

    listener
        .coordinator
        .join_session(&session.id)
        .await
        .expect("listener joins");

    assert_eq!(listener.coordinator.state(), SessionState::Listening);

    // The late joiner reconstructed the DJ's position from the start
    // timestamp alone
    let state = listener.catalog.player_state();

    assert!(state.playing, "playback started on join");
    assert_eq!(state.seeks.len(), 1, "exactly one seek happened");
    assert!(
        state.seeks[0] >= Duration::from_secs(29) && state.seeks[0] <= Duration::from_secs(35),
        "seek landed near the DJ's elapsed offset, got {:?}",
        state.seeks[0]
    );

    settle().await;

    let roster = dj.coordinator.roster();
    let mut ids: Vec<_> = roster.iter().map(|l| l.user_id.clone()).collect();
    ids.sort();

    assert_eq!(ids, vec!["dj", "luna"]);

    // The DJ pauses; the listener's player follows without issuing any
    // intent of its own
    dj.coordinator.pause_playback().await.expect("pause");
    settle().await;

    let session = listener.coordinator.session().expect("still listening");
    assert_eq!(session.status, SessionStatus::Paused);
    assert!(!listener.catalog.player_state().playing);

    // And resumes
    dj.coordinator.go_live().await.expect("resume");
    settle().await;

    assert!(listener.catalog.player_state().playing);
    assert_eq!(
        listener.catalog.player_state().seeks.len(),
        1,
        "pause and resume never re-seek an already synced track"
    );
}

#[tokio::test]
async fn test_session_change_landing_mid_join_is_applied() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    dj.coordinator
        .broadcast_track(midnight_loop(30))
        .await
        .unwrap();

    // This listener's own presence write carries a concurrent pause into
    // the join window
    let racing = Arc::new(PauseOnFirstListenerWrite::over(&store));
    let listener = client_with_store(racing as BoxedSessionStore, "luna");

    listener.coordinator.join_session(&session.id).await.unwrap();
    settle().await;

    let seen = listener.coordinator.session().expect("still listening");

    assert_eq!(
        seen.status,
        SessionStatus::Paused,
        "a pause that landed mid-join is applied, not lost"
    );
    assert!(
        !listener.catalog.player_state().playing,
        "the local player followed the pause"
    );
}

#[tokio::test]
async fn test_scenario_capacity_is_enforced_at_join() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let first = client(&store, "l1");
    let second = client(&store, "l2");

    let session = dj
        .coordinator
        .start_session(StartSession {
            max_listeners: Some(1),
            ..StartSession::titled("Tiny Room")
        })
        .await
        .unwrap();

    first.coordinator.join_session(&session.id).await.unwrap();

    let result = second.coordinator.join_session(&session.id).await;

    assert!(
        matches!(result, Err(SessionError::SessionFull)),
        "the second listener is rejected"
    );
    assert_eq!(second.coordinator.state(), SessionState::Idle);

    // The rejected join left no trace in the roster
    let records = store.listeners_for_session(&session.id).await.unwrap();
    let mut ids: Vec<_> = records.iter().map(|l| l.user_id.clone()).collect();
    ids.sort();

    assert_eq!(ids, vec!["dj", "l1"]);
}

#[tokio::test]
async fn test_capacity_ignores_stale_records_and_the_mirror() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let joiner = client(&store, "fresh");

    let session = dj
        .coordinator
        .start_session(StartSession {
            max_listeners: Some(1),
            ..StartSession::titled("Tiny Room")
        })
        .await
        .unwrap();

    // A listener record that still exists in the store but went silent
    // long past the staleness window
    store
        .put_listener(ListenerData {
            session_id: session.id.clone(),
            user_id: "ghost".to_string(),
            username: "ghost".to_string(),
            user_profile_picture_url: None,
            joined_at: Utc::now() - chrono::Duration::minutes(10),
            is_active: true,
            last_seen_at: Utc::now() - chrono::Duration::minutes(5),
        })
        .await
        .unwrap();

    // An absurd advisory mirror value must not matter either
    store
        .update_session(UpdatedSession {
            listener_count: Some(9000),
            ..UpdatedSession::of(&session.id)
        })
        .await
        .unwrap();

    joiner
        .coordinator
        .join_session(&session.id)
        .await
        .expect("a stale record does not occupy a capacity slot");
}

#[tokio::test]
async fn test_scenario_mute_blocks_until_unmuted() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let user = client(&store, "uma");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    user.coordinator.join_session(&session.id).await.unwrap();

    dj.coordinator.send_chat("welcome in").await.unwrap();

    dj.coordinator.mute_user(&"uma".to_string()).await.unwrap();
    settle().await;

    let result = user.coordinator.send_chat("hello").await;

    assert!(matches!(result, Err(SessionError::Muted)));

    let history = store.chat_history(&session.id, 10).await.unwrap();
    assert_eq!(history.len(), 1, "the muted message never reached the store");

    dj.coordinator.unmute_user(&"uma".to_string()).await.unwrap();
    settle().await;

    user.coordinator.send_chat("hello").await.expect("admitted");

    let history = store.chat_history(&session.id, 10).await.unwrap();
    let texts: Vec<_> = history.iter().map(|m| m.message.as_str()).collect();

    assert_eq!(texts, vec!["welcome in", "hello"]);
    assert!(
        history[0].timestamp <= history[1].timestamp,
        "ordering is preserved relative to prior messages"
    );
}

#[tokio::test]
async fn test_banned_user_can_never_join() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let banned = client(&store, "mallory");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    dj.coordinator
        .ban_user(&"mallory".to_string())
        .await
        .unwrap();

    let result = banned.coordinator.join_session(&session.id).await;

    assert!(matches!(result, Err(SessionError::Banned)));
    assert_eq!(banned.coordinator.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_banning_a_live_listener_evicts_them() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let listener = client(&store, "mallory");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    listener.coordinator.join_session(&session.id).await.unwrap();

    dj.coordinator
        .ban_user(&"mallory".to_string())
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        listener.coordinator.state(),
        SessionState::Ended,
        "a banned listener cannot stay live"
    );
}

#[tokio::test]
async fn test_ending_the_session_reaches_listeners() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let listener = client(&store, "luna");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    listener.coordinator.join_session(&session.id).await.unwrap();

    dj.coordinator.end_session().await.unwrap();
    settle().await;

    assert_eq!(dj.coordinator.state(), SessionState::Ended);
    assert_eq!(
        listener.coordinator.state(),
        SessionState::Ended,
        "store-confirmed termination moves listeners to Ended"
    );

    let stored = store.session_by_id(&session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Ended);
    assert!(
        stored.current_track.is_none(),
        "an ended session carries no current track"
    );
}

#[tokio::test]
async fn test_leaving_cancels_all_live_updates() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let listener = client(&store, "luna");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    listener.coordinator.join_session(&session.id).await.unwrap();

    let joined_at = store
        .listeners_for_session(&session.id)
        .await
        .unwrap()
        .into_iter()
        .find(|l| l.user_id == "luna")
        .unwrap()
        .joined_at;

    settle().await;
    listener.coordinator.leave_session().await.unwrap();

    assert_eq!(listener.coordinator.state(), SessionState::Ended);

    let records = store.listeners_for_session(&session.id).await.unwrap();
    let me = records.iter().find(|l| l.user_id == "luna").unwrap();
    assert!(!me.is_active, "departure marks the record inactive");
    assert_eq!(
        me.joined_at, joined_at,
        "departure preserves the original join time"
    );

    // Updates after departure must not resurrect the departed client
    dj.coordinator.broadcast_track(midnight_loop(0)).await.unwrap();
    settle().await;

    assert_eq!(listener.coordinator.state(), SessionState::Ended);
    assert!(
        !listener.catalog.player_state().playing,
        "no playback after leaving"
    );
}

#[tokio::test]
async fn test_joining_an_ended_session_fails() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let late = client(&store, "luna");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    dj.coordinator.end_session().await.unwrap();

    let result = late.coordinator.join_session(&session.id).await;

    assert!(matches!(result, Err(SessionError::SessionNotFound)));
}

#[tokio::test]
async fn test_moderation_intents_require_the_dj() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let listener = client(&store, "luna");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    listener.coordinator.join_session(&session.id).await.unwrap();

    let result = listener.coordinator.mute_user(&"dj".to_string()).await;

    assert!(
        matches!(result, Err(SessionError::NotAuthorized)),
        "a listener cannot moderate"
    );

    let result = listener.coordinator.set_chat_enabled(false).await;
    assert!(matches!(result, Err(SessionError::NotAuthorized)));
}

#[tokio::test]
async fn test_intents_require_authentication() {
    let store = Arc::new(MemorySessionStore::new());
    let catalog = Arc::new(LocalCatalog::new());

    let coordinator = SessionCoordinator::new(
        Config::default(),
        Collaborators {
            store: store.clone() as BoxedSessionStore,
            transport: Arc::new(NullTransport::new()) as BoxedTransport,
            catalog: catalog as BoxedCatalogPlayer,
            moderator: Arc::new(TermListModerator::new(&[])) as BoxedModerator,
            block_list: Arc::new(NoBlocks) as BoxedBlockList,
        },
    );

    let result = coordinator
        .start_session(StartSession::titled("Late Night"))
        .await;

    assert!(matches!(result, Err(SessionError::NotAuthenticated)));
}

#[tokio::test]
async fn test_disabling_chat_silences_the_room() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let listener = client(&store, "luna");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    listener.coordinator.join_session(&session.id).await.unwrap();

    dj.coordinator.set_chat_enabled(false).await.unwrap();
    settle().await;

    let from_listener = listener.coordinator.send_chat("hello").await;
    let from_dj = dj.coordinator.send_chat("anyone?").await;

    assert!(matches!(from_listener, Err(SessionError::ChatDisabled)));
    assert!(
        matches!(from_dj, Err(SessionError::ChatDisabled)),
        "disabled chat blocks the DJ too"
    );
}

#[tokio::test]
async fn test_moderated_terms_are_blocked_with_reason() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");

    dj.coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    let result = dj.coordinator.send_chat("free spam here").await;

    match result {
        Err(SessionError::ModerationBlocked(reason)) => {
            assert!(reason.contains("spam"), "the classifier's reason is surfaced")
        }
        other => panic!("expected ModerationBlocked, got {:?}", other),
    }
}

#[tokio::test]
async fn test_chat_fans_out_to_other_clients() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");
    let listener = client(&store, "luna");

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    listener.coordinator.join_session(&session.id).await.unwrap();

    let events = listener.coordinator.events();

    dj.coordinator.send_chat("good evening").await.unwrap();
    settle().await;

    let received = events
        .try_iter()
        .find_map(|event| match event {
            backspin_core::SessionEvent::ChatReceived { message } => Some(message),
            _ => None,
        })
        .expect("the listener observed the message");

    assert_eq!(received.message, "good evening");
    assert!(received.is_from_dj);
}

#[tokio::test]
async fn test_skip_republishes_with_fresh_timestamp() {
    let store = Arc::new(MemorySessionStore::new());
    let dj = client(&store, "dj");

    dj.catalog.add_track(ResolvedTrack {
        track_id: "t2".to_string(),
        title: "Second Wind".to_string(),
        artist_name: "The Integration Tests".to_string(),
        album_name: None,
        artwork_url: None,
        duration: None,
    });

    let session = dj
        .coordinator
        .start_session(StartSession::titled("Late Night"))
        .await
        .unwrap();

    // Queue up both tracks and broadcast the first
    let first = dj.catalog.resolve(&"t1".to_string()).await.unwrap();
    let second = dj.catalog.resolve(&"t2".to_string()).await.unwrap();

    dj.catalog
        .enqueue(first, backspin_core::EnqueuePosition::Tail)
        .await
        .unwrap();
    dj.catalog
        .enqueue(second, backspin_core::EnqueuePosition::Tail)
        .await
        .unwrap();

    dj.coordinator.broadcast_track(midnight_loop(60)).await.unwrap();

    let before = Utc::now();
    let skipped = dj
        .coordinator
        .skip_to_next()
        .await
        .unwrap()
        .expect("a next track started");

    assert_eq!(skipped.track_id, "t2");
    assert!(
        skipped.started_at >= before,
        "the republished track carries a fresh start timestamp"
    );

    let stored = store.session_by_id(&session.id).await.unwrap();
    let current = stored.current_track.expect("track is published");
    assert_eq!(current.track_id, "t2");
}

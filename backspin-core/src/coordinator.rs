use std::{collections::HashSet, future::Future, sync::Arc};

use chrono::Utc;
use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{
    catalog::BoxedCatalogPlayer,
    chat::ChatModerationGate,
    config::Config,
    errors::SessionError,
    events::{EventReceiver, EventSender, SessionEvent},
    model::{
        ChatMessageData, CurrentTrack, ListenerData, NewChatMessage, NewSession, SessionData,
        SessionId, SessionStatus, UpdatedSession, UserId, UserProfile,
    },
    moderation::{BoxedBlockList, BoxedModerator},
    presence::{PresenceHandle, PresenceTracker},
    store::{BoxedSessionStore, SetOp, StoreError, UserSetField},
    sync::PlaybackSynchronizer,
    transport::BoxedTransport,
};

/// The externally observable state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Hosting,
    Listening,
    Ended,
}

/// Everything the coordinator delegates to. All of these are injected at
/// construction, so isolated coordinator instances can be assembled in
/// tests with whatever implementors fit.
pub struct Collaborators {
    pub store: BoxedSessionStore,
    pub transport: BoxedTransport,
    pub catalog: BoxedCatalogPlayer,
    pub moderator: BoxedModerator,
    pub block_list: BoxedBlockList,
}

/// The DJ-side parameters for a new session.
#[derive(Debug, Clone)]
pub struct StartSession {
    pub title: String,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub tags: HashSet<String>,
    pub chat_enabled: bool,
    pub max_listeners: Option<usize>,
}

impl StartSession {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            description: None,
            genre: None,
            tags: Default::default(),
            chat_enabled: true,
            max_listeners: None,
        }
    }
}

/// Book-keeping for a session this client is currently part of.
struct LiveState {
    session: SessionData,
    /// Staleness-filtered roster, refreshed from the listener subscription
    roster: Vec<ListenerData>,
    presence: PresenceHandle,
    /// The subscription forwarding tasks. Aborted on leave/end so no late
    /// update can resurrect stale state after departure.
    tasks: Vec<JoinHandle<()>>,
}

enum Phase {
    Idle,
    Hosting(LiveState),
    Listening(LiveState),
    Ended,
}

/// The client-side session coordinator: the single point of truth the
/// surrounding UI observes.
///
/// Owns the Idle / Hosting / Listening / Ended state machine and
/// orchestrates presence, playback sync, the chat gate, and the broadcast
/// transport. Every intent validates role and state first, performs the
/// remote mutation second, and updates local observable state only from
/// the acknowledgement or the following subscription update.
pub struct SessionCoordinator {
    config: Config,
    store: BoxedSessionStore,
    transport: BoxedTransport,
    catalog: BoxedCatalogPlayer,

    gate: ChatModerationGate,
    sync: PlaybackSynchronizer,
    presence: PresenceTracker,

    user: Mutex<Option<UserProfile>>,
    phase: Mutex<Phase>,

    event_sender: EventSender,
    /// Held so emitting never fails even before an observer attaches
    event_receiver: EventReceiver,
}

impl SessionCoordinator {
    pub fn new(config: Config, collaborators: Collaborators) -> Arc<Self> {
        let (event_sender, event_receiver) = crossbeam::channel::unbounded();

        let Collaborators {
            store,
            transport,
            catalog,
            moderator,
            block_list,
        } = collaborators;

        let gate = ChatModerationGate::new(&config, &moderator, &block_list);
        let sync = PlaybackSynchronizer::new(&catalog);
        let presence = PresenceTracker::new(&config, &store, &event_sender);

        Arc::new(Self {
            config,
            store,
            transport,
            catalog,
            gate,
            sync,
            presence,
            user: Mutex::new(None),
            phase: Mutex::new(Phase::Idle),
            event_sender,
            event_receiver,
        })
    }

    /// Sets the locally authenticated user. Intents fail with
    /// `NotAuthenticated` until this is called.
    pub fn authenticate(&self, user: UserProfile) {
        *self.user.lock() = Some(user);
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.user.lock().clone()
    }

    /// A receiver for observing coordinator events.
    pub fn events(&self) -> EventReceiver {
        self.event_receiver.clone()
    }

    pub fn state(&self) -> SessionState {
        match &*self.phase.lock() {
            Phase::Idle => SessionState::Idle,
            Phase::Hosting(_) => SessionState::Hosting,
            Phase::Listening(_) => SessionState::Listening,
            Phase::Ended => SessionState::Ended,
        }
    }

    /// The session this client is hosting or listening to, if any.
    pub fn session(&self) -> Option<SessionData> {
        match &*self.phase.lock() {
            Phase::Hosting(live) | Phase::Listening(live) => Some(live.session.clone()),
            _ => None,
        }
    }

    /// The current staleness-filtered roster.
    pub fn roster(&self) -> Vec<ListenerData> {
        match &*self.phase.lock() {
            Phase::Hosting(live) | Phase::Listening(live) => live.roster.clone(),
            _ => vec![],
        }
    }

    /// Creates a session and starts broadcasting as its DJ.
    pub async fn start_session(
        self: &Arc<Self>,
        request: StartSession,
    ) -> Result<SessionData, SessionError> {
        let user = self.require_user()?;
        self.require_idle()?;

        self.catalog.authorize().await?;

        let session = self
            .bounded(self.store.create_session(NewSession {
                title: request.title,
                description: request.description,
                genre: request.genre,
                tags: request.tags,
                chat_enabled: request.chat_enabled,
                max_listeners: request.max_listeners,
                dj: user.clone(),
            }))
            .await?;

        if let Err(e) = self.open_broadcast(&session.id).await {
            // The session document exists but nothing is streaming to it.
            // Roll it back so it doesn't show up as a ghost session, and
            // leave the machine in Idle so the intent can be retried.
            self.abandon_session(&session.id).await;
            return Err(e);
        }

        let prepared = async {
            let presence = self.presence.start(&session.id, &user).await?;
            let tasks = self.open_streams(&session.id).await?;

            Ok::<_, SessionError>((presence, tasks))
        };

        let (presence, tasks) = match prepared.await {
            Ok(prepared) => prepared,
            Err(e) => {
                // Dropping the presence handle stops any heartbeat that got
                // going; the document rollback handles the rest
                self.abandon_session(&session.id).await;
                return Err(e);
            }
        };

        info!("Hosting session \"{}\" as {}", session.title, user.username);

        self.commit_phase(Phase::Hosting(LiveState {
            session: session.clone(),
            roster: vec![],
            presence,
            tasks,
        }));

        self.prime_roster(&session.id).await;

        Ok(session)
    }

    /// Joins an existing session as a listener.
    ///
    /// The session is re-read fresh from the store, never trusted from the
    /// caller, and the capacity check recomputes the live roster rather
    /// than reading the advisory listener-count mirror.
    pub async fn join_session(
        self: &Arc<Self>,
        session_id: &SessionId,
    ) -> Result<SessionData, SessionError> {
        let user = self.require_user()?;
        self.require_idle()?;

        let session = self.fresh_session(session_id).await?;

        if session.banned_user_ids.contains(&user.id) {
            return Err(SessionError::Banned);
        }

        if let Some(max) = session.max_listeners {
            let records = self
                .bounded(self.store.listeners_for_session(session_id))
                .await?;

            // The cap applies to listeners; the DJ's own presence record
            // doesn't occupy a slot.
            let listening = self
                .presence
                .live_roster(records, Utc::now())
                .into_iter()
                .filter(|l| l.user_id != session.dj_id)
                .count();

            if listening >= max {
                return Err(SessionError::SessionFull);
            }
        }

        self.catalog.authorize().await?;

        let presence = self.presence.start(session_id, &user).await?;
        let tasks = self.open_streams(session_id).await?;

        // Catch up to the broadcast that is already in progress
        if let Some(track) = &session.current_track {
            if session.status == SessionStatus::Live {
                if let Err(e) = self.sync.apply(track).await {
                    self.report_background(e);
                }
            }
        }

        info!("Joined session \"{}\" as {}", session.title, user.username);

        self.commit_phase(Phase::Listening(LiveState {
            session: session.clone(),
            roster: vec![],
            presence,
            tasks,
        }));

        self.prime_session(&session.id).await;
        self.prime_roster(&session.id).await;

        Ok(session)
    }

    /// Leaves the session this client is listening to.
    pub async fn leave_session(&self) -> Result<(), SessionError> {
        let live = {
            let mut phase = self.phase.lock();

            match std::mem::replace(&mut *phase, Phase::Ended) {
                Phase::Listening(live) => live,
                other => {
                    *phase = other;
                    return Err(SessionError::InvalidState);
                }
            }
        };

        self.teardown(&live);
        self.sync.reset();

        // Mark our own record inactive so the roster drops us right away
        // instead of waiting for staleness
        if let Some(record) = self.inactive_record(&live.session.id).await {
            if let Err(e) = self.store.put_listener(record).await {
                warn!("Could not mark listener record inactive: {}", e);
            }
        }

        if let Err(e) = self.catalog.pause().await {
            warn!("Could not pause local playback on leave: {}", e);
        }

        info!("Left session \"{}\"", live.session.title);
        self.emit_state(SessionState::Ended);

        Ok(())
    }

    /// Ends the session this client is hosting.
    pub async fn end_session(&self) -> Result<(), SessionError> {
        let session_id = {
            let phase = self.phase.lock();

            match &*phase {
                Phase::Hosting(live) => live.session.id.clone(),
                _ => return Err(SessionError::InvalidState),
            }
        };

        // Confirm termination in the store before anything is torn down
        // locally. If this fails the machine stays in Hosting and the
        // intent can be retried.
        self.bounded(self.store.update_session(UpdatedSession {
            status: Some(SessionStatus::Ended),
            current_track: Some(None),
            ..UpdatedSession::of(&session_id)
        }))
        .await?;

        let live = {
            let mut phase = self.phase.lock();

            match std::mem::replace(&mut *phase, Phase::Ended) {
                Phase::Hosting(live) => Some(live),
                // The session subscription can observe our own termination
                // write and confirm it before we get here; that's still a
                // successful end
                Phase::Ended => None,
                other => {
                    *phase = other;
                    return Err(SessionError::InvalidState);
                }
            }
        };

        if let Some(live) = &live {
            self.teardown(live);
        }

        self.close_broadcast().await;

        if let Some(record) = self.inactive_record(&session_id).await {
            if let Err(e) = self.store.put_listener(record).await {
                warn!("Could not mark listener record inactive: {}", e);
            }
        }

        if let Some(live) = live {
            info!("Ended session \"{}\"", live.session.title);
            self.emit_state(SessionState::Ended);
        }

        Ok(())
    }

    /// Resumes the broadcast. DJ only.
    pub async fn go_live(&self) -> Result<(), SessionError> {
        let session = self.require_hosting()?;

        let updated = self
            .bounded(self.store.update_session(UpdatedSession {
                status: Some(SessionStatus::Live),
                ..UpdatedSession::of(&session.id)
            }))
            .await?;

        self.catalog.play().await?;

        if let Some(track) = &updated.current_track {
            self.transport.send_now_playing(track).await?;
        }

        self.absorb_session(updated);

        Ok(())
    }

    /// Pauses the broadcast. DJ only.
    pub async fn pause_playback(&self) -> Result<(), SessionError> {
        let session = self.require_hosting()?;

        let updated = self
            .bounded(self.store.update_session(UpdatedSession {
                status: Some(SessionStatus::Paused),
                ..UpdatedSession::of(&session.id)
            }))
            .await?;

        self.catalog.pause().await?;
        self.absorb_session(updated);

        Ok(())
    }

    /// Advances to the next track and, if one started, republishes it with
    /// a fresh start timestamp. DJ only.
    pub async fn skip_to_next(&self) -> Result<Option<CurrentTrack>, SessionError> {
        let session = self.require_hosting()?;

        let next = match self.catalog.skip_to_next().await? {
            Some(next) => next,
            None => return Ok(None),
        };

        let track = CurrentTrack {
            track_id: next.track_id,
            title: next.title,
            artist_name: next.artist_name,
            album_name: next.album_name,
            artwork_url: next.artwork_url,
            started_at: Utc::now(),
        };

        let updated = self
            .bounded(self.store.update_session(UpdatedSession {
                current_track: Some(Some(track.clone())),
                ..UpdatedSession::of(&session.id)
            }))
            .await?;

        self.transport.send_now_playing(&track).await?;
        self.absorb_session(updated);

        Ok(Some(track))
    }

    /// Publishes a track as now playing. DJ only. Used when the DJ picks a
    /// track directly rather than advancing the queue.
    pub async fn broadcast_track(&self, track: CurrentTrack) -> Result<(), SessionError> {
        let session = self.require_hosting()?;

        let updated = self
            .bounded(self.store.update_session(UpdatedSession {
                current_track: Some(Some(track.clone())),
                ..UpdatedSession::of(&session.id)
            }))
            .await?;

        self.transport.send_now_playing(&track).await?;
        self.absorb_session(updated);

        Ok(())
    }

    /// Sends a chat message, running it through the moderation gate first.
    /// The message is appended to the store only if every check passes; it
    /// comes back to this client through the chat subscription like
    /// everyone else's messages.
    pub async fn send_chat(&self, text: &str) -> Result<ChatMessageData, SessionError> {
        let user = self.require_user()?;

        let session = self
            .session()
            .ok_or(SessionError::InvalidState)?;

        self.gate.admit(&session, &user.id, text).await?;

        let message = self
            .bounded(self.store.append_chat_message(NewChatMessage {
                session_id: session.id.clone(),
                user_id: user.id.clone(),
                username: user.username.clone(),
                user_profile_picture_url: user.profile_picture_url.clone(),
                message: text.to_string(),
                is_from_dj: user.id == session.dj_id,
            }))
            .await?;

        Ok(message)
    }

    pub async fn mute_user(&self, user_id: &UserId) -> Result<(), SessionError> {
        self.moderate_set(UserSetField::Muted, SetOp::Add, user_id)
            .await
    }

    pub async fn unmute_user(&self, user_id: &UserId) -> Result<(), SessionError> {
        self.moderate_set(UserSetField::Muted, SetOp::Remove, user_id)
            .await
    }

    pub async fn ban_user(&self, user_id: &UserId) -> Result<(), SessionError> {
        self.moderate_set(UserSetField::Banned, SetOp::Add, user_id)
            .await
    }

    pub async fn unban_user(&self, user_id: &UserId) -> Result<(), SessionError> {
        self.moderate_set(UserSetField::Banned, SetOp::Remove, user_id)
            .await
    }

    pub async fn set_chat_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        let session = self.require_hosting()?;

        let updated = self
            .bounded(self.store.update_session(UpdatedSession {
                chat_enabled: Some(enabled),
                ..UpdatedSession::of(&session.id)
            }))
            .await?;

        self.absorb_session(updated);

        Ok(())
    }

    pub async fn set_max_listeners(&self, max: Option<usize>) -> Result<(), SessionError> {
        let session = self.require_hosting()?;

        let updated = self
            .bounded(self.store.update_session(UpdatedSession {
                max_listeners: Some(max),
                ..UpdatedSession::of(&session.id)
            }))
            .await?;

        self.absorb_session(updated);

        Ok(())
    }

    /// All moderation set updates go through the store's increment-safe
    /// membership operation, so rapid mute/unmute races resolve as
    /// last-write-wins without clobbering other members of the set.
    async fn moderate_set(
        &self,
        field: UserSetField,
        op: SetOp,
        user_id: &UserId,
    ) -> Result<(), SessionError> {
        let session = self.require_hosting()?;

        self.bounded(self.store.modify_user_set(&session.id, field, op, user_id))
            .await?;

        Ok(())
    }

    // ---- intent preconditions ----

    fn require_user(&self) -> Result<UserProfile, SessionError> {
        self.user.lock().clone().ok_or(SessionError::NotAuthenticated)
    }

    fn require_idle(&self) -> Result<(), SessionError> {
        match &*self.phase.lock() {
            Phase::Idle => Ok(()),
            _ => Err(SessionError::InvalidState),
        }
    }

    /// DJ-only intents are valid only while hosting; anyone else gets
    /// `NotAuthorized`.
    fn require_hosting(&self) -> Result<SessionData, SessionError> {
        match &*self.phase.lock() {
            Phase::Hosting(live) => Ok(live.session.clone()),
            _ => Err(SessionError::NotAuthorized),
        }
    }

    // ---- remote plumbing ----

    /// Bounds a store round-trip so an unreachable store surfaces as a
    /// retryable error rather than a hang.
    async fn bounded<T, F>(&self, operation: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.config.store_timeout, operation).await {
            Ok(result) => result.map_err(SessionError::Store),
            Err(_) => Err(SessionError::Store(StoreError::Timeout)),
        }
    }

    async fn fresh_session(&self, session_id: &SessionId) -> Result<SessionData, SessionError> {
        let session = self
            .bounded(self.store.session_by_id(session_id))
            .await
            .map_err(|e| match e {
                SessionError::Store(ref inner) if inner.is_not_found() => {
                    SessionError::SessionNotFound
                }
                other => other,
            })?;

        if session.status == SessionStatus::Ended {
            return Err(SessionError::SessionNotFound);
        }

        Ok(session)
    }

    async fn open_broadcast(&self, session_id: &SessionId) -> Result<(), SessionError> {
        self.transport.connect(session_id).await?;
        self.transport.start_stream().await?;

        Ok(())
    }

    async fn close_broadcast(&self) {
        if let Err(e) = self.transport.stop_stream().await {
            warn!("Could not stop stream: {}", e);
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!("Could not disconnect transport: {}", e);
        }
    }

    /// Best-effort rollback of a session document that was created but
    /// never went on air.
    async fn abandon_session(&self, session_id: &SessionId) {
        self.close_broadcast().await;

        let ended = UpdatedSession {
            status: Some(SessionStatus::Ended),
            ..UpdatedSession::of(session_id)
        };

        if let Err(e) = self.store.update_session(ended).await {
            warn!("Could not roll back session {}: {}", session_id, e);
        }
    }

    /// Opens the three live subscriptions and spawns their forwarding
    /// tasks. The tasks hold weak references to nothing; they are aborted
    /// wholesale on leave/end.
    async fn open_streams(
        self: &Arc<Self>,
        session_id: &SessionId,
    ) -> Result<Vec<JoinHandle<()>>, SessionError> {
        let mut session_sub = self
            .bounded(self.store.subscribe_session(session_id))
            .await?;
        let mut chat_sub = self.bounded(self.store.subscribe_chat(session_id)).await?;
        let mut roster_sub = self
            .bounded(self.store.subscribe_listeners(session_id))
            .await?;

        let on_session = {
            let this = self.clone();

            tokio::spawn(async move {
                while let Some(updated) = session_sub.recv().await {
                    this.apply_session_update(updated).await;
                }
            })
        };

        let on_chat = {
            let this = self.clone();

            tokio::spawn(async move {
                while let Some(message) = chat_sub.recv().await {
                    if this.gate.is_visible(&message) {
                        this.emit(SessionEvent::ChatReceived { message });
                    }
                }
            })
        };

        let on_roster = {
            let this = self.clone();

            tokio::spawn(async move {
                while let Some(records) = roster_sub.recv().await {
                    this.apply_roster_update(records).await;
                }
            })
        };

        Ok(vec![on_session, on_chat, on_roster])
    }

    // ---- subscription handling ----

    /// Applies a session document change delivered by the store. Delivery
    /// is at-least-once and possibly reordered, so everything here is
    /// idempotent.
    async fn apply_session_update(&self, updated: SessionData) {
        let applied = {
            let mut phase = self.phase.lock();

            match &mut *phase {
                Phase::Hosting(live) if live.session.id == updated.id => {
                    Some((std::mem::replace(&mut live.session, updated.clone()), false))
                }
                Phase::Listening(live) if live.session.id == updated.id => {
                    Some((std::mem::replace(&mut live.session, updated.clone()), true))
                }
                _ => None,
            }
        };

        let (previous, listening) = match applied {
            Some(applied) => applied,
            None => return,
        };

        // Store-confirmed termination is the one way a subscription update
        // may move the machine to its terminal state
        if updated.status == SessionStatus::Ended {
            self.confirm_ended().await;
            return;
        }

        if listening && !self.follow_dj(&previous, &updated).await {
            return;
        }

        self.emit(SessionEvent::SessionUpdated { session: updated });
    }

    /// Listener-side reaction to the DJ's changes: track sync, pause and
    /// resume, and self-eviction when banned mid-session. Returns false
    /// when the client evicted itself.
    async fn follow_dj(&self, previous: &SessionData, updated: &SessionData) -> bool {
        let me = self.current_user().map(|u| u.id);

        if let Some(me) = me {
            if updated.banned_user_ids.contains(&me) {
                self.report_background(SessionError::Banned);
                self.confirm_ended().await;
                return false;
            }
        }

        match updated.status {
            SessionStatus::Live => {
                if let Some(track) = &updated.current_track {
                    match self.sync.apply(track).await {
                        Ok(_) => {
                            let identity_changed = previous
                                .current_track
                                .as_ref()
                                .map(|t| !t.same_playback(track))
                                .unwrap_or(true);

                            if identity_changed {
                                self.emit(SessionEvent::TrackChanged {
                                    track: track.clone(),
                                });
                            }
                        }
                        Err(e) => self.report_background(e),
                    }
                }

                // Resuming from a pause the DJ initiated
                if previous.status == SessionStatus::Paused {
                    if let Err(e) = self.catalog.play().await {
                        self.report_background(e.into());
                    }
                }
            }
            SessionStatus::Paused => {
                if previous.status != SessionStatus::Paused {
                    if let Err(e) = self.catalog.pause().await {
                        self.report_background(e.into());
                    }
                }
            }
            SessionStatus::Ended => {}
        }

        true
    }

    /// Applies a roster snapshot: filters staleness, publishes the result,
    /// and (hosting only) mirrors the count onto the session document.
    /// The mirror is advisory; capacity checks never read it.
    async fn apply_roster_update(&self, records: Vec<ListenerData>) {
        let roster = self.presence.live_roster(records, Utc::now());

        let mirror = {
            let mut phase = self.phase.lock();

            match &mut *phase {
                Phase::Hosting(live) => {
                    live.roster = roster.clone();

                    let changed = live.session.listener_count != roster.len();
                    changed.then(|| live.session.id.clone())
                }
                Phase::Listening(live) => {
                    live.roster = roster.clone();
                    None
                }
                _ => return,
            }
        };

        self.emit(SessionEvent::RosterUpdated {
            roster: roster.clone(),
        });

        if let Some(session_id) = mirror {
            if self.config.mirror_listener_count {
                let counted = UpdatedSession {
                    listener_count: Some(roster.len()),
                    ..UpdatedSession::of(&session_id)
                };

                if let Err(e) = self.store.update_session(counted).await {
                    warn!("Could not mirror listener count: {}", e);
                }
            }
        }
    }

    /// Re-reads the session document right after the phase commits. A
    /// change that landed between the fresh read and the subscriptions
    /// going live would otherwise never be delivered.
    async fn prime_session(&self, session_id: &SessionId) {
        match self.store.session_by_id(session_id).await {
            Ok(session) => self.apply_session_update(session).await,
            Err(e) => warn!("Could not prime session: {}", e),
        }
    }

    /// Seeds the roster right after a transition into a session, since the
    /// next subscription snapshot only arrives on the next roster change.
    async fn prime_roster(&self, session_id: &SessionId) {
        match self.store.listeners_for_session(session_id).await {
            Ok(records) => self.apply_roster_update(records).await,
            Err(e) => warn!("Could not prime roster: {}", e),
        }
    }

    /// The store confirmed the session is over. Tear everything down.
    async fn confirm_ended(&self) {
        let live = {
            let mut phase = self.phase.lock();

            match std::mem::replace(&mut *phase, Phase::Ended) {
                Phase::Hosting(live) | Phase::Listening(live) => live,
                other => {
                    *phase = other;
                    return;
                }
            }
        };

        self.sync.reset();

        if let Err(e) = self.catalog.pause().await {
            warn!("Could not pause local playback: {}", e);
        }

        info!("Session \"{}\" ended", live.session.title);
        self.emit_state(SessionState::Ended);

        // Aborting last: this may be called from one of the tasks being
        // cancelled, and everything observable has already happened
        self.teardown(&live);
    }

    // ---- local state plumbing ----

    /// Cancels the heartbeat and every subscription task as one action, so
    /// nothing fires after departure.
    fn teardown(&self, live: &LiveState) {
        live.presence.cancel();

        for task in &live.tasks {
            task.abort();
        }
    }

    /// The caller's listener record with presence cleared. The original
    /// join time is carried over from the stored record when it can still
    /// be read back.
    async fn inactive_record(&self, session_id: &SessionId) -> Option<ListenerData> {
        let user = self.current_user()?;
        let now = Utc::now();

        let joined_at = self
            .store
            .listeners_for_session(session_id)
            .await
            .ok()
            .and_then(|records| records.into_iter().find(|l| l.user_id == user.id))
            .map(|l| l.joined_at)
            .unwrap_or(now);

        Some(ListenerData {
            session_id: session_id.clone(),
            user_id: user.id,
            username: user.username,
            user_profile_picture_url: user.profile_picture_url,
            joined_at,
            is_active: false,
            last_seen_at: now,
        })
    }

    /// Replaces the local session copy with a store-acknowledged one.
    fn absorb_session(&self, updated: SessionData) {
        let mut phase = self.phase.lock();

        if let Phase::Hosting(live) | Phase::Listening(live) = &mut *phase {
            if live.session.id == updated.id {
                live.session = updated;
            }
        }
    }

    fn commit_phase(&self, next: Phase) {
        let state = match &next {
            Phase::Idle => SessionState::Idle,
            Phase::Hosting(_) => SessionState::Hosting,
            Phase::Listening(_) => SessionState::Listening,
            Phase::Ended => SessionState::Ended,
        };

        *self.phase.lock() = next;
        self.emit_state(state);
    }

    fn emit_state(&self, new_state: SessionState) {
        self.emit(SessionEvent::StateChanged { new_state });
    }

    fn report_background(&self, error: SessionError) {
        warn!("Background session error: {}", error);
        self.emit(SessionEvent::BackgroundError { error });
    }

    fn emit(&self, event: SessionEvent) {
        self.event_sender.send(event).expect("event is sent");
    }
}

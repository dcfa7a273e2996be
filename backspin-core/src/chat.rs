use std::time::Instant;

use crossbeam::atomic::AtomicCell;

use crate::{
    config::Config,
    errors::SessionError,
    model::{ChatMessageData, SessionData, UserId},
    moderation::{BoxedBlockList, BoxedModerator, Verdict},
};

/// Decides whether an outgoing chat message from the local user may be
/// admitted, and which inbound messages are shown to the viewer.
///
/// This is a pure gate, not a queue: a rejected message is never buffered
/// or retried, and the caller is told synchronously why it did not go out.
pub struct ChatModerationGate {
    config: Config,
    moderator: BoxedModerator,
    block_list: BoxedBlockList,
    /// When this client's last *accepted* send happened. Rejected sends do
    /// not move it.
    last_accepted: AtomicCell<Option<Instant>>,
}

impl ChatModerationGate {
    pub fn new(config: &Config, moderator: &BoxedModerator, block_list: &BoxedBlockList) -> Self {
        Self {
            config: config.clone(),
            moderator: moderator.clone(),
            block_list: block_list.clone(),
            last_accepted: AtomicCell::new(None),
        }
    }

    /// Runs the admission checks, in order, short-circuiting on the first
    /// failure:
    ///
    /// 1. chat must be enabled for the session (this blocks everyone,
    ///    the DJ included)
    /// 2. the sender must not be muted
    /// 3. the sender must not be banned
    /// 4. the local rate limit must have elapsed
    /// 5. the content classifier must allow the text
    ///
    /// Only a message that passes all five may be appended to the store.
    pub async fn admit(
        &self,
        session: &SessionData,
        sender_id: &UserId,
        text: &str,
    ) -> Result<(), SessionError> {
        if !session.chat_enabled {
            return Err(SessionError::ChatDisabled);
        }

        if session.muted_user_ids.contains(sender_id) {
            return Err(SessionError::Muted);
        }

        if session.banned_user_ids.contains(sender_id) {
            return Err(SessionError::Banned);
        }

        let now = Instant::now();

        if let Some(last) = self.last_accepted.load() {
            if now.duration_since(last) < self.config.chat_min_interval {
                return Err(SessionError::RateLimited);
            }
        }

        if let Verdict::Blocked(reason) = self.moderator.moderate(text, sender_id).await {
            return Err(SessionError::ModerationBlocked(reason));
        }

        self.last_accepted.store(Some(now));

        Ok(())
    }

    /// Whether an inbound message should be shown to this viewer. Messages
    /// from authors on the viewer's block list are hidden, not deleted.
    pub fn is_visible(&self, message: &ChatMessageData) -> bool {
        !self.block_list.is_blocked(&message.user_id)
    }
}

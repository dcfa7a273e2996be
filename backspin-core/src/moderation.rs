use async_trait::async_trait;

use crate::model::UserId;

pub type BoxedModerator = std::sync::Arc<dyn Moderator>;
pub type BoxedBlockList = std::sync::Arc<dyn BlockList>;

/// The outcome of running a message through the content classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// The classifier's stated reason, surfaced verbatim to the sender
    Blocked(String),
}

/// The external content-moderation classifier. Opaque to the engine.
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn moderate(&self, text: &str, author_id: &UserId) -> Verdict;
}

/// The viewer's personal block list. Messages from blocked authors are
/// hidden for this viewer without being deleted from the store.
pub trait BlockList: Send + Sync {
    fn is_blocked(&self, author_id: &UserId) -> bool;
}

/// Default block list that hides nothing.
pub struct NoBlocks;

impl BlockList for NoBlocks {
    fn is_blocked(&self, _author_id: &UserId) -> bool {
        false
    }
}

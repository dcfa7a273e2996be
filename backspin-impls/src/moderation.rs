use std::collections::HashSet;

use async_trait::async_trait;

use backspin_core::{BlockList, Moderator, UserId, Verdict};

/// A moderator that allows everything. The default when no classifier is
/// wired up.
pub struct AllowAll;

#[async_trait]
impl Moderator for AllowAll {
    async fn moderate(&self, _text: &str, _author_id: &UserId) -> Verdict {
        Verdict::Allowed
    }
}

/// Blocks any message containing one of the configured terms, naming the
/// term in the verdict reason. A stand-in for the real text classifier
/// with the same observable contract.
pub struct TermListModerator {
    terms: Vec<String>,
}

impl TermListModerator {
    pub fn new(terms: &[&str]) -> Self {
        Self {
            terms: terms.iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl Moderator for TermListModerator {
    async fn moderate(&self, text: &str, _author_id: &UserId) -> Verdict {
        let lowered = text.to_lowercase();

        match self.terms.iter().find(|term| lowered.contains(*term)) {
            Some(term) => Verdict::Blocked(format!("contains disallowed term \"{}\"", term)),
            None => Verdict::Allowed,
        }
    }
}

/// A fixed per-viewer block list.
#[derive(Default)]
pub struct StaticBlockList {
    blocked: HashSet<UserId>,
}

impl StaticBlockList {
    pub fn blocking(user_ids: &[&str]) -> Self {
        Self {
            blocked: user_ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

impl BlockList for StaticBlockList {
    fn is_blocked(&self, author_id: &UserId) -> bool {
        self.blocked.contains(author_id)
    }
}

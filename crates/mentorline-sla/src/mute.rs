use std::collections::BTreeSet;
use std::sync::Arc;

use mentorline_store::{ConversationReader, StoreResult};
use mentorline_types::canonical_pair_key;

/// Union of every mute source for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveMuteSet {
    muted_by: BTreeSet<String>,
    mentor_id: String,
    learner_id: String,
}

impl EffectiveMuteSet {
    pub fn is_muted(&self, party_id: &str) -> bool {
        self.muted_by.contains(party_id)
    }

    pub fn mentor_muted(&self) -> bool {
        self.is_muted(&self.mentor_id)
    }

    pub fn learner_muted(&self) -> bool {
        self.is_muted(&self.learner_id)
    }

    pub fn either_muted(&self) -> bool {
        self.mentor_muted() || self.learner_muted()
    }
}

/// Single place where conversation mute state is decided.
///
/// Merges the list embedded in the conversation record with the standalone
/// record keyed by the canonical participant pair.
#[derive(Clone)]
pub struct MutePolicyResolver {
    reader: Arc<dyn ConversationReader>,
}

impl MutePolicyResolver {
    pub fn new(reader: Arc<dyn ConversationReader>) -> Self {
        Self { reader }
    }

    /// Returns `None` when the conversation record does not exist.
    pub async fn resolve(
        &self,
        conversation_id: &str,
        mentor_id: &str,
        learner_id: &str,
    ) -> StoreResult<Option<EffectiveMuteSet>> {
        let Some(conversation) = self.reader.get_conversation(conversation_id).await? else {
            return Ok(None);
        };
        let pair_key = canonical_pair_key(mentor_id, learner_id);
        let pair_record = self.reader.get_pair_mute(&pair_key).await?;

        let muted_by = conversation
            .muted_by
            .into_iter()
            .chain(pair_record.into_iter().flat_map(|record| record.muted_by))
            .map(|party_id| party_id.trim().to_string())
            .filter(|party_id| !party_id.is_empty())
            .collect();

        Ok(Some(EffectiveMuteSet {
            muted_by,
            mentor_id: mentor_id.to_string(),
            learner_id: learner_id.to_string(),
        }))
    }
}

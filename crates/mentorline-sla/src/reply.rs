use std::sync::Arc;

use chrono::{DateTime, Utc};
use mentorline_store::{ConversationReader, StoreResult};

/// Answers whether a mentor has replied after a given instant.
#[derive(Clone)]
pub struct ReplyDetector {
    reader: Arc<dyn ConversationReader>,
}

impl ReplyDetector {
    pub fn new(reader: Arc<dyn ConversationReader>) -> Self {
        Self { reader }
    }

    /// Strictly later than `after`; a message at the same instant is not a
    /// reply.
    pub async fn mentor_replied_after(
        &self,
        conversation_id: &str,
        mentor_id: &str,
        after: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.reader
            .mentor_message_exists_after(conversation_id, mentor_id, after)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::ReplyDetector;
    use chrono::{Duration, TimeZone, Utc};
    use mentorline_store::{DocumentWriter, InMemoryMentorshipStore};
    use mentorline_types::Message;
    use std::sync::Arc;

    #[tokio::test]
    async fn detects_only_strictly_later_mentor_messages() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let store = Arc::new(InMemoryMentorshipStore::new());
        store
            .insert_message(Message::from_learner("c-1", "m-1", "l-1", "t-1", t0))
            .await
            .expect("insert learner message");
        store
            .insert_message(Message::from_mentor("c-1", "m-2", "t-1", "l-1", t0))
            .await
            .expect("insert tied mentor message");
        store
            .insert_message(Message::from_mentor(
                "c-2",
                "m-3",
                "t-1",
                "l-1",
                t0 + Duration::hours(1),
            ))
            .await
            .expect("insert other conversation");
        let detector = ReplyDetector::new(store.clone());

        assert!(!detector
            .mentor_replied_after("c-1", "t-1", t0)
            .await
            .expect("reply check"));

        store
            .insert_message(Message::from_mentor(
                "c-1",
                "m-4",
                "t-1",
                "l-1",
                t0 + Duration::hours(2),
            ))
            .await
            .expect("insert reply");
        assert!(detector
            .mentor_replied_after("c-1", "t-1", t0)
            .await
            .expect("reply check"));
        assert!(!detector
            .mentor_replied_after("c-1", "t-other", t0)
            .await
            .expect("reply check other mentor"));
    }
}

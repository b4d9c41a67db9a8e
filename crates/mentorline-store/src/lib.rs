//! Document-store abstractions and in-memory backend for mentorline.
//!
//! The store is split by capability: `ConversationReader` covers every query
//! the notification paths need, `BreachLedgerStore` holds the only SLA state
//! mutations, `DocumentWriter` creates records and `AccountDirectory` backs
//! the administrative path. `MentorshipStore` is the union implemented by
//! each backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use mentorline_types::{
    AccountRecord, BreachQuery, BreachRecord, Conversation, Enrollment, Message, PairMuteRecord,
    PartyKind, PartyProfile, SenderRole, SubjectRef,
};
pub use sqlite::SqliteMentorshipStore;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message '{conversation_id}/{message_id}' already exists")]
    MessageAlreadyExists {
        conversation_id: String,
        message_id: String,
    },
    #[error("account '{0}' not found")]
    AccountNotFound(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of the conditional `sla_handled` false -> true update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagUpdate {
    /// This call moved the flag from false to true.
    Applied,
    /// The flag was already true; nothing changed.
    AlreadySet,
    /// No such message.
    NotFound,
}

/// Read-only queries used by the sweep and the realtime paths.
#[async_trait]
pub trait ConversationReader: Send + Sync {
    /// Learner messages with `sla_handled = false` and `timestamp <= cutoff`,
    /// oldest first, at most `limit` rows, across all conversations.
    async fn query_sla_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Message>>;

    /// Existence check: has `mentor_id` sent a message in the conversation
    /// with a timestamp strictly after `after`.
    async fn mentor_message_exists_after(
        &self,
        conversation_id: &str,
        mentor_id: &str,
        after: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn get_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<Option<Message>>;
    async fn get_conversation(&self, conversation_id: &str) -> StoreResult<Option<Conversation>>;
    async fn get_pair_mute(&self, pair_key: &str) -> StoreResult<Option<PairMuteRecord>>;
    async fn get_profile(
        &self,
        kind: PartyKind,
        party_id: &str,
    ) -> StoreResult<Option<PartyProfile>>;

    async fn get_subject_name(&self, subject: &SubjectRef) -> StoreResult<Option<String>>;
    async fn get_section_name(
        &self,
        subject: &SubjectRef,
        section_id: &str,
    ) -> StoreResult<Option<String>>;
    /// Learner ids enrolled in the section, in stable order.
    async fn query_enrolled_learners(
        &self,
        subject_id: &str,
        section_id: &str,
    ) -> StoreResult<Vec<String>>;
}

/// SLA state mutations: the conditional flag and the append-only ledger.
#[async_trait]
pub trait BreachLedgerStore: Send + Sync {
    /// Sets `sla_handled` only if it is currently false.
    async fn mark_sla_handled(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<FlagUpdate>;

    /// Creates the record unless one with the same `breach_id` exists.
    /// Returns whether a new record was written.
    async fn append_breach_record(&self, record: BreachRecord) -> StoreResult<bool>;

    /// Newest detections first.
    async fn query_breach_records(&self, query: BreachQuery) -> StoreResult<Vec<BreachRecord>>;
}

/// Record creation for ingestion, fixtures and local tooling.
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    async fn insert_message(&self, message: Message) -> StoreResult<()>;
    async fn put_conversation(&self, conversation: Conversation) -> StoreResult<()>;
    async fn put_pair_mute(&self, record: PairMuteRecord) -> StoreResult<()>;
    async fn put_profile(&self, kind: PartyKind, profile: PartyProfile) -> StoreResult<()>;
    async fn put_subject(&self, subject: SubjectRef, name: String) -> StoreResult<()>;
    async fn put_section(
        &self,
        subject: SubjectRef,
        section_id: String,
        name: String,
    ) -> StoreResult<()>;
    async fn add_enrollment(&self, enrollment: Enrollment) -> StoreResult<()>;
}

/// Identity directory behind the administrative path.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_account(&self, uid: &str) -> StoreResult<Option<AccountRecord>>;
    async fn put_account(&self, account: AccountRecord) -> StoreResult<()>;
    /// Fails with `AccountNotFound` when the account does not exist.
    async fn set_account_disabled(&self, uid: &str, disabled: bool)
        -> StoreResult<AccountRecord>;
    /// Creates the account when missing.
    async fn set_admin_claim(&self, uid: &str, admin: bool) -> StoreResult<AccountRecord>;
}

/// Full store contract implemented by each backend.
pub trait MentorshipStore:
    ConversationReader + BreachLedgerStore + DocumentWriter + AccountDirectory
{
}

impl<T> MentorshipStore for T where
    T: ConversationReader + BreachLedgerStore + DocumentWriter + AccountDirectory
{
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryMentorshipStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    messages: BTreeMap<(String, String), Message>,
    conversations: HashMap<String, Conversation>,
    pair_mutes: HashMap<String, PairMuteRecord>,
    profiles: HashMap<(PartyKind, String), PartyProfile>,
    breaches: Vec<BreachRecord>,
    subjects: HashMap<SubjectRef, String>,
    sections: HashMap<(SubjectRef, String), String>,
    enrollments: BTreeSet<(String, String, String)>,
    accounts: HashMap<String, AccountRecord>,
}

impl InMemoryMentorshipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationReader for InMemoryMentorshipStore {
    async fn query_sla_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<Message> = inner
            .messages
            .values()
            .filter(|message| message.sender_role == SenderRole::Learner)
            .filter(|message| !message.sla_handled)
            .filter(|message| message.timestamp.is_some_and(|sent| sent <= cutoff))
            .cloned()
            .collect();
        candidates.sort_by(|left, right| {
            left.timestamp
                .cmp(&right.timestamp)
                .then_with(|| left.conversation_id.cmp(&right.conversation_id))
                .then_with(|| left.message_id.cmp(&right.message_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn mentor_message_exists_after(
        &self,
        conversation_id: &str,
        mentor_id: &str,
        after: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .filter(|((message_conversation_id, _), _)| message_conversation_id == conversation_id)
            .any(|(_, message)| {
                message.sender_id == mentor_id
                    && message.timestamp.is_some_and(|sent| sent > after)
            }))
    }

    async fn get_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<Option<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(&(conversation_id.to_string(), message_id.to_string()))
            .cloned())
    }

    async fn get_conversation(&self, conversation_id: &str) -> StoreResult<Option<Conversation>> {
        let inner = self.inner.read().await;
        Ok(inner.conversations.get(conversation_id).cloned())
    }

    async fn get_pair_mute(&self, pair_key: &str) -> StoreResult<Option<PairMuteRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.pair_mutes.get(pair_key).cloned())
    }

    async fn get_profile(
        &self,
        kind: PartyKind,
        party_id: &str,
    ) -> StoreResult<Option<PartyProfile>> {
        let inner = self.inner.read().await;
        Ok(inner.profiles.get(&(kind, party_id.to_string())).cloned())
    }

    async fn get_subject_name(&self, subject: &SubjectRef) -> StoreResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.subjects.get(subject).cloned())
    }

    async fn get_section_name(
        &self,
        subject: &SubjectRef,
        section_id: &str,
    ) -> StoreResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sections
            .get(&(subject.clone(), section_id.to_string()))
            .cloned())
    }

    async fn query_enrolled_learners(
        &self,
        subject_id: &str,
        section_id: &str,
    ) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .enrollments
            .iter()
            .filter(|(subject, section, _)| subject == subject_id && section == section_id)
            .map(|(_, _, learner_id)| learner_id.clone())
            .collect())
    }
}

#[async_trait]
impl BreachLedgerStore for InMemoryMentorshipStore {
    async fn mark_sla_handled(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<FlagUpdate> {
        let mut inner = self.inner.write().await;
        let Some(message) = inner
            .messages
            .get_mut(&(conversation_id.to_string(), message_id.to_string()))
        else {
            return Ok(FlagUpdate::NotFound);
        };
        if message.sla_handled {
            return Ok(FlagUpdate::AlreadySet);
        }
        message.sla_handled = true;
        Ok(FlagUpdate::Applied)
    }

    async fn append_breach_record(&self, record: BreachRecord) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner
            .breaches
            .iter()
            .any(|existing| existing.breach_id == record.breach_id)
        {
            return Ok(false);
        }
        inner.breaches.push(record);
        Ok(true)
    }

    async fn query_breach_records(&self, query: BreachQuery) -> StoreResult<Vec<BreachRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<BreachRecord> = inner
            .breaches
            .iter()
            .filter(|record| {
                query
                    .conversation_id
                    .as_ref()
                    .is_none_or(|id| id == &record.conversation_id)
            })
            .filter(|record| {
                query
                    .mentor_id
                    .as_ref()
                    .is_none_or(|id| id == &record.mentor_id)
            })
            .cloned()
            .collect();
        records.sort_by(|left, right| {
            right
                .detected_at
                .cmp(&left.detected_at)
                .then_with(|| left.breach_id.cmp(&right.breach_id))
        });
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

#[async_trait]
impl DocumentWriter for InMemoryMentorshipStore {
    async fn insert_message(&self, message: Message) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = (message.conversation_id.clone(), message.message_id.clone());
        if inner.messages.contains_key(&key) {
            return Err(StoreError::MessageAlreadyExists {
                conversation_id: key.0,
                message_id: key.1,
            });
        }
        inner.messages.insert(key, message);
        Ok(())
    }

    async fn put_conversation(&self, conversation: Conversation) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .conversations
            .insert(conversation.conversation_id.clone(), conversation);
        Ok(())
    }

    async fn put_pair_mute(&self, record: PairMuteRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.pair_mutes.insert(record.pair_key.clone(), record);
        Ok(())
    }

    async fn put_profile(&self, kind: PartyKind, profile: PartyProfile) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .profiles
            .insert((kind, profile.party_id.clone()), profile);
        Ok(())
    }

    async fn put_subject(&self, subject: SubjectRef, name: String) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.subjects.insert(subject, name);
        Ok(())
    }

    async fn put_section(
        &self,
        subject: SubjectRef,
        section_id: String,
        name: String,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.sections.insert((subject, section_id), name);
        Ok(())
    }

    async fn add_enrollment(&self, enrollment: Enrollment) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.enrollments.insert((
            enrollment.subject_id,
            enrollment.section_id,
            enrollment.learner_id,
        ));
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for InMemoryMentorshipStore {
    async fn get_account(&self, uid: &str) -> StoreResult<Option<AccountRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.get(uid).cloned())
    }

    async fn put_account(&self, account: AccountRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.accounts.insert(account.uid.clone(), account);
        Ok(())
    }

    async fn set_account_disabled(
        &self,
        uid: &str,
        disabled: bool,
    ) -> StoreResult<AccountRecord> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(uid)
            .ok_or_else(|| StoreError::AccountNotFound(uid.to_string()))?;
        account.disabled = disabled;
        Ok(account.clone())
    }

    async fn set_admin_claim(&self, uid: &str, admin: bool) -> StoreResult<AccountRecord> {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .entry(uid.to_string())
            .or_insert_with(|| AccountRecord::new(uid));
        account.admin = admin;
        Ok(account.clone())
    }
}

//! SQLite-backed `MentorshipStore` implementation with durable persistence.

use crate::{
    AccountDirectory, AccountRecord, BreachLedgerStore, BreachQuery, BreachRecord, Conversation,
    ConversationReader, DocumentWriter, Enrollment, FlagUpdate, Message, PairMuteRecord,
    PartyKind, PartyProfile, SenderRole, StoreError, StoreResult, SubjectRef,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mentorline_types::AddressField;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MESSAGE_COLUMNS: &str = "conversation_id, message_id, sender_id, sender_role, mentor_id, \
     learner_id, timestamp_ms, text, sla_handled";

const BREACH_COLUMNS: &str = "breach_id, conversation_id, message_id, mentor_id, learner_id, \
     message_text, message_timestamp_ms, detected_at_ms";

/// Persistent SQLite store backend.
///
/// Timestamps are stored as Unix milliseconds so candidate and reply
/// predicates compare numerically.
#[derive(Debug)]
pub struct SqliteMentorshipStore {
    db_path: PathBuf,
}

impl SqliteMentorshipStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                sender_role TEXT NOT NULL,
                mentor_id TEXT NULL,
                learner_id TEXT NULL,
                timestamp_ms INTEGER NULL,
                text TEXT NULL,
                sla_handled INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (conversation_id, message_id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_sla_candidates
                ON messages (sender_role, sla_handled, timestamp_ms);

            CREATE INDEX IF NOT EXISTS idx_messages_sender_time
                ON messages (conversation_id, sender_id, timestamp_ms);

            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                mentor_id TEXT NOT NULL,
                learner_id TEXT NOT NULL,
                muted_by_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pair_mutes (
                pair_key TEXT PRIMARY KEY,
                muted_by_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS profiles (
                kind TEXT NOT NULL,
                party_id TEXT NOT NULL,
                name TEXT NULL,
                fcm_token TEXT NULL,
                fcm_tokens_json TEXT NULL,
                PRIMARY KEY (kind, party_id)
            );

            CREATE TABLE IF NOT EXISTS breach_records (
                breach_id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                mentor_id TEXT NOT NULL,
                learner_id TEXT NOT NULL,
                message_text TEXT NULL,
                message_timestamp_ms INTEGER NOT NULL,
                detected_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_breach_records_detected
                ON breach_records (detected_at_ms);

            CREATE TABLE IF NOT EXISTS subjects (
                school_id TEXT NOT NULL,
                programme_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (school_id, programme_id, subject_id)
            );

            CREATE TABLE IF NOT EXISTS sections (
                school_id TEXT NOT NULL,
                programme_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                section_id TEXT NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (school_id, programme_id, subject_id, section_id)
            );

            CREATE TABLE IF NOT EXISTS enrollments (
                subject_id TEXT NOT NULL,
                section_id TEXT NOT NULL,
                learner_id TEXT NOT NULL,
                PRIMARY KEY (subject_id, section_id, learner_id)
            );

            CREATE TABLE IF NOT EXISTS accounts (
                uid TEXT PRIMARY KEY,
                disabled INTEGER NOT NULL,
                admin INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl ConversationReader for SqliteMentorshipStore {
    async fn query_sla_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Message>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE sender_role = ?1 AND sla_handled = 0 AND timestamp_ms IS NOT NULL
                AND timestamp_ms <= ?2
            ORDER BY timestamp_ms, conversation_id, message_id
            LIMIT ?3
            "#
        ))?;
        let rows = statement
            .query_map(
                params![
                    sender_role_to_db(SenderRole::Learner),
                    timestamp_to_db(cutoff),
                    usize_to_i64(limit),
                ],
                message_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn mentor_message_exists_after(
        &self,
        conversation_id: &str,
        mentor_id: &str,
        after: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let found = connection
            .query_row(
                r#"
                SELECT 1 FROM messages
                WHERE conversation_id = ?1 AND sender_id = ?2 AND timestamp_ms > ?3
                LIMIT 1
                "#,
                params![conversation_id, mentor_id, timestamp_to_db(after)],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn get_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<Option<Message>> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = ?1 AND message_id = ?2"
                ),
                params![conversation_id, message_id],
                message_row,
            )
            .optional()?
            .map(message_from_row)
            .transpose()
    }

    async fn get_conversation(&self, conversation_id: &str) -> StoreResult<Option<Conversation>> {
        let connection = self.open_connection()?;
        let row: Option<(String, String, String, String)> = connection
            .query_row(
                r#"
                SELECT conversation_id, mentor_id, learner_id, muted_by_json
                FROM conversations
                WHERE conversation_id = ?1
                "#,
                params![conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        row.map(
            |(conversation_id, mentor_id, learner_id, muted_by_json)| -> StoreResult<Conversation> {
                Ok(Conversation {
                    conversation_id,
                    mentor_id,
                    learner_id,
                    muted_by: deserialize_json(&muted_by_json)?,
                })
            },
        )
        .transpose()
    }

    async fn get_pair_mute(&self, pair_key: &str) -> StoreResult<Option<PairMuteRecord>> {
        let connection = self.open_connection()?;
        let row: Option<(String, String)> = connection
            .query_row(
                "SELECT pair_key, muted_by_json FROM pair_mutes WHERE pair_key = ?1",
                params![pair_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(pair_key, muted_by_json)| -> StoreResult<PairMuteRecord> {
            Ok(PairMuteRecord {
                pair_key,
                muted_by: deserialize_json(&muted_by_json)?,
            })
        })
        .transpose()
    }

    async fn get_profile(
        &self,
        kind: PartyKind,
        party_id: &str,
    ) -> StoreResult<Option<PartyProfile>> {
        let connection = self.open_connection()?;
        let row: Option<(String, Option<String>, Option<String>, Option<String>)> = connection
            .query_row(
                r#"
                SELECT party_id, name, fcm_token, fcm_tokens_json
                FROM profiles
                WHERE kind = ?1 AND party_id = ?2
                "#,
                params![party_kind_to_db(kind), party_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        row.map(
            |(party_id, name, fcm_token, fcm_tokens_json)| -> StoreResult<PartyProfile> {
                Ok(PartyProfile {
                    party_id,
                    name,
                    fcm_token,
                    fcm_tokens: fcm_tokens_json
                        .as_deref()
                        .map(deserialize_json::<AddressField>)
                        .transpose()?,
                })
            },
        )
        .transpose()
    }

    async fn get_subject_name(&self, subject: &SubjectRef) -> StoreResult<Option<String>> {
        let connection = self.open_connection()?;
        Ok(connection
            .query_row(
                r#"
                SELECT name FROM subjects
                WHERE school_id = ?1 AND programme_id = ?2 AND subject_id = ?3
                "#,
                params![subject.school_id, subject.programme_id, subject.subject_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn get_section_name(
        &self,
        subject: &SubjectRef,
        section_id: &str,
    ) -> StoreResult<Option<String>> {
        let connection = self.open_connection()?;
        Ok(connection
            .query_row(
                r#"
                SELECT name FROM sections
                WHERE school_id = ?1 AND programme_id = ?2 AND subject_id = ?3
                    AND section_id = ?4
                "#,
                params![
                    subject.school_id,
                    subject.programme_id,
                    subject.subject_id,
                    section_id
                ],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn query_enrolled_learners(
        &self,
        subject_id: &str,
        section_id: &str,
    ) -> StoreResult<Vec<String>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT learner_id FROM enrollments
            WHERE subject_id = ?1 AND section_id = ?2
            ORDER BY learner_id
            "#,
        )?;
        let learners = statement
            .query_map(params![subject_id, section_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(learners)
    }
}

#[async_trait]
impl BreachLedgerStore for SqliteMentorshipStore {
    async fn mark_sla_handled(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<FlagUpdate> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let changed = transaction.execute(
            r#"
            UPDATE messages SET sla_handled = 1
            WHERE conversation_id = ?1 AND message_id = ?2 AND sla_handled = 0
            "#,
            params![conversation_id, message_id],
        )?;
        let outcome = if changed == 1 {
            FlagUpdate::Applied
        } else {
            let exists = transaction
                .query_row(
                    "SELECT 1 FROM messages WHERE conversation_id = ?1 AND message_id = ?2",
                    params![conversation_id, message_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            if exists.is_some() {
                FlagUpdate::AlreadySet
            } else {
                FlagUpdate::NotFound
            }
        };
        transaction.commit()?;
        Ok(outcome)
    }

    async fn append_breach_record(&self, record: BreachRecord) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let inserted = connection.execute(
            &format!(
                "INSERT OR IGNORE INTO breach_records ({BREACH_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                record.breach_id,
                record.conversation_id,
                record.message_id,
                record.mentor_id,
                record.learner_id,
                record.message_text,
                timestamp_to_db(record.message_timestamp),
                timestamp_to_db(record.detected_at),
            ],
        )?;
        Ok(inserted == 1)
    }

    async fn query_breach_records(&self, query: BreachQuery) -> StoreResult<Vec<BreachRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            r#"
            SELECT {BREACH_COLUMNS}
            FROM breach_records
            WHERE (?1 IS NULL OR conversation_id = ?1) AND (?2 IS NULL OR mentor_id = ?2)
            ORDER BY detected_at_ms DESC, breach_id
            LIMIT ?3
            "#
        ))?;
        let limit = query.limit.map(usize_to_i64).unwrap_or(-1);
        let rows = statement
            .query_map(
                params![query.conversation_id, query.mentor_id, limit],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(
                    breach_id,
                    conversation_id,
                    message_id,
                    mentor_id,
                    learner_id,
                    message_text,
                    message_timestamp_ms,
                    detected_at_ms,
                )|
                 -> StoreResult<BreachRecord> {
                    Ok(BreachRecord {
                        breach_id,
                        conversation_id,
                        message_id,
                        mentor_id,
                        learner_id,
                        message_text,
                        message_timestamp: timestamp_from_db(
                            "message_timestamp_ms",
                            message_timestamp_ms,
                        )?,
                        detected_at: timestamp_from_db("detected_at_ms", detected_at_ms)?,
                    })
                },
            )
            .collect()
    }
}

#[async_trait]
impl DocumentWriter for SqliteMentorshipStore {
    async fn insert_message(&self, message: Message) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let inserted = connection.execute(
            &format!(
                "INSERT OR IGNORE INTO messages ({MESSAGE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                message.conversation_id,
                message.message_id,
                message.sender_id,
                sender_role_to_db(message.sender_role),
                message.mentor_id,
                message.learner_id,
                message.timestamp.map(timestamp_to_db),
                message.text,
                message.sla_handled,
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::MessageAlreadyExists {
                conversation_id: message.conversation_id,
                message_id: message.message_id,
            });
        }
        Ok(())
    }

    async fn put_conversation(&self, conversation: Conversation) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO conversations (conversation_id, mentor_id, learner_id, muted_by_json)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(conversation_id) DO UPDATE SET
                mentor_id = excluded.mentor_id,
                learner_id = excluded.learner_id,
                muted_by_json = excluded.muted_by_json
            "#,
            params![
                conversation.conversation_id,
                conversation.mentor_id,
                conversation.learner_id,
                serialize_json(&conversation.muted_by)?,
            ],
        )?;
        Ok(())
    }

    async fn put_pair_mute(&self, record: PairMuteRecord) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO pair_mutes (pair_key, muted_by_json) VALUES (?1, ?2)
            ON CONFLICT(pair_key) DO UPDATE SET muted_by_json = excluded.muted_by_json
            "#,
            params![record.pair_key, serialize_json(&record.muted_by)?],
        )?;
        Ok(())
    }

    async fn put_profile(&self, kind: PartyKind, profile: PartyProfile) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let fcm_tokens_json = profile
            .fcm_tokens
            .as_ref()
            .map(serialize_json)
            .transpose()?;
        connection.execute(
            r#"
            INSERT INTO profiles (kind, party_id, name, fcm_token, fcm_tokens_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(kind, party_id) DO UPDATE SET
                name = excluded.name,
                fcm_token = excluded.fcm_token,
                fcm_tokens_json = excluded.fcm_tokens_json
            "#,
            params![
                party_kind_to_db(kind),
                profile.party_id,
                profile.name,
                profile.fcm_token,
                fcm_tokens_json,
            ],
        )?;
        Ok(())
    }

    async fn put_subject(&self, subject: SubjectRef, name: String) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO subjects (school_id, programme_id, subject_id, name)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(school_id, programme_id, subject_id) DO UPDATE SET name = excluded.name
            "#,
            params![
                subject.school_id,
                subject.programme_id,
                subject.subject_id,
                name
            ],
        )?;
        Ok(())
    }

    async fn put_section(
        &self,
        subject: SubjectRef,
        section_id: String,
        name: String,
    ) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO sections (school_id, programme_id, subject_id, section_id, name)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(school_id, programme_id, subject_id, section_id)
                DO UPDATE SET name = excluded.name
            "#,
            params![
                subject.school_id,
                subject.programme_id,
                subject.subject_id,
                section_id,
                name
            ],
        )?;
        Ok(())
    }

    async fn add_enrollment(&self, enrollment: Enrollment) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT OR IGNORE INTO enrollments (subject_id, section_id, learner_id)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                enrollment.subject_id,
                enrollment.section_id,
                enrollment.learner_id
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for SqliteMentorshipStore {
    async fn get_account(&self, uid: &str) -> StoreResult<Option<AccountRecord>> {
        let connection = self.open_connection()?;
        Ok(connection
            .query_row(
                "SELECT uid, disabled, admin FROM accounts WHERE uid = ?1",
                params![uid],
                account_row,
            )
            .optional()?)
    }

    async fn put_account(&self, account: AccountRecord) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO accounts (uid, disabled, admin) VALUES (?1, ?2, ?3)
            ON CONFLICT(uid) DO UPDATE SET disabled = excluded.disabled, admin = excluded.admin
            "#,
            params![account.uid, account.disabled, account.admin],
        )?;
        Ok(())
    }

    async fn set_account_disabled(
        &self,
        uid: &str,
        disabled: bool,
    ) -> StoreResult<AccountRecord> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let changed = transaction.execute(
            "UPDATE accounts SET disabled = ?1 WHERE uid = ?2",
            params![disabled, uid],
        )?;
        if changed == 0 {
            return Err(StoreError::AccountNotFound(uid.to_string()));
        }
        let account = transaction.query_row(
            "SELECT uid, disabled, admin FROM accounts WHERE uid = ?1",
            params![uid],
            account_row,
        )?;
        transaction.commit()?;
        Ok(account)
    }

    async fn set_admin_claim(&self, uid: &str, admin: bool) -> StoreResult<AccountRecord> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        transaction.execute(
            r#"
            INSERT INTO accounts (uid, disabled, admin) VALUES (?1, 0, ?2)
            ON CONFLICT(uid) DO UPDATE SET admin = excluded.admin
            "#,
            params![uid, admin],
        )?;
        let account = transaction.query_row(
            "SELECT uid, disabled, admin FROM accounts WHERE uid = ?1",
            params![uid],
            account_row,
        )?;
        transaction.commit()?;
        Ok(account)
    }
}

type MessageRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<String>,
    bool,
);

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn message_from_row(
    (
        conversation_id,
        message_id,
        sender_id,
        sender_role,
        mentor_id,
        learner_id,
        timestamp_ms,
        text,
        sla_handled,
    ): MessageRow,
) -> StoreResult<Message> {
    Ok(Message {
        message_id,
        conversation_id,
        sender_id,
        sender_role: sender_role_from_db(&sender_role)?,
        mentor_id,
        learner_id,
        timestamp: timestamp_ms
            .map(|value| timestamp_from_db("timestamp_ms", value))
            .transpose()?,
        text,
        sla_handled,
    })
}

fn account_row(row: &Row<'_>) -> rusqlite::Result<AccountRecord> {
    Ok(AccountRecord {
        uid: row.get(0)?,
        disabled: row.get(1)?,
        admin: row.get(2)?,
    })
}

fn serialize_json<T: Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(StoreError::from)
}

fn deserialize_json<T: DeserializeOwned>(value: &str) -> StoreResult<T> {
    serde_json::from_str(value).map_err(StoreError::from)
}

fn timestamp_to_db(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

fn timestamp_from_db(field: &'static str, value: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn sender_role_to_db(role: SenderRole) -> &'static str {
    role.as_str()
}

fn sender_role_from_db(value: &str) -> StoreResult<SenderRole> {
    match value {
        "learner" | "student" => Ok(SenderRole::Learner),
        "mentor" => Ok(SenderRole::Mentor),
        _ => Err(StoreError::InvalidPersistedValue {
            field: "sender_role",
            value: value.to_string(),
        }),
    }
}

fn party_kind_to_db(kind: PartyKind) -> &'static str {
    kind.as_str()
}

fn usize_to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

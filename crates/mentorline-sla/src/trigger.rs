//! Realtime handler for newly created messages.
//!
//! Advisory only: it sends notifications but holds no write access to the
//! store, so replayed creation events can at most repeat a notification.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mentorline_store::ConversationReader;
use mentorline_types::{Message, PartyKind, SenderRole, SlaCountdown};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::notifications::{mentor_reply_for_learner, new_message_for_mentor};
use crate::{
    resolve_delivery_addresses, ConversationParties, MutePolicyResolver, NotificationDispatcher,
    ReplyDetector, SlaError, SlaResult,
};

/// Creation-trigger input: the new message and where it was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreatedEvent {
    pub conversation_id: String,
    pub message_id: String,
    pub message: Message,
}

#[derive(Deserialize)]
struct RawMessageCreatedEvent {
    conversation_id: String,
    message_id: String,
    message: Map<String, Value>,
}

/// Parses a creation-trigger payload.
///
/// The event's identifiers are authoritative and overwrite any identifiers
/// inside the message record, which may omit them.
pub fn parse_message_created_event(raw: &str) -> SlaResult<MessageCreatedEvent> {
    let raw_event: RawMessageCreatedEvent = serde_json::from_str(raw)
        .map_err(|error| SlaError::InvalidPayload(format!("message-created event: {error}")))?;
    build_message_created_event(raw_event)
}

fn build_message_created_event(raw_event: RawMessageCreatedEvent) -> SlaResult<MessageCreatedEvent> {
    let conversation_id = raw_event.conversation_id.trim().to_string();
    let message_id = raw_event.message_id.trim().to_string();
    if conversation_id.is_empty() || message_id.is_empty() {
        return Err(SlaError::InvalidPayload(
            "conversation_id and message_id must be non-empty".to_string(),
        ));
    }

    let mut record = raw_event.message;
    record.insert(
        "conversation_id".to_string(),
        Value::String(conversation_id.clone()),
    );
    record.insert("message_id".to_string(), Value::String(message_id.clone()));
    let message: Message = serde_json::from_value(Value::Object(record))
        .map_err(|error| SlaError::InvalidPayload(format!("message record: {error}")))?;

    Ok(MessageCreatedEvent {
        conversation_id,
        message_id,
        message,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSkipReason {
    MalformedMessage,
    AlreadyReplied,
    Muted,
    ConversationMissing,
    ProfileMissing,
    NoAddresses,
}

impl TriggerSkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedMessage => "malformed_message",
            Self::AlreadyReplied => "already_replied",
            Self::Muted => "muted",
            Self::ConversationMissing => "conversation_missing",
            Self::ProfileMissing => "profile_missing",
            Self::NoAddresses => "no_addresses",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Notified {
        recipient: PartyKind,
        delivered: usize,
        failed: usize,
    },
    Skipped {
        reason: TriggerSkipReason,
    },
}

impl TriggerOutcome {
    fn skipped(reason: TriggerSkipReason) -> Self {
        tracing::debug!(reason = reason.as_str(), "message trigger skipped");
        Self::Skipped { reason }
    }
}

/// Fast path run once per created message.
#[derive(Clone)]
pub struct RealtimeTriggerHandler {
    reader: Arc<dyn ConversationReader>,
    replies: ReplyDetector,
    mutes: MutePolicyResolver,
    dispatcher: NotificationDispatcher,
    window: chrono::Duration,
}

impl RealtimeTriggerHandler {
    pub fn new(
        reader: Arc<dyn ConversationReader>,
        dispatcher: NotificationDispatcher,
        window: chrono::Duration,
    ) -> Self {
        Self {
            replies: ReplyDetector::new(reader.clone()),
            mutes: MutePolicyResolver::new(reader.clone()),
            reader,
            dispatcher,
            window,
        }
    }

    #[tracing::instrument(
        name = "message_created",
        skip_all,
        fields(
            conversation_id = %event.conversation_id,
            message_id = %event.message_id,
            sender_role = event.message.sender_role.as_str(),
        )
    )]
    pub async fn handle_message_created(
        &self,
        event: &MessageCreatedEvent,
        now: DateTime<Utc>,
    ) -> SlaResult<TriggerOutcome> {
        match event.message.sender_role {
            SenderRole::Learner => self.notify_mentor_of_learner_message(event, now).await,
            SenderRole::Mentor => self.notify_learner_of_mentor_reply(event).await,
        }
    }

    async fn notify_mentor_of_learner_message(
        &self,
        event: &MessageCreatedEvent,
        now: DateTime<Utc>,
    ) -> SlaResult<TriggerOutcome> {
        let Some(fields) = event.message.sla_fields() else {
            return Ok(TriggerOutcome::skipped(TriggerSkipReason::MalformedMessage));
        };
        if self
            .replies
            .mentor_replied_after(&event.conversation_id, fields.mentor_id, fields.timestamp)
            .await?
        {
            return Ok(TriggerOutcome::skipped(TriggerSkipReason::AlreadyReplied));
        }
        let Some(mutes) = self
            .mutes
            .resolve(&event.conversation_id, fields.mentor_id, fields.learner_id)
            .await?
        else {
            return Ok(TriggerOutcome::skipped(
                TriggerSkipReason::ConversationMissing,
            ));
        };
        if mutes.either_muted() {
            return Ok(TriggerOutcome::skipped(TriggerSkipReason::Muted));
        }

        let Some(mentor_profile) = self
            .reader
            .get_profile(PartyKind::Mentor, fields.mentor_id)
            .await?
        else {
            return Ok(TriggerOutcome::skipped(TriggerSkipReason::ProfileMissing));
        };
        let addresses = resolve_delivery_addresses(&mentor_profile);
        if addresses.is_empty() {
            return Ok(TriggerOutcome::skipped(TriggerSkipReason::NoAddresses));
        }
        let learner_profile = self
            .reader
            .get_profile(PartyKind::Learner, fields.learner_id)
            .await?;

        let parties = ConversationParties::new(
            &event.conversation_id,
            &event.message_id,
            fields.mentor_id,
            fields.learner_id,
            Some(&mentor_profile),
            learner_profile.as_ref(),
        );
        let countdown = SlaCountdown::remaining(fields.timestamp, self.window, now);
        let report = self
            .dispatcher
            .dispatch(&addresses, new_message_for_mentor(&parties, countdown))
            .await;
        tracing::info!(
            mentor_id = fields.mentor_id,
            countdown = %countdown,
            delivered = report.success_count,
            failed = report.failure_count,
            "mentor notified of new learner message"
        );
        Ok(TriggerOutcome::Notified {
            recipient: PartyKind::Mentor,
            delivered: report.success_count,
            failed: report.failure_count,
        })
    }

    async fn notify_learner_of_mentor_reply(
        &self,
        event: &MessageCreatedEvent,
    ) -> SlaResult<TriggerOutcome> {
        let message = &event.message;
        let (Some(mentor_id), Some(learner_id)) = (
            non_blank(message.mentor_id.as_deref()),
            non_blank(message.learner_id.as_deref()),
        ) else {
            return Ok(TriggerOutcome::skipped(TriggerSkipReason::MalformedMessage));
        };

        let Some(mutes) = self
            .mutes
            .resolve(&event.conversation_id, mentor_id, learner_id)
            .await?
        else {
            return Ok(TriggerOutcome::skipped(
                TriggerSkipReason::ConversationMissing,
            ));
        };
        if mutes.learner_muted() {
            return Ok(TriggerOutcome::skipped(TriggerSkipReason::Muted));
        }

        let Some(learner_profile) = self
            .reader
            .get_profile(PartyKind::Learner, learner_id)
            .await?
        else {
            return Ok(TriggerOutcome::skipped(TriggerSkipReason::ProfileMissing));
        };
        let addresses = resolve_delivery_addresses(&learner_profile);
        if addresses.is_empty() {
            return Ok(TriggerOutcome::skipped(TriggerSkipReason::NoAddresses));
        }
        let mentor_profile = self.reader.get_profile(PartyKind::Mentor, mentor_id).await?;

        let parties = ConversationParties::new(
            &event.conversation_id,
            &event.message_id,
            mentor_id,
            learner_id,
            mentor_profile.as_ref(),
            Some(&learner_profile),
        );
        let report = self
            .dispatcher
            .dispatch(&addresses, mentor_reply_for_learner(&parties))
            .await;
        tracing::info!(
            learner_id,
            delivered = report.success_count,
            failed = report.failure_count,
            "learner notified of mentor reply"
        );
        Ok(TriggerOutcome::Notified {
            recipient: PartyKind::Learner,
            delivered: report.success_count,
            failed: report.failure_count,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

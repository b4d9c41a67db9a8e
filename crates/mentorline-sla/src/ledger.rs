use std::sync::Arc;

use chrono::{DateTime, Utc};
use mentorline_store::{BreachLedgerStore, FlagUpdate};
use mentorline_types::{BreachRecord, Message};
use serde::Serialize;

use crate::{SlaError, SlaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    /// Flag moved to true and the audit record was appended.
    Recorded,
    /// Another run flagged the message first; no record appended.
    AlreadyHandled,
    MessageMissing,
}

/// Sole writer of SLA state: conditional flag first, then audit append.
#[derive(Clone)]
pub struct BreachLedgerWriter {
    ledger: Arc<dyn BreachLedgerStore>,
}

impl BreachLedgerWriter {
    pub fn new(ledger: Arc<dyn BreachLedgerStore>) -> Self {
        Self { ledger }
    }

    pub async fn record_breach(
        &self,
        message: &Message,
        detected_at: DateTime<Utc>,
    ) -> SlaResult<LedgerOutcome> {
        let record = BreachRecord::for_message(message, detected_at).ok_or_else(|| {
            SlaError::MalformedMessage {
                conversation_id: message.conversation_id.clone(),
                message_id: message.message_id.clone(),
            }
        })?;

        match self
            .ledger
            .mark_sla_handled(&message.conversation_id, &message.message_id)
            .await?
        {
            FlagUpdate::Applied => {}
            FlagUpdate::AlreadySet => return Ok(LedgerOutcome::AlreadyHandled),
            FlagUpdate::NotFound => return Ok(LedgerOutcome::MessageMissing),
        }

        let breach_id = record.breach_id.clone();
        if !self.ledger.append_breach_record(record).await? {
            tracing::warn!(breach_id = %breach_id, "breach record already present");
        }
        Ok(LedgerOutcome::Recorded)
    }
}

//! SLA breach detection and notification engine for mentoring conversations.
//!
//! Two entry points share one pipeline. [`SlaSweep`] periodically scans for
//! learner messages left unanswered past the SLA window and is the only
//! writer of SLA state. [`RealtimeTriggerHandler`] reacts to each created
//! message with an advisory notification and never mutates the store.
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use mentorline_push::RecordingPushTransport;
//! use mentorline_sla::{AppContext, SlaConfig};
//! use mentorline_store::{DocumentWriter, InMemoryMentorshipStore};
//! use mentorline_types::{Conversation, Message};
//!
//! let store = Arc::new(InMemoryMentorshipStore::new());
//! let sent_at = Utc::now() - Duration::hours(49);
//! store.put_conversation(Conversation::new("c-1", "t-1", "l-1")).await?;
//! store
//!     .insert_message(Message::from_learner("c-1", "m-1", "l-1", "t-1", sent_at))
//!     .await?;
//!
//! let context = AppContext::new(
//!     store,
//!     Arc::new(RecordingPushTransport::new()),
//!     SlaConfig::default(),
//! )?;
//! let report = context.sweep().run_once(Utc::now()).await?;
//! assert_eq!(report.breached, 1);
//! # Ok(())
//! # }
//! ```

mod admin;
mod announcements;
mod config;
mod context;
mod dispatch;
mod error;
mod ledger;
mod mute;
pub mod notifications;
mod reply;
mod sweep;
mod tokens;
mod trigger;

pub use admin::{AccountAdministration, AdminError, AdminResponse, SetAccountDisabledRequest};
pub use announcements::{
    parse_announcement_created_event, AnnouncementFanout, AnnouncementReport,
};
pub use config::{
    SlaConfig, SweepCadence, DEFAULT_PREVIEW_MAX_CHARS, DEFAULT_SWEEP_BATCH_LIMIT,
    DEFAULT_SWEEP_INTERVAL, MAX_SLA_WINDOW_HOURS,
};
pub use context::AppContext;
pub use dispatch::NotificationDispatcher;
pub use error::{SlaError, SlaResult};
pub use ledger::{BreachLedgerWriter, LedgerOutcome};
pub use mute::{EffectiveMuteSet, MutePolicyResolver};
pub use notifications::{truncate_preview, ConversationParties};
pub use reply::ReplyDetector;
pub use sweep::{CandidateOutcome, SlaSweep, SweepReport, SweepScheduler};
pub use tokens::{merge_delivery_addresses, resolve_delivery_addresses};
pub use trigger::{
    parse_message_created_event, MessageCreatedEvent, RealtimeTriggerHandler, TriggerOutcome,
    TriggerSkipReason,
};

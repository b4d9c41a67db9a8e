//! Shared data types for mentorline SLA monitoring.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Hours a mentor has to answer a learner message.
pub const DEFAULT_SLA_WINDOW_HOURS: i64 = 48;

/// Error returned when an SLA state transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusTransitionError {
    #[error("invalid {kind} transition: {from:?} -> {to:?}")]
    Invalid {
        kind: &'static str,
        from: String,
        to: String,
    },
}

/// Author role of a message within a mentoring conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    #[serde(alias = "student")]
    Learner,
    Mentor,
}

impl SenderRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Learner => "learner",
            Self::Mentor => "mentor",
        }
    }
}

/// Which profile collection a party lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    Mentor,
    #[serde(alias = "student")]
    Learner,
}

impl PartyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mentor => "mentor",
            Self::Learner => "learner",
        }
    }

    /// Display name used when a profile carries none.
    pub fn default_display_name(self) -> &'static str {
        match self {
            Self::Mentor => "Mentor",
            Self::Learner => "Learner",
        }
    }
}

/// Per-message SLA lifecycle.
///
/// `Replied` and `Notified` are terminal. A muted candidate is not a stored
/// state; it stays `Pending` and is re-evaluated on the next sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlaState {
    #[default]
    Pending,
    Replied,
    Notified,
}

impl SlaState {
    /// Returns true when this state can transition to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Self::Pending, Self::Replied) | (Self::Pending, Self::Notified)
        )
    }

    /// Returns an error if transitioning to `next` is not allowed.
    pub fn ensure_transition(self, next: Self) -> Result<(), StatusTransitionError> {
        if self.can_transition_to(next) {
            return Ok(());
        }

        Err(StatusTransitionError::Invalid {
            kind: "sla_state",
            from: format!("{self:?}"),
            to: format!("{next:?}"),
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Replied | Self::Notified)
    }
}

/// One message inside a mentoring conversation.
///
/// `mentor_id`, `learner_id` and `timestamp` are optional because stored
/// documents may be malformed; consumers skip such records instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    #[serde(default)]
    pub mentor_id: Option<String>,
    #[serde(default, alias = "student_id")]
    pub learner_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sla_handled: bool,
}

/// Borrowed view of the fields SLA evaluation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaFields<'a> {
    pub timestamp: DateTime<Utc>,
    pub mentor_id: &'a str,
    pub learner_id: &'a str,
}

impl Message {
    /// Creates a learner-authored message.
    pub fn from_learner(
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        learner_id: impl Into<String>,
        mentor_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let learner_id = learner_id.into();
        Self {
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
            sender_id: learner_id.clone(),
            sender_role: SenderRole::Learner,
            mentor_id: Some(mentor_id.into()),
            learner_id: Some(learner_id),
            timestamp: Some(timestamp),
            text: None,
            sla_handled: false,
        }
    }

    /// Creates a mentor-authored message.
    pub fn from_mentor(
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        mentor_id: impl Into<String>,
        learner_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mentor_id = mentor_id.into();
        Self {
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
            sender_id: mentor_id.clone(),
            sender_role: SenderRole::Mentor,
            mentor_id: Some(mentor_id),
            learner_id: Some(learner_id.into()),
            timestamp: Some(timestamp),
            text: None,
            sla_handled: false,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Returns the timestamp and participant ids, or `None` when any is
    /// missing or blank.
    pub fn sla_fields(&self) -> Option<SlaFields<'_>> {
        let timestamp = self.timestamp?;
        let mentor_id = non_blank(self.mentor_id.as_deref())?;
        let learner_id = non_blank(self.learner_id.as_deref())?;
        Some(SlaFields {
            timestamp,
            mentor_id,
            learner_id,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|item| !item.is_empty())
}

/// One-to-one mentoring conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub mentor_id: String,
    pub learner_id: String,
    /// Embedded mute list: ids of participants who silenced this conversation.
    #[serde(default)]
    pub muted_by: Vec<String>,
}

impl Conversation {
    pub fn new(
        conversation_id: impl Into<String>,
        mentor_id: impl Into<String>,
        learner_id: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            mentor_id: mentor_id.into(),
            learner_id: learner_id.into(),
            muted_by: Vec::new(),
        }
    }

    pub fn muted_by(mut self, party_id: impl Into<String>) -> Self {
        self.muted_by.push(party_id.into());
        self
    }
}

/// Standalone mute record keyed by the canonical participant pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairMuteRecord {
    pub pair_key: String,
    #[serde(default)]
    pub muted_by: Vec<String>,
}

impl PairMuteRecord {
    pub fn new(first_party: &str, second_party: &str, muted_by: Vec<String>) -> Self {
        Self {
            pair_key: canonical_pair_key(first_party, second_party),
            muted_by,
        }
    }
}

/// Joins two participant ids in sorted order so either argument order
/// yields the same key.
pub fn canonical_pair_key(first_party: &str, second_party: &str) -> String {
    if first_party <= second_party {
        format!("{first_party}_{second_party}")
    } else {
        format!("{second_party}_{first_party}")
    }
}

/// Multi-address field that may be stored as a list or a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressField {
    Many(Vec<String>),
    One(String),
}

/// Mentor or learner profile as far as notification delivery cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyProfile {
    pub party_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Legacy single-address field.
    #[serde(default)]
    pub fcm_token: Option<String>,
    #[serde(default)]
    pub fcm_tokens: Option<AddressField>,
}

impl PartyProfile {
    pub fn new(party_id: impl Into<String>) -> Self {
        Self {
            party_id: party_id.into(),
            name: None,
            fcm_token: None,
            fcm_tokens: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_legacy_address(mut self, address: impl Into<String>) -> Self {
        self.fcm_token = Some(address.into());
        self
    }

    pub fn with_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fcm_tokens = Some(AddressField::Many(
            addresses.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Display name, or the role default when absent or blank.
    pub fn display_name(&self, kind: PartyKind) -> String {
        non_blank(self.name.as_deref())
            .unwrap_or(kind.default_display_name())
            .to_string()
    }
}

/// Append-only audit entry for a declared breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachRecord {
    pub breach_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub mentor_id: String,
    pub learner_id: String,
    pub message_text: Option<String>,
    pub message_timestamp: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

impl BreachRecord {
    /// Builds the record for `message`; `None` when SLA fields are missing.
    pub fn for_message(message: &Message, detected_at: DateTime<Utc>) -> Option<Self> {
        let fields = message.sla_fields()?;
        Some(Self {
            breach_id: breach_id_for(&message.conversation_id, &message.message_id),
            conversation_id: message.conversation_id.clone(),
            message_id: message.message_id.clone(),
            mentor_id: fields.mentor_id.to_string(),
            learner_id: fields.learner_id.to_string(),
            message_text: message.text.clone(),
            message_timestamp: fields.timestamp,
            detected_at,
        })
    }
}

/// Deterministic breach id: one record per message at most.
pub fn breach_id_for(conversation_id: &str, message_id: &str) -> String {
    format!("{conversation_id}:{message_id}")
}

/// Filter used when listing breach records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachQuery {
    pub conversation_id: Option<String>,
    pub mentor_id: Option<String>,
    pub limit: Option<usize>,
}

/// Time left before a learner message breaches, as whole hours and minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaCountdown {
    pub hours: i64,
    pub minutes: i64,
}

impl SlaCountdown {
    /// `max(sent_at + window - now, 0)` split into floored hours and minutes.
    pub fn remaining(sent_at: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> Self {
        let deadline = sent_at
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let remaining = (deadline - now).max(Duration::zero());
        let hours = remaining.num_hours();
        let minutes = (remaining - Duration::hours(hours)).num_minutes();
        Self { hours, minutes }
    }

    pub fn is_expired(self) -> bool {
        self.hours == 0 && self.minutes == 0
    }
}

impl std::fmt::Display for SlaCountdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}h {}m", self.hours, self.minutes)
    }
}

/// Discriminator carried in the `type` data key of every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SlaBreach,
    SlaWaiting,
    SlaChat,
    MentorReply,
    Announcement,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SlaBreach => "sla_breach",
            Self::SlaWaiting => "sla_waiting",
            Self::SlaChat => "sla_chat",
            Self::MentorReply => "mentor_reply",
            Self::Announcement => "announcement",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPriority {
    #[default]
    Normal,
    High,
}

/// Title, body and string data delivered to every address of a multicast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: DeliveryPriority,
}

impl NotificationPayload {
    /// Creates a payload whose data already carries the `type` key.
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), kind.as_str().to_string());
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            data,
            priority: DeliveryPriority::Normal,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: DeliveryPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Broadcast announcement addressed to one subject section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub announcement_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub school_id: String,
    pub programme_id: String,
    pub subject_id: String,
    pub section_id: String,
}

/// Learner enrollment in one subject section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Enrollment {
    pub learner_id: String,
    pub subject_id: String,
    pub section_id: String,
}

/// Address of a subject inside the school catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub school_id: String,
    pub programme_id: String,
    pub subject_id: String,
}

impl SubjectRef {
    pub fn of(announcement: &Announcement) -> Self {
        Self {
            school_id: announcement.school_id.clone(),
            programme_id: announcement.programme_id.clone(),
            subject_id: announcement.subject_id.clone(),
        }
    }
}

/// Identity-directory entry used by the administrative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub uid: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub admin: bool,
}

impl AccountRecord {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            disabled: false,
            admin: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        canonical_pair_key, Message, PartyKind, PartyProfile, SenderRole, SlaCountdown, SlaState,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn sla_state_transitions_enforce_terminal_states() {
        assert!(SlaState::Pending.can_transition_to(SlaState::Notified));
        assert!(SlaState::Pending.can_transition_to(SlaState::Replied));
        assert!(!SlaState::Notified.can_transition_to(SlaState::Pending));
        assert!(!SlaState::Replied.can_transition_to(SlaState::Notified));
        assert!(SlaState::Notified.ensure_transition(SlaState::Replied).is_err());
        assert!(SlaState::Notified.is_terminal());
    }

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(canonical_pair_key("m-1", "l-9"), "l-9_m-1");
        assert_eq!(canonical_pair_key("l-9", "m-1"), "l-9_m-1");
    }

    #[test]
    fn countdown_floors_hours_and_minutes() {
        let sent = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let now = sent + Duration::hours(10) + Duration::minutes(15) + Duration::seconds(59);
        let countdown = SlaCountdown::remaining(sent, Duration::hours(48), now);
        assert_eq!(countdown, SlaCountdown { hours: 37, minutes: 44 });
        assert_eq!(countdown.to_string(), "37h 44m");
    }

    #[test]
    fn countdown_clamps_to_zero_after_deadline() {
        let sent = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let countdown =
            SlaCountdown::remaining(sent, Duration::hours(48), sent + Duration::hours(49));
        assert!(countdown.is_expired());
    }

    #[test]
    fn countdown_saturates_when_deadline_leaves_calendar() {
        let sent = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        let countdown = SlaCountdown::remaining(sent, Duration::hours(48), sent);
        assert_eq!(countdown.hours, 1);
        assert!(!countdown.is_expired());
    }

    #[test]
    fn legacy_student_role_deserializes_as_learner() {
        let message: Message = serde_json::from_value(json!({
            "message_id": "m-1",
            "conversation_id": "c-1",
            "sender_id": "l-1",
            "sender_role": "student",
            "mentor_id": "t-1",
            "student_id": "l-1",
            "timestamp": "2026-03-01T08:00:00Z"
        }))
        .expect("decode legacy message");
        assert_eq!(message.sender_role, SenderRole::Learner);
        assert_eq!(message.learner_id.as_deref(), Some("l-1"));
        assert!(!message.sla_handled);
        assert!(message.sla_fields().is_some());
    }

    #[test]
    fn sla_fields_reject_blank_participants() {
        let sent = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let mut message = Message::from_learner("c-1", "m-1", "l-1", "t-1", sent);
        message.mentor_id = Some("  ".to_string());
        assert!(message.sla_fields().is_none());
    }

    #[test]
    fn display_name_falls_back_to_role_default() {
        let profile = PartyProfile::new("t-1").with_name(" ");
        assert_eq!(profile.display_name(PartyKind::Mentor), "Mentor");
        let named = PartyProfile::new("l-1").with_name("Ada");
        assert_eq!(named.display_name(PartyKind::Learner), "Ada");
    }
}

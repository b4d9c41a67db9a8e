//! Notification copy and payload data for every path.

use mentorline_types::{
    DeliveryPriority, NotificationKind, NotificationPayload, PartyKind, PartyProfile, SlaCountdown,
};

pub const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";
pub const ANNOUNCEMENT_ROUTE: &str = "/previewAnnouncement";
const PREVIEW_ELLIPSIS: char = '…';

/// Identifiers and display names of a conversation's two parties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationParties {
    pub conversation_id: String,
    pub message_id: String,
    pub mentor_id: String,
    pub learner_id: String,
    pub mentor_name: String,
    pub learner_name: String,
}

impl ConversationParties {
    pub fn new(
        conversation_id: &str,
        message_id: &str,
        mentor_id: &str,
        learner_id: &str,
        mentor_profile: Option<&PartyProfile>,
        learner_profile: Option<&PartyProfile>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            mentor_id: mentor_id.to_string(),
            learner_id: learner_id.to_string(),
            mentor_name: display_name(mentor_profile, PartyKind::Mentor),
            learner_name: display_name(learner_profile, PartyKind::Learner),
        }
    }

    fn decorate(&self, payload: NotificationPayload) -> NotificationPayload {
        payload
            .with_data("conversationId", &self.conversation_id)
            .with_data("messageId", &self.message_id)
            .with_data("mentorId", &self.mentor_id)
            .with_data("mentorName", &self.mentor_name)
            .with_data("learnerId", &self.learner_id)
            .with_data("learnerName", &self.learner_name)
            .with_data("click_action", CLICK_ACTION)
    }
}

fn display_name(profile: Option<&PartyProfile>, kind: PartyKind) -> String {
    profile
        .map(|profile| profile.display_name(kind))
        .unwrap_or_else(|| kind.default_display_name().to_string())
}

/// Keeps at most `max_chars` characters, appending an ellipsis only when
/// something was cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(max_chars).collect();
    preview.push(PREVIEW_ELLIPSIS);
    preview
}

/// Sweep alert for the mentor of a breached message.
pub fn breach_alert_for_mentor(
    parties: &ConversationParties,
    message_text: Option<&str>,
    window_hours: i64,
    preview_max_chars: usize,
) -> NotificationPayload {
    let preview = message_text
        .map(|text| truncate_preview(text, preview_max_chars))
        .filter(|preview| !preview.is_empty());
    let body = match &preview {
        Some(preview) => format!(
            "{} has been waiting over {window_hours} hours for a reply: \"{preview}\"",
            parties.learner_name
        ),
        None => format!("A learner message sent {window_hours} hours ago has no reply."),
    };
    let payload = parties.decorate(NotificationPayload::new(
        NotificationKind::SlaBreach,
        "SLA Reminder",
        body,
    ));
    match preview {
        Some(preview) => payload.with_data("preview", preview),
        None => payload,
    }
}

/// Sweep notice for the learner whose message went unanswered.
pub fn still_waiting_for_learner(
    parties: &ConversationParties,
    window_hours: i64,
) -> NotificationPayload {
    parties.decorate(NotificationPayload::new(
        NotificationKind::SlaWaiting,
        "Still Waiting for Mentor",
        format!("Your mentor has not replied to your message for over {window_hours} hours."),
    ))
}

/// Realtime advisory telling the mentor how long is left to reply.
pub fn new_message_for_mentor(
    parties: &ConversationParties,
    countdown: SlaCountdown,
) -> NotificationPayload {
    parties
        .decorate(NotificationPayload::new(
            NotificationKind::SlaChat,
            format!("New message from {}", parties.learner_name),
            format!("Reply within {countdown}."),
        ))
        .with_priority(DeliveryPriority::High)
}

pub fn mentor_reply_for_learner(parties: &ConversationParties) -> NotificationPayload {
    parties
        .decorate(NotificationPayload::new(
            NotificationKind::MentorReply,
            format!("Reply from {}", parties.mentor_name),
            "Your mentor has responded to your message.",
        ))
        .with_priority(DeliveryPriority::High)
}

pub fn announcement_payload(
    announcement_id: &str,
    title: Option<&str>,
    subject_name: &str,
    section_name: &str,
) -> NotificationPayload {
    let title = title
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or("New Announcement");
    NotificationPayload::new(
        NotificationKind::Announcement,
        title,
        format!("{subject_name} - {section_name}"),
    )
    .with_data("announcementId", announcement_id)
    .with_data("route", ANNOUNCEMENT_ROUTE)
}

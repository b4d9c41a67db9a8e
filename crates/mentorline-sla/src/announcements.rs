use std::sync::Arc;

use futures_util::future::try_join_all;
use mentorline_store::ConversationReader;
use mentorline_types::{Announcement, PartyKind, SubjectRef};
use serde::Serialize;

use crate::notifications::announcement_payload;
use crate::{
    merge_delivery_addresses, resolve_delivery_addresses, NotificationDispatcher, SlaError,
    SlaResult,
};

const DEFAULT_SUBJECT_NAME: &str = "Subject";
const DEFAULT_SECTION_NAME: &str = "Section";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnouncementReport {
    pub enrolled_learners: usize,
    pub addresses: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub fn parse_announcement_created_event(raw: &str) -> SlaResult<Announcement> {
    let announcement: Announcement = serde_json::from_str(raw)
        .map_err(|error| SlaError::InvalidPayload(format!("announcement event: {error}")))?;
    if announcement.announcement_id.trim().is_empty() {
        return Err(SlaError::InvalidPayload(
            "announcement_id must be non-empty".to_string(),
        ));
    }
    Ok(announcement)
}

/// Sends one announcement to every learner enrolled in its section.
#[derive(Clone)]
pub struct AnnouncementFanout {
    reader: Arc<dyn ConversationReader>,
    dispatcher: NotificationDispatcher,
}

impl AnnouncementFanout {
    pub fn new(reader: Arc<dyn ConversationReader>, dispatcher: NotificationDispatcher) -> Self {
        Self { reader, dispatcher }
    }

    #[tracing::instrument(
        name = "announcement_created",
        skip_all,
        fields(announcement_id = %announcement.announcement_id)
    )]
    pub async fn handle_announcement_created(
        &self,
        announcement: &Announcement,
    ) -> SlaResult<AnnouncementReport> {
        let learners = self
            .reader
            .query_enrolled_learners(&announcement.subject_id, &announcement.section_id)
            .await?;
        let mut report = AnnouncementReport {
            enrolled_learners: learners.len(),
            ..AnnouncementReport::default()
        };
        if learners.is_empty() {
            tracing::debug!("no enrolled learners");
            return Ok(report);
        }

        let address_lists = try_join_all(learners.iter().map(|learner_id| async move {
            let profile = self
                .reader
                .get_profile(PartyKind::Learner, learner_id)
                .await?;
            Ok::<_, SlaError>(
                profile
                    .map(|profile| resolve_delivery_addresses(&profile))
                    .unwrap_or_default(),
            )
        }))
        .await?;
        let addresses = merge_delivery_addresses(address_lists);
        report.addresses = addresses.len();
        if addresses.is_empty() {
            tracing::debug!(
                learners = learners.len(),
                "enrolled learners have no addresses"
            );
            return Ok(report);
        }

        let subject = SubjectRef::of(announcement);
        let subject_name = self
            .reader
            .get_subject_name(&subject)
            .await?
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SUBJECT_NAME.to_string());
        let section_name = self
            .reader
            .get_section_name(&subject, &announcement.section_id)
            .await?
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SECTION_NAME.to_string());

        let payload = announcement_payload(
            &announcement.announcement_id,
            announcement.title.as_deref(),
            &subject_name,
            &section_name,
        );
        let delivery = self.dispatcher.dispatch(&addresses, payload).await;
        report.delivered = delivery.success_count;
        report.failed = delivery.failure_count;
        tracing::info!(
            learners = report.enrolled_learners,
            addresses = report.addresses,
            delivered = report.delivered,
            failed = report.failed,
            "announcement sent"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_announcement_created_event, AnnouncementReport};
    use crate::{AppContext, SlaConfig};
    use mentorline_push::RecordingPushTransport;
    use mentorline_store::{DocumentWriter, InMemoryMentorshipStore};
    use mentorline_types::{Announcement, Enrollment, PartyKind, PartyProfile, SubjectRef};
    use std::sync::Arc;

    fn announcement(title: Option<&str>) -> Announcement {
        Announcement {
            announcement_id: "a-1".to_string(),
            title: title.map(str::to_string),
            school_id: "s-1".to_string(),
            programme_id: "p-1".to_string(),
            subject_id: "math".to_string(),
            section_id: "A".to_string(),
        }
    }

    async fn enroll(store: &InMemoryMentorshipStore, learner_id: &str) {
        store
            .add_enrollment(Enrollment {
                learner_id: learner_id.to_string(),
                subject_id: "math".to_string(),
                section_id: "A".to_string(),
            })
            .await
            .expect("enroll");
    }

    #[tokio::test]
    async fn fans_out_deduplicated_addresses_once() {
        let store = Arc::new(InMemoryMentorshipStore::new());
        enroll(&store, "l-1").await;
        enroll(&store, "l-2").await;
        enroll(&store, "l-3").await;
        store
            .put_profile(
                PartyKind::Learner,
                PartyProfile::new("l-1").with_addresses(["tok-1", "tok-shared"]),
            )
            .await
            .expect("profile 1");
        store
            .put_profile(
                PartyKind::Learner,
                PartyProfile::new("l-2").with_legacy_address("tok-shared"),
            )
            .await
            .expect("profile 2");
        let subject = SubjectRef {
            school_id: "s-1".to_string(),
            programme_id: "p-1".to_string(),
            subject_id: "math".to_string(),
        };
        store
            .put_subject(subject.clone(), "Mathematics".to_string())
            .await
            .expect("subject");
        let transport = Arc::new(RecordingPushTransport::new());
        let fanout = AppContext::new(store, transport.clone(), SlaConfig::default())
            .expect("context")
            .announcements();

        let report = fanout
            .handle_announcement_created(&announcement(Some("Exam moved")))
            .await
            .expect("fan out");
        assert_eq!(
            report,
            AnnouncementReport {
                enrolled_learners: 3,
                addresses: 2,
                delivered: 2,
                failed: 0,
            }
        );
        let requests = transport.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].addresses, vec!["tok-1", "tok-shared"]);
        assert_eq!(requests[0].payload.title, "Exam moved");
        assert_eq!(requests[0].payload.body, "Mathematics - Section");
        assert_eq!(requests[0].payload.data["route"], "/previewAnnouncement");
    }

    #[tokio::test]
    async fn no_enrollments_or_addresses_is_a_no_op() {
        let store = Arc::new(InMemoryMentorshipStore::new());
        let transport = Arc::new(RecordingPushTransport::new());
        let fanout = AppContext::new(store.clone(), transport.clone(), SlaConfig::default())
            .expect("context")
            .announcements();
        let report = fanout
            .handle_announcement_created(&announcement(None))
            .await
            .expect("fan out");
        assert_eq!(report, AnnouncementReport::default());

        enroll(&store, "l-1").await;
        let report = fanout
            .handle_announcement_created(&announcement(None))
            .await
            .expect("fan out");
        assert_eq!(report.enrolled_learners, 1);
        assert_eq!(report.addresses, 0);
        assert_eq!(transport.request_count().await, 0);
    }

    #[test]
    fn parse_requires_identifier() {
        let raw = r#"{"announcement_id":"a-1","school_id":"s","programme_id":"p","subject_id":"m","section_id":"A"}"#;
        let announcement = parse_announcement_created_event(raw).expect("parse");
        assert!(announcement.title.is_none());
        let blank = raw.replace("a-1", " ");
        assert!(parse_announcement_created_event(&blank).is_err());
    }
}

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use httpmock::prelude::*;
use mentorline_push::{
    HttpPushConfig, HttpPushTransport, PushDeliveryMode, PushTransport, RecordingPushTransport,
};
use mentorline_sla::{AppContext, MessageCreatedEvent, SlaConfig, TriggerOutcome};
use mentorline_store::{
    BreachLedgerStore, ConversationReader, DocumentWriter, InMemoryMentorshipStore,
    MentorshipStore, SqliteMentorshipStore,
};
use mentorline_types::{
    BreachQuery, Conversation, Message, PairMuteRecord, PartyKind, PartyProfile,
};
use serde_json::json;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0)
        .single()
        .expect("valid t0")
}

async fn seed_pair<S: MentorshipStore>(store: &S, mentor: PartyProfile, learner: PartyProfile) {
    store
        .put_conversation(Conversation::new("c-1", "t-1", "l-1"))
        .await
        .expect("conversation");
    store
        .put_profile(PartyKind::Mentor, mentor)
        .await
        .expect("mentor profile");
    store
        .put_profile(PartyKind::Learner, learner)
        .await
        .expect("learner profile");
}

fn default_mentor() -> PartyProfile {
    PartyProfile::new("t-1")
        .with_name("Ms. Rivera")
        .with_addresses(["mentor-phone", "mentor-tablet"])
}

fn default_learner() -> PartyProfile {
    PartyProfile::new("l-1")
        .with_name("Sam")
        .with_legacy_address("learner-phone")
}

fn context<S: MentorshipStore + 'static>(
    store: Arc<S>,
    transport: Arc<dyn PushTransport>,
) -> AppContext {
    AppContext::new(store, transport, SlaConfig::default()).expect("context")
}

async fn breach_notifies_both_parties_once<S: MentorshipStore + 'static>(store: Arc<S>) {
    seed_pair(store.as_ref(), default_mentor(), default_learner()).await;
    store
        .insert_message(
            Message::from_learner("c-1", "m-1", "l-1", "t-1", t0()).with_text("Is my proof right?"),
        )
        .await
        .expect("message");
    let transport = Arc::new(RecordingPushTransport::new());
    let sweep = context(store.clone(), transport.clone()).sweep();

    let report = sweep
        .run_once(t0() + Duration::hours(49))
        .await
        .expect("first sweep");
    assert_eq!(report.scanned, 1);
    assert_eq!(report.breached, 1);
    assert_eq!(report.multicasts_sent, 2);
    assert_eq!(report.addresses_delivered, 3);

    let mentor_requests = transport.requests_to("mentor-phone").await;
    assert_eq!(mentor_requests.len(), 1);
    assert_eq!(
        mentor_requests[0].addresses,
        vec!["mentor-phone", "mentor-tablet"]
    );
    assert_eq!(mentor_requests[0].payload.title, "SLA Reminder");
    let learner_requests = transport.requests_to("learner-phone").await;
    assert_eq!(learner_requests.len(), 1);
    assert_eq!(learner_requests[0].payload.title, "Still Waiting for Mentor");

    let message = store
        .get_message("c-1", "m-1")
        .await
        .expect("get message")
        .expect("message exists");
    assert!(message.sla_handled);
    let records = store
        .query_breach_records(BreachQuery::default())
        .await
        .expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_timestamp, t0());
    assert_eq!(records[0].breach_id, "c-1:m-1");

    for hours in [50, 72] {
        let report = sweep
            .run_once(t0() + Duration::hours(hours))
            .await
            .expect("repeat sweep");
        assert_eq!(report.scanned, 0);
        assert_eq!(report.breached, 0);
    }
    assert_eq!(transport.request_count().await, 2);
    assert_eq!(
        store
            .query_breach_records(BreachQuery::default())
            .await
            .expect("records")
            .len(),
        1
    );
}

async fn mentor_reply_prevents_breach<S: MentorshipStore + 'static>(store: Arc<S>) {
    seed_pair(store.as_ref(), default_mentor(), default_learner()).await;
    store
        .insert_message(Message::from_learner("c-1", "m-1", "l-1", "t-1", t0()))
        .await
        .expect("learner message");
    store
        .insert_message(Message::from_mentor(
            "c-1",
            "m-2",
            "t-1",
            "l-1",
            t0() + Duration::hours(2),
        ))
        .await
        .expect("mentor reply");
    let transport = Arc::new(RecordingPushTransport::new());
    let sweep = context(store.clone(), transport.clone()).sweep();

    for hours in [50, 96, 500] {
        let report = sweep
            .run_once(t0() + Duration::hours(hours))
            .await
            .expect("sweep");
        assert_eq!(report.replied, 1);
        assert_eq!(report.breached, 0);
    }
    assert_eq!(transport.request_count().await, 0);
    let message = store
        .get_message("c-1", "m-1")
        .await
        .expect("get message")
        .expect("message exists");
    assert!(!message.sla_handled);
    assert!(store
        .query_breach_records(BreachQuery::default())
        .await
        .expect("records")
        .is_empty());
}

#[tokio::test]
async fn integration_breach_after_window_in_memory() {
    breach_notifies_both_parties_once(Arc::new(InMemoryMentorshipStore::new())).await;
}

#[tokio::test]
async fn integration_breach_after_window_sqlite() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SqliteMentorshipStore::new(temp.path().join("mentorline.sqlite3")).expect("store");
    breach_notifies_both_parties_once(Arc::new(store)).await;
}

#[tokio::test]
async fn integration_mentor_reply_prevents_breach_in_memory() {
    mentor_reply_prevents_breach(Arc::new(InMemoryMentorshipStore::new())).await;
}

#[tokio::test]
async fn integration_mentor_reply_prevents_breach_sqlite() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SqliteMentorshipStore::new(temp.path().join("mentorline.sqlite3")).expect("store");
    mentor_reply_prevents_breach(Arc::new(store)).await;
}

#[tokio::test]
async fn integration_either_mute_representation_blocks_all_effects() {
    let conversation_muted = Arc::new(InMemoryMentorshipStore::new());
    conversation_muted
        .put_conversation(Conversation::new("c-1", "t-1", "l-1").muted_by("l-1"))
        .await
        .expect("conversation");

    let pair_muted = Arc::new(InMemoryMentorshipStore::new());
    pair_muted
        .put_conversation(Conversation::new("c-1", "t-1", "l-1"))
        .await
        .expect("conversation");
    pair_muted
        .put_pair_mute(PairMuteRecord::new("t-1", "l-1", vec!["t-1".to_string()]))
        .await
        .expect("pair mute");

    for store in [conversation_muted, pair_muted] {
        store
            .put_profile(PartyKind::Mentor, default_mentor())
            .await
            .expect("mentor");
        store
            .put_profile(PartyKind::Learner, default_learner())
            .await
            .expect("learner");
        store
            .insert_message(Message::from_learner("c-1", "m-1", "l-1", "t-1", t0()))
            .await
            .expect("message");
        let transport = Arc::new(RecordingPushTransport::new());
        let report = context(store.clone(), transport.clone())
            .sweep()
            .run_once(t0() + Duration::hours(49))
            .await
            .expect("sweep");
        assert_eq!(report.muted, 1);
        assert_eq!(report.breached, 0);
        assert_eq!(transport.request_count().await, 0);
        let message = store
            .get_message("c-1", "m-1")
            .await
            .expect("get")
            .expect("message");
        assert!(!message.sla_handled);
        assert!(store
            .query_breach_records(BreachQuery::default())
            .await
            .expect("records")
            .is_empty());
    }
}

#[tokio::test]
async fn integration_profiles_without_addresses_skip_delivery_but_still_flag() {
    let store = Arc::new(InMemoryMentorshipStore::new());
    seed_pair(
        store.as_ref(),
        PartyProfile::new("t-1").with_legacy_address("only-mentor-device"),
        PartyProfile::new("l-1"),
    )
    .await;
    store
        .insert_message(Message::from_learner("c-1", "m-1", "l-1", "t-1", t0()))
        .await
        .expect("message");
    let transport = Arc::new(RecordingPushTransport::new());
    let report = context(store.clone(), transport.clone())
        .sweep()
        .run_once(t0() + Duration::hours(49))
        .await
        .expect("sweep");

    assert_eq!(report.breached, 1);
    assert_eq!(report.multicasts_sent, 1);
    let requests = transport.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].addresses, vec!["only-mentor-device"]);
    assert!(store
        .get_message("c-1", "m-1")
        .await
        .expect("get")
        .expect("message")
        .sla_handled);
}

#[tokio::test]
async fn integration_realtime_countdown_and_sweep_both_notify() {
    let store = Arc::new(InMemoryMentorshipStore::new());
    seed_pair(store.as_ref(), default_mentor(), default_learner()).await;
    let message = Message::from_learner("c-1", "m-1", "l-1", "t-1", t0()).with_text("Hello?");
    store
        .insert_message(message.clone())
        .await
        .expect("message");
    let transport = Arc::new(RecordingPushTransport::new());
    let app = context(store.clone(), transport.clone());

    let event = MessageCreatedEvent {
        conversation_id: "c-1".to_string(),
        message_id: "m-1".to_string(),
        message,
    };
    let evaluated_at = t0() + Duration::hours(47) + Duration::minutes(30);
    let outcome = app
        .realtime()
        .handle_message_created(&event, evaluated_at)
        .await
        .expect("realtime");
    assert_eq!(
        outcome,
        TriggerOutcome::Notified {
            recipient: PartyKind::Mentor,
            delivered: 2,
            failed: 0,
        }
    );
    let advisory = transport.requests().await;
    assert_eq!(advisory[0].payload.body, "Reply within 0h 30m.");
    assert!(!store
        .get_message("c-1", "m-1")
        .await
        .expect("get")
        .expect("message")
        .sla_handled);

    let late = app
        .realtime()
        .handle_message_created(&event, t0() + Duration::hours(60))
        .await
        .expect("late realtime");
    assert!(matches!(late, TriggerOutcome::Notified { .. }));
    let late_requests = transport.requests().await;
    assert_eq!(late_requests[1].payload.body, "Reply within 0h 0m.");

    let report = app
        .sweep()
        .run_once(t0() + Duration::hours(49))
        .await
        .expect("sweep");
    assert_eq!(report.breached, 1);
    let mentor_titles: Vec<String> = transport
        .requests_to("mentor-phone")
        .await
        .into_iter()
        .map(|request| request.payload.title)
        .collect();
    assert_eq!(
        mentor_titles,
        vec!["New message from Sam", "New message from Sam", "SLA Reminder"]
    );
}

#[tokio::test]
async fn integration_provider_failures_do_not_block_flagging() {
    let server = MockServer::start();
    let delivered = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/mentorline-demo/messages:send")
            .header("authorization", "Bearer push-token")
            .body_includes("\"token\":\"mentor-phone\"");
        then.status(200)
            .json_body(json!({"name": "projects/mentorline-demo/messages/1"}));
    });
    let unregistered = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/mentorline-demo/messages:send")
            .body_includes("\"token\":\"mentor-tablet\"");
        then.status(404).json_body(json!({
            "error": {"status": "NOT_FOUND", "details": [{"errorCode": "UNREGISTERED"}]}
        }));
    });
    let learner = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/projects/mentorline-demo/messages:send")
            .body_includes("\"token\":\"learner-phone\"");
        then.status(503).body("unavailable");
    });

    let store = Arc::new(InMemoryMentorshipStore::new());
    seed_pair(store.as_ref(), default_mentor(), default_learner()).await;
    store
        .insert_message(Message::from_learner("c-1", "m-1", "l-1", "t-1", t0()))
        .await
        .expect("message");
    let transport = HttpPushTransport::new(HttpPushConfig {
        mode: PushDeliveryMode::Provider,
        api_base: server.base_url(),
        project_id: Some("mentorline-demo".to_string()),
        access_token: Some("push-token".to_string()),
        http_timeout_ms: 2_000,
    })
    .expect("transport");
    let report = context(store.clone(), Arc::new(transport))
        .sweep()
        .run_once(t0() + Duration::hours(49))
        .await
        .expect("sweep");

    assert_eq!(report.breached, 1);
    assert_eq!(report.multicasts_sent, 2);
    assert_eq!(report.addresses_delivered, 1);
    assert_eq!(report.addresses_failed, 2);
    delivered.assert_calls(1);
    unregistered.assert_calls(1);
    learner.assert_calls(1);
    assert!(store
        .get_message("c-1", "m-1")
        .await
        .expect("get")
        .expect("message")
        .sla_handled);
}

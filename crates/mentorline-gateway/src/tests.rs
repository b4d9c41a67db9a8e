use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use mentorline_push::RecordingPushTransport;
use mentorline_sla::{AppContext, SlaConfig, SlaError};
use mentorline_store::{AccountDirectory, DocumentWriter, InMemoryMentorshipStore};
use mentorline_types::{AccountRecord, Conversation, Message, PartyKind, PartyProfile};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::{
    build_gateway_router, ApiError, GatewayConfig, GatewayState, ACCOUNT_DISABLED_ENDPOINT,
    ANNOUNCEMENT_CREATED_ENDPOINT, HEALTHZ_ENDPOINT, MESSAGE_CREATED_ENDPOINT,
    SLA_SWEEP_ENDPOINT,
};

struct Fixture {
    store: Arc<InMemoryMentorshipStore>,
    transport: Arc<RecordingPushTransport>,
}

impl Fixture {
    async fn new() -> Self {
        let store = Arc::new(InMemoryMentorshipStore::new());
        store
            .put_conversation(Conversation::new("c-1", "t-1", "l-1"))
            .await
            .expect("conversation");
        store
            .put_profile(
                PartyKind::Mentor,
                PartyProfile::new("t-1")
                    .with_name("Ms. Rivera")
                    .with_addresses(["mentor-device-1"]),
            )
            .await
            .expect("mentor profile");
        store
            .put_profile(
                PartyKind::Learner,
                PartyProfile::new("l-1")
                    .with_name("Sam")
                    .with_addresses(["learner-device-1"]),
            )
            .await
            .expect("learner profile");
        Self {
            store,
            transport: Arc::new(RecordingPushTransport::new()),
        }
    }

    fn state(&self, bearer_token: Option<&str>) -> Arc<GatewayState> {
        let context = AppContext::new(
            self.store.clone(),
            self.transport.clone(),
            SlaConfig::default(),
        )
        .expect("context");
        let config = GatewayConfig {
            bearer_token: bearer_token.map(str::to_string),
            ..GatewayConfig::default()
        };
        Arc::new(GatewayState::new(context, &config))
    }
}

async fn spawn_test_server(
    state: Arc<GatewayState>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind ephemeral listener")?;
    let addr = listener.local_addr().context("resolve listener addr")?;
    let app = build_gateway_router(state);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok((addr, handle))
}

fn learner_message_event(minutes_ago: i64) -> Value {
    let sent_at = Utc::now() - chrono::Duration::minutes(minutes_ago);
    json!({
        "conversation_id": "c-1",
        "message_id": "m-1",
        "message": {
            "sender_id": "l-1",
            "sender_role": "student",
            "mentor_id": "t-1",
            "student_id": "l-1",
            "timestamp": sent_at.to_rfc3339(),
            "text": "Can you check my essay?"
        }
    })
}

#[tokio::test]
async fn healthz_reports_window() {
    let fixture = Fixture::new().await;
    let (addr, handle) = spawn_test_server(fixture.state(None))
        .await
        .expect("spawn server");
    let response = reqwest::Client::new()
        .get(format!("http://{addr}{HEALTHZ_ENDPOINT}"))
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("parse body");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sla_window_hours"], 48);
    handle.abort();
}

#[tokio::test]
async fn message_created_notifies_mentor() {
    let fixture = Fixture::new().await;
    let (addr, handle) = spawn_test_server(fixture.state(None))
        .await
        .expect("spawn server");
    let response = reqwest::Client::new()
        .post(format!("http://{addr}{MESSAGE_CREATED_ENDPOINT}"))
        .json(&learner_message_event(30))
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("parse body");
    assert_eq!(body["outcome"], "notified");
    assert_eq!(body["recipient"], "mentor");
    assert_eq!(body["delivered"], 1);

    let requests = fixture.transport.requests_to("mentor-device-1").await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payload.title, "New message from Sam");
    handle.abort();
}

#[tokio::test]
async fn malformed_trigger_payload_returns_bad_request() {
    let fixture = Fixture::new().await;
    let (addr, handle) = spawn_test_server(fixture.state(None))
        .await
        .expect("spawn server");
    let client = reqwest::Client::new();
    for body in [
        "not json".to_string(),
        json!({"conversation_id": "", "message_id": "m-1", "message": {}}).to_string(),
    ] {
        let response = client
            .post(format!("http://{addr}{MESSAGE_CREATED_ENDPOINT}"))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("send request");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let payload: Value = response.json().await.expect("parse body");
        assert_eq!(payload["error"]["type"], "invalid_request_error");
        assert_eq!(payload["error"]["code"], "invalid_payload");
    }
    assert_eq!(fixture.transport.request_count().await, 0);
    handle.abort();
}

#[tokio::test]
async fn bearer_token_guards_every_route() {
    let fixture = Fixture::new().await;
    let (addr, handle) = spawn_test_server(fixture.state(Some("secret")))
        .await
        .expect("spawn server");
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}{SLA_SWEEP_ENDPOINT}"))
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let payload: Value = response.json().await.expect("parse body");
    assert_eq!(payload["error"]["code"], "unauthorized");

    let response = client
        .get(format!("http://{addr}{HEALTHZ_ENDPOINT}"))
        .bearer_auth("wrong")
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    for near_miss in ["secre", "secret2", "Secret"] {
        let response = client
            .get(format!("http://{addr}{HEALTHZ_ENDPOINT}"))
            .bearer_auth(near_miss)
            .send()
            .await
            .expect("send request");
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    let response = client
        .get(format!("http://{addr}{HEALTHZ_ENDPOINT}"))
        .bearer_auth("secret")
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    handle.abort();
}

#[tokio::test]
async fn sla_sweep_route_returns_report_and_flags_breach() {
    let fixture = Fixture::new().await;
    fixture
        .store
        .insert_message(
            Message::from_learner(
                "c-1",
                "m-old",
                "l-1",
                "t-1",
                Utc::now() - chrono::Duration::hours(50),
            )
            .with_text("Still stuck on question 3"),
        )
        .await
        .expect("message");
    let (addr, handle) = spawn_test_server(fixture.state(None))
        .await
        .expect("spawn server");
    let client = reqwest::Client::new();

    let first: Value = client
        .post(format!("http://{addr}{SLA_SWEEP_ENDPOINT}"))
        .send()
        .await
        .expect("send request")
        .json()
        .await
        .expect("parse body");
    assert_eq!(first["breached"], 1);
    assert_eq!(first["multicasts_sent"], 2);

    let second: Value = client
        .post(format!("http://{addr}{SLA_SWEEP_ENDPOINT}"))
        .send()
        .await
        .expect("send request")
        .json()
        .await
        .expect("parse body");
    assert_eq!(second["scanned"], 0);
    assert_eq!(second["breached"], 0);
    handle.abort();
}

#[tokio::test]
async fn announcement_route_reports_fanout() {
    let fixture = Fixture::new().await;
    let (addr, handle) = spawn_test_server(fixture.state(None))
        .await
        .expect("spawn server");
    let response = reqwest::Client::new()
        .post(format!("http://{addr}{ANNOUNCEMENT_CREATED_ENDPOINT}"))
        .json(&json!({
            "announcement_id": "a-1",
            "school_id": "s-1",
            "programme_id": "p-1",
            "subject_id": "math",
            "section_id": "A"
        }))
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("parse body");
    assert_eq!(body["enrolled_learners"], 0);
    assert_eq!(body["delivered"], 0);
    handle.abort();
}

#[tokio::test]
async fn account_disable_requires_admin_caller() {
    let fixture = Fixture::new().await;
    fixture
        .store
        .put_account(AccountRecord::new("u-target"))
        .await
        .expect("target");
    fixture
        .store
        .set_admin_claim("u-admin", true)
        .await
        .expect("admin");
    let (addr, handle) = spawn_test_server(fixture.state(Some("secret")))
        .await
        .expect("spawn server");
    let client = reqwest::Client::new();
    let url = format!("http://{addr}{ACCOUNT_DISABLED_ENDPOINT}");
    let body = json!({"uid": "u-target", "disabled": true});

    let response = client
        .post(&url)
        .bearer_auth("secret")
        .json(&body)
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let payload: Value = response.json().await.expect("parse body");
    assert_eq!(payload["error"]["code"], "permission-denied");

    let response = client
        .post(&url)
        .bearer_auth("secret")
        .header("x-caller-uid", "u-admin")
        .json(&json!({"uid": "u-ghost", "disabled": true}))
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = client
        .post(&url)
        .bearer_auth("secret")
        .header("x-caller-uid", "u-admin")
        .json(&body)
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let payload: Value = response.json().await.expect("parse body");
    assert_eq!(payload["message"], "User u-target has been disabled.");
    let account = fixture
        .store
        .get_account("u-target")
        .await
        .expect("get")
        .expect("account");
    assert!(account.disabled);
    handle.abort();
}

#[tokio::test]
async fn admin_route_is_refused_without_configured_token() {
    let fixture = Fixture::new().await;
    fixture
        .store
        .put_account(AccountRecord::new("u-target"))
        .await
        .expect("target");
    fixture
        .store
        .set_admin_claim("u-admin", true)
        .await
        .expect("admin");
    let (addr, handle) = spawn_test_server(fixture.state(None))
        .await
        .expect("spawn server");

    let response = reqwest::Client::new()
        .post(format!("http://{addr}{ACCOUNT_DISABLED_ENDPOINT}"))
        .header("x-caller-uid", "u-admin")
        .json(&json!({"uid": "u-target", "disabled": true}))
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let payload: Value = response.json().await.expect("parse body");
    assert_eq!(payload["error"]["code"], "admin_auth_required");
    let account = fixture
        .store
        .get_account("u-target")
        .await
        .expect("get")
        .expect("account");
    assert!(!account.disabled);
    handle.abort();
}

#[test]
fn overlapping_sweep_maps_to_conflict() {
    let error = ApiError::from(SlaError::SweepInProgress);
    assert_eq!(error.status, axum::http::StatusCode::CONFLICT);
    assert_eq!(error.code, "sweep_in_progress");
}

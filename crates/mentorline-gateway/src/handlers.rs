use std::sync::Arc;

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use mentorline_sla::{
    parse_announcement_created_event, parse_message_created_event, AdminResponse,
    AnnouncementReport, SetAccountDisabledRequest, SweepReport, TriggerOutcome,
};
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use crate::{ApiError, GatewayState, CALLER_UID_HEADER};

#[derive(Debug, Deserialize)]
struct AccountDisabledBody {
    uid: String,
    disabled: bool,
}

fn bearer_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn authorize(state: &GatewayState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.bearer_token.as_deref() else {
        return Ok(());
    };
    match bearer_token_from_headers(headers) {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => Ok(()),
        _ => {
            tracing::warn!("gateway request rejected: bad bearer token");
            Err(ApiError::unauthorized())
        }
    }
}

pub(crate) async fn handle_healthz(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(json!({
        "status": "ok",
        "sla_window_hours": state.context.config().window_hours(),
    })))
}

pub(crate) async fn handle_message_created(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<TriggerOutcome>, ApiError> {
    authorize(&state, &headers)?;
    let event = parse_message_created_event(&body)?;
    let outcome = state
        .context
        .realtime()
        .handle_message_created(&event, Utc::now())
        .await?;
    Ok(Json(outcome))
}

pub(crate) async fn handle_announcement_created(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<AnnouncementReport>, ApiError> {
    authorize(&state, &headers)?;
    let announcement = parse_announcement_created_event(&body)?;
    let report = state
        .context
        .announcements()
        .handle_announcement_created(&announcement)
        .await?;
    Ok(Json(report))
}

pub(crate) async fn handle_sla_sweep(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<SweepReport>, ApiError> {
    authorize(&state, &headers)?;
    let report = state.context.sweep().run_once(Utc::now()).await?;
    Ok(Json(report))
}

pub(crate) async fn handle_set_account_disabled(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<AdminResponse>, ApiError> {
    authorize(&state, &headers)?;
    // The caller header is only trusted from a front end holding the bearer token.
    if state.bearer_token.is_none() {
        tracing::warn!("admin request refused: gateway has no bearer token configured");
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "admin_auth_required",
            "admin routes require a configured bearer token",
        ));
    }
    let body: AccountDisabledBody = serde_json::from_str(&body)
        .map_err(|error| ApiError::bad_request("invalid-argument", error.to_string()))?;
    let request = SetAccountDisabledRequest {
        caller_uid: header_value(&headers, CALLER_UID_HEADER),
        uid: body.uid,
        disabled: body.disabled,
    };
    let response = state.context.admin().set_account_disabled(&request).await?;
    Ok(Json(response))
}

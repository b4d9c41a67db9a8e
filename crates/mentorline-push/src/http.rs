//! HTTP v1 push provider transport.
//!
//! Each address is sent as its own `messages:send` call; the calls of one
//! multicast run concurrently and are folded into a single report.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use mentorline_types::{DeliveryPriority, NotificationPayload};
use reqwest::{redirect::Policy, StatusCode};
use serde_json::{json, Value};

use crate::{
    redact_address, AddressDeliveryResult, AddressDeliveryStatus, MulticastReport,
    MulticastRequest, PushTransport, PushTransportError,
};

const DETAIL_MAX_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDeliveryMode {
    /// Shapes requests and reports every address as delivered without I/O.
    DryRun,
    Provider,
}

impl PushDeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Provider => "provider",
        }
    }
}

impl std::str::FromStr for PushDeliveryMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "dry_run" | "dry-run" => Ok(Self::DryRun),
            "provider" => Ok(Self::Provider),
            other => Err(format!(
                "unsupported push mode '{other}' (expected dry_run or provider)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpPushConfig {
    pub mode: PushDeliveryMode,
    pub api_base: String,
    pub project_id: Option<String>,
    pub access_token: Option<String>,
    pub http_timeout_ms: u64,
}

impl Default for HttpPushConfig {
    fn default() -> Self {
        Self {
            mode: PushDeliveryMode::DryRun,
            api_base: "https://fcm.googleapis.com".to_string(),
            project_id: None,
            access_token: None,
            http_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpPushTransport {
    config: HttpPushConfig,
    client: Option<reqwest::Client>,
}

impl HttpPushTransport {
    pub fn new(config: HttpPushConfig) -> Result<Self, PushTransportError> {
        if config.mode == PushDeliveryMode::Provider && config.http_timeout_ms == 0 {
            return Err(PushTransportError::InvalidConfig(
                "provider mode requires http timeout > 0".to_string(),
            ));
        }
        let client = if config.mode == PushDeliveryMode::Provider {
            Some(
                reqwest::Client::builder()
                    .timeout(Duration::from_millis(config.http_timeout_ms))
                    .redirect(Policy::none())
                    .build()
                    .map_err(|error| {
                        PushTransportError::InvalidConfig(format!(
                            "failed to build push http client: {error}"
                        ))
                    })?,
            )
        } else {
            None
        };
        Ok(Self { config, client })
    }

    pub fn mode(&self) -> PushDeliveryMode {
        self.config.mode
    }

    fn endpoint(&self, project_id: &str) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.config.api_base.trim_end_matches('/'),
            project_id
        )
    }

    async fn send_one(
        &self,
        client: &reqwest::Client,
        endpoint: &str,
        access_token: &str,
        address: &str,
        payload: &NotificationPayload,
    ) -> AddressDeliveryResult {
        let body = build_message_body(address, payload);
        let response = match client
            .post(endpoint)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                return AddressDeliveryResult::failed(
                    address,
                    "delivery_transport_error",
                    error.to_string(),
                    true,
                );
            }
        };

        let status = response.status();
        let body_raw = response.text().await.unwrap_or_default();
        if status.is_success() {
            let body_json = serde_json::from_str::<Value>(&body_raw).unwrap_or(Value::Null);
            let mut result = AddressDeliveryResult::success(address, AddressDeliveryStatus::Sent);
            result.http_status = Some(status.as_u16());
            result.provider_message_id = body_json
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);
            return result;
        }

        let (reason_code, retryable) = classify_provider_status(status, &body_raw);
        let mut result = AddressDeliveryResult::failed(
            address,
            reason_code,
            truncate_detail(&body_raw),
            retryable,
        );
        result.http_status = Some(status.as_u16());
        result
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send_multicast(
        &self,
        request: &MulticastRequest,
    ) -> Result<MulticastReport, PushTransportError> {
        if request.addresses.is_empty() {
            return Ok(MulticastReport::default());
        }

        match self.config.mode {
            PushDeliveryMode::DryRun => {
                for address in &request.addresses {
                    tracing::debug!(
                        mode = self.config.mode.as_str(),
                        address = %redact_address(address),
                        kind = request.payload.kind.as_str(),
                        "push dry-run delivery"
                    );
                }
                Ok(MulticastReport::from_results(
                    request
                        .addresses
                        .iter()
                        .map(|address| {
                            AddressDeliveryResult::success(address, AddressDeliveryStatus::DryRun)
                        })
                        .collect(),
                ))
            }
            PushDeliveryMode::Provider => {
                let client = self.client.as_ref().ok_or_else(|| {
                    PushTransportError::Unavailable {
                        reason_code: "delivery_provider_client_unavailable".to_string(),
                        detail: "provider mode requested without initialized HTTP client"
                            .to_string(),
                        retryable: false,
                    }
                })?;
                let project_id = non_empty(self.config.project_id.as_deref())
                    .ok_or(PushTransportError::MissingCredential("project_id"))?;
                let access_token = non_empty(self.config.access_token.as_deref())
                    .ok_or(PushTransportError::MissingCredential("access_token"))?;
                let endpoint = self.endpoint(project_id);

                let results = join_all(request.addresses.iter().map(|address| {
                    self.send_one(
                        client,
                        &endpoint,
                        access_token,
                        address,
                        &request.payload,
                    )
                }))
                .await;
                for result in results.iter().filter(|result| !result.status.is_success()) {
                    tracing::debug!(
                        address = %redact_address(&result.address),
                        reason_code = result.reason_code.as_deref().unwrap_or_default(),
                        http_status = ?result.http_status,
                        "push address delivery failed"
                    );
                }
                Ok(MulticastReport::from_results(results))
            }
        }
    }
}

/// Provider message body for one address.
pub(crate) fn build_message_body(address: &str, payload: &NotificationPayload) -> Value {
    let mut message = json!({
        "token": address,
        "notification": {
            "title": payload.title,
            "body": payload.body,
        },
        "data": payload.data,
    });
    if payload.priority == DeliveryPriority::High {
        message["android"] = json!({ "priority": "high" });
        message["apns"] = json!({
            "headers": { "apns-priority": "10" },
            "payload": { "aps": { "content-available": 1 } },
        });
    }
    json!({ "message": message })
}

fn classify_provider_status(status: StatusCode, body: &str) -> (&'static str, bool) {
    if body.contains("UNREGISTERED") {
        return ("delivery_address_unregistered", false);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ("delivery_rate_limited", true);
    }
    if status.is_server_error() {
        return ("delivery_provider_unavailable", true);
    }
    if status.is_client_error() {
        return ("delivery_request_rejected", false);
    }
    ("delivery_unknown_http_failure", true)
}

fn truncate_detail(raw: &str) -> String {
    if raw.chars().count() <= DETAIL_MAX_CHARS {
        return raw.to_string();
    }
    raw.chars().take(DETAIL_MAX_CHARS).collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

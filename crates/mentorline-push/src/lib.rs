//! Push-notification transport for mentorline.
//!
//! A transport delivers one [`NotificationPayload`] to a batch of device
//! addresses and reports per-address outcomes. Individual address failures are
//! part of a successful report; only whole-batch failures surface as
//! [`PushTransportError`].

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

mod http;
mod recording;

pub use http::{HttpPushConfig, HttpPushTransport, PushDeliveryMode};
pub use mentorline_types::NotificationPayload;
pub use recording::RecordingPushTransport;

/// Whole-batch transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushTransportError {
    #[error("push transport misconfigured: {0}")]
    InvalidConfig(String),
    #[error("push provider credential missing: {0}")]
    MissingCredential(&'static str),
    #[error("reason_code={reason_code} retryable={retryable} detail={detail}")]
    Unavailable {
        reason_code: String,
        detail: String,
        retryable: bool,
    },
}

/// One payload addressed to many devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MulticastRequest {
    pub addresses: Vec<String>,
    pub payload: NotificationPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressDeliveryStatus {
    Sent,
    DryRun,
    Failed,
}

impl AddressDeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::DryRun => "dry_run",
            Self::Failed => "failed",
        }
    }

    pub fn is_success(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Outcome for one address of a multicast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressDeliveryResult {
    pub address: String,
    pub status: AddressDeliveryStatus,
    pub reason_code: Option<String>,
    pub detail: Option<String>,
    pub retryable: bool,
    pub http_status: Option<u16>,
    pub provider_message_id: Option<String>,
}

impl AddressDeliveryResult {
    pub fn success(address: impl Into<String>, status: AddressDeliveryStatus) -> Self {
        Self {
            address: address.into(),
            status,
            reason_code: None,
            detail: None,
            retryable: false,
            http_status: None,
            provider_message_id: None,
        }
    }

    pub fn failed(
        address: impl Into<String>,
        reason_code: impl Into<String>,
        detail: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            address: address.into(),
            status: AddressDeliveryStatus::Failed,
            reason_code: Some(reason_code.into()),
            detail: Some(detail.into()),
            retryable,
            http_status: None,
            provider_message_id: None,
        }
    }
}

/// Per-batch delivery counts plus per-address detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MulticastReport {
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<AddressDeliveryResult>,
}

impl MulticastReport {
    /// Builds a report whose counts agree with `results`.
    pub fn from_results(results: Vec<AddressDeliveryResult>) -> Self {
        let success_count = results
            .iter()
            .filter(|result| result.status.is_success())
            .count();
        Self {
            success_count,
            failure_count: results.len() - success_count,
            results,
        }
    }

    /// Report in which every address failed with the same reason.
    pub fn all_failed(addresses: &[String], reason_code: &str, detail: &str) -> Self {
        Self::from_results(
            addresses
                .iter()
                .map(|address| AddressDeliveryResult::failed(address, reason_code, detail, true))
                .collect(),
        )
    }

    pub fn attempted(&self) -> usize {
        self.success_count + self.failure_count
    }
}

/// Delivers multicast requests to a push provider.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send_multicast(
        &self,
        request: &MulticastRequest,
    ) -> Result<MulticastReport, PushTransportError>;
}

/// Masks a device address for logs, keeping only its last six characters.
pub fn redact_address(address: &str) -> String {
    let chars = address.chars().count();
    if chars <= 6 {
        return "***".to_string();
    }
    let tail: String = address.chars().skip(chars - 6).collect();
    format!("***{tail}")
}

#[cfg(test)]
mod tests {
    use super::{redact_address, AddressDeliveryResult, AddressDeliveryStatus, MulticastReport};

    #[test]
    fn redact_address_keeps_only_tail() {
        assert_eq!(redact_address("abcdefghijkl"), "***ghijkl");
        assert_eq!(redact_address("short"), "***");
    }

    #[test]
    fn report_counts_follow_results() {
        let report = MulticastReport::from_results(vec![
            AddressDeliveryResult::success("a", AddressDeliveryStatus::Sent),
            AddressDeliveryResult::success("b", AddressDeliveryStatus::DryRun),
            AddressDeliveryResult::failed("c", "delivery_request_rejected", "bad", false),
        ]);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.attempted(), 3);

        let failed = MulticastReport::all_failed(
            &["x".to_string(), "y".to_string()],
            "delivery_transport_error",
            "offline",
        );
        assert_eq!(failed.success_count, 0);
        assert_eq!(failed.failure_count, 2);
    }
}

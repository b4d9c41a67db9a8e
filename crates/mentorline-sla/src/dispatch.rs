use std::sync::Arc;

use mentorline_push::{redact_address, MulticastReport, MulticastRequest, PushTransport};
use mentorline_types::NotificationPayload;

/// Best-effort fan-out of one payload to a set of addresses.
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn PushTransport>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    /// Sends one multicast. Empty `addresses` is a no-op. Transport errors
    /// are folded into an all-failed report and never returned.
    pub async fn dispatch(
        &self,
        addresses: &[String],
        payload: NotificationPayload,
    ) -> MulticastReport {
        if addresses.is_empty() {
            return MulticastReport::default();
        }

        let kind = payload.kind.as_str();
        let request = MulticastRequest {
            addresses: addresses.to_vec(),
            payload,
        };
        let report = match self.transport.send_multicast(&request).await {
            Ok(report) => report,
            Err(error) => {
                tracing::warn!(
                    kind,
                    addresses = addresses.len(),
                    error = %error,
                    "push multicast failed"
                );
                return MulticastReport::all_failed(
                    addresses,
                    "delivery_transport_error",
                    &error.to_string(),
                );
            }
        };

        for failed in report
            .results
            .iter()
            .filter(|result| !result.status.is_success())
        {
            tracing::warn!(
                kind,
                address = %redact_address(&failed.address),
                reason_code = failed.reason_code.as_deref().unwrap_or("unknown"),
                retryable = failed.retryable,
                "push address delivery failed"
            );
        }
        tracing::debug!(
            kind,
            success_count = report.success_count,
            failure_count = report.failure_count,
            "push multicast sent"
        );
        report
    }
}

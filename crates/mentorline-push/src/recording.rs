use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    AddressDeliveryResult, AddressDeliveryStatus, MulticastReport, MulticastRequest,
    PushTransport, PushTransportError,
};

/// In-process transport that records every multicast it receives.
///
/// Addresses registered with [`Self::with_failing_address`] are reported as
/// failed; [`Self::with_transport_failure`] makes every call return an error.
#[derive(Debug, Default)]
pub struct RecordingPushTransport {
    requests: Mutex<Vec<MulticastRequest>>,
    failing_addresses: BTreeSet<String>,
    transport_failure: Option<String>,
}

impl RecordingPushTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_address(mut self, address: impl Into<String>) -> Self {
        self.failing_addresses.insert(address.into());
        self
    }

    pub fn with_transport_failure(mut self, detail: impl Into<String>) -> Self {
        self.transport_failure = Some(detail.into());
        self
    }

    /// Requests received so far, in call order.
    pub async fn requests(&self) -> Vec<MulticastRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Requests whose address list contains `address`.
    pub async fn requests_to(&self, address: &str) -> Vec<MulticastRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|request| request.addresses.iter().any(|item| item == address))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PushTransport for RecordingPushTransport {
    async fn send_multicast(
        &self,
        request: &MulticastRequest,
    ) -> Result<MulticastReport, PushTransportError> {
        self.requests.lock().await.push(request.clone());
        if let Some(detail) = &self.transport_failure {
            return Err(PushTransportError::Unavailable {
                reason_code: "delivery_transport_error".to_string(),
                detail: detail.clone(),
                retryable: true,
            });
        }

        Ok(MulticastReport::from_results(
            request
                .addresses
                .iter()
                .map(|address| {
                    if self.failing_addresses.contains(address) {
                        AddressDeliveryResult::failed(
                            address,
                            "delivery_request_rejected",
                            "address rejected by recording transport",
                            false,
                        )
                    } else {
                        AddressDeliveryResult::success(address, AddressDeliveryStatus::Sent)
                    }
                })
                .collect(),
        ))
    }
}

use mentorline_store::StoreError;
use thiserror::Error;

/// Result type for SLA engine operations.
pub type SlaResult<T> = Result<T, SlaError>;

/// Errors raised by the SLA engine.
///
/// Delivery failures are never errors; they are carried in delivery reports.
#[derive(Debug, Error)]
pub enum SlaError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid sla config: {0}")]
    InvalidConfig(String),
    #[error("invalid sweep schedule: {0}")]
    InvalidSchedule(String),
    #[error("an sla sweep is already running")]
    SweepInProgress,
    #[error("invalid trigger payload: {0}")]
    InvalidPayload(String),
    #[error("message '{conversation_id}/{message_id}' lacks timestamp or participant ids")]
    MalformedMessage {
        conversation_id: String,
        message_id: String,
    },
}

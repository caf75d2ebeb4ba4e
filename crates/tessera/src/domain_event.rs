use crate::message;
use chrono::{DateTime, Utc};
use std::fmt;

/// Marker trait for domain events that represent state changes within an
/// aggregate. The `event_type` tag is the fully qualified name the payload
/// mapper and the remote feed identify the event by.
pub trait DomainEvent: fmt::Debug + Clone + message::Message + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;
}

/// An event as it sits in the log. Sequence numbers are dense and start at 1
/// within one `(aggregate_type, aggregate_id)` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEvent {
    pub event_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub causation_id: String,
    pub correlation_id: Option<String>,
    pub seq_nr: u64,
    pub recorded_at: DateTime<Utc>,
    pub payload: Vec<u8>,
    pub event_type: String,
    pub event_version: u32,
}

impl PersistedEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: String,
        aggregate_type: String,
        aggregate_id: String,
        causation_id: String,
        correlation_id: Option<String>,
        seq_nr: u64,
        recorded_at: DateTime<Utc>,
        payload: Vec<u8>,
        event_type: String,
        event_version: u32,
    ) -> Self {
        Self {
            event_id,
            aggregate_type,
            aggregate_id,
            causation_id,
            correlation_id,
            seq_nr,
            recorded_at,
            payload,
            event_type,
            event_version,
        }
    }
}

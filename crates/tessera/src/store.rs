use crate::{
    command_record::CommandRecord,
    domain_event::PersistedEvent,
    event::{SequenceSelect, Stream},
    snapshot::PersistedSnapshot,
};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("optimistic lock error")]
    OptimisticLock,
    #[error("{0}")]
    Connection(Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("{0}")]
    Deserialization(Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("{0}")]
    Unknown(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            serde_json::error::Category::Data | serde_json::error::Category::Syntax => {
                Self::Deserialization(Box::new(err))
            }
            serde_json::error::Category::Io | serde_json::error::Category::Eof => Self::Unknown(Box::new(err)),
        }
    }
}

/// Trait that defines the capabilities of an event store backend. Blanket
/// implemented for anything providing all four capabilities.
pub trait EventStore:
    EventStreamer + SnapshotGetter + CommandRecordGetter + EventPersister + Send + Sync + 'static
{
}

impl<T> EventStore for T where
    T: EventStreamer + SnapshotGetter + CommandRecordGetter + EventPersister + Send + Sync + 'static
{
}

/// Trait for streaming one aggregate's events in ascending sequence order.
/// The returned stream is finite and may not be restarted.
pub trait EventStreamer: Send + Sync + 'static {
    fn stream_events(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        select: SequenceSelect,
    ) -> Stream<'_, PersistedEvent, PersistenceError>;
}

/// Trait for retrieving the latest snapshot of an aggregate, if any.
#[async_trait]
pub trait SnapshotGetter: Send + Sync + 'static {
    async fn get_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Option<PersistedSnapshot>, PersistenceError>;
}

/// Trait for looking up the record of a previously handled command.
#[async_trait]
pub trait CommandRecordGetter: Send + Sync + 'static {
    async fn get_command_record(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        command_id: &str,
    ) -> Result<Option<CommandRecord>, PersistenceError>;
}

/// Trait for appending events, with the snapshot and command record that
/// belong to the same unit of work.
///
/// The caller hands over finished records: sequence numbers, causation and
/// correlation ids, and timestamps are already assigned. Implementations must
/// fail with [`PersistenceError::OptimisticLock`] when the log's current
/// high-water mark differs from `expected_seq_nr`.
#[async_trait]
pub trait EventPersister: Send + Sync + 'static {
    async fn persist(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        events: &[PersistedEvent],
        expected_seq_nr: u64,
        snapshot: Option<&PersistedSnapshot>,
        command_record: Option<&CommandRecord>,
    ) -> Result<(), PersistenceError>;
}

use crate::store::PersistenceError;
use async_trait::async_trait;

/// Position of a subscription in the remote feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetState {
    /// The subscription has never processed an event.
    NoOffset,
    /// Offset of the last event processed.
    LastProcessed(u64),
}

/// Per-subscription offset persistence. `save_offset` must be durable before
/// it returns. Stale saves are permitted; the consumer keeps offsets
/// monotone by processing events in ascending offset order.
#[async_trait]
pub trait OffsetStore: Send + Sync + 'static {
    async fn get_offset(&self, subscription_name: &str) -> Result<OffsetState, PersistenceError>;

    async fn save_offset(&self, subscription_name: &str, value: u64) -> Result<(), PersistenceError>;
}

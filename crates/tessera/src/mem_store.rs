use crate::{
    command_record::CommandRecord,
    domain_event::PersistedEvent,
    event::{SequenceSelect, Stream},
    snapshot::PersistedSnapshot,
    store::{CommandRecordGetter, EventPersister, EventStreamer, PersistenceError, SnapshotGetter},
    subscription::offset::{OffsetState, OffsetStore},
};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

fn log_key(aggregate_type: &str, aggregate_id: &str) -> String {
    format!("{aggregate_type}:{aggregate_id}")
}

fn command_key(aggregate_type: &str, aggregate_id: &str, command_id: &str) -> String {
    format!("{aggregate_type}:{aggregate_id}:{command_id}")
}

/// Memory-based event store for testing and development. Clones share the
/// underlying maps.
#[derive(Clone, Default)]
pub struct MemoryEventStore {
    events: Arc<RwLock<HashMap<String, Vec<PersistedEvent>>>>,
    snapshots: Arc<RwLock<HashMap<String, PersistedSnapshot>>>,
    command_records: Arc<RwLock<HashMap<String, CommandRecord>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events currently stored for one aggregate, in sequence order.
    pub fn events_for(&self, aggregate_type: &str, aggregate_id: &str) -> Vec<PersistedEvent> {
        let events = self.events.read().unwrap();
        events
            .get(&log_key(aggregate_type, aggregate_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Drops every event with `seq_nr <= through`. Snapshot rehydration is
    /// expected to cover the removed prefix.
    pub fn delete_events_through(&self, aggregate_type: &str, aggregate_id: &str, through: u64) {
        let mut events = self.events.write().unwrap();
        if let Some(log) = events.get_mut(&log_key(aggregate_type, aggregate_id)) {
            log.retain(|event| event.seq_nr > through);
        }
    }

    fn high_water_mark(&self, aggregate_type: &str, aggregate_id: &str) -> u64 {
        let from_events = self
            .events
            .read()
            .unwrap()
            .get(&log_key(aggregate_type, aggregate_id))
            .and_then(|log| log.last().map(|event| event.seq_nr))
            .unwrap_or(0);
        let from_snapshot = self
            .snapshots
            .read()
            .unwrap()
            .get(&log_key(aggregate_type, aggregate_id))
            .map(|snapshot| snapshot.version)
            .unwrap_or(0);
        from_events.max(from_snapshot)
    }
}

impl EventStreamer for MemoryEventStore {
    fn stream_events(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        select: SequenceSelect,
    ) -> Stream<'_, PersistedEvent, PersistenceError> {
        let events = self.events.read().unwrap();
        let selected: Vec<PersistedEvent> = events
            .get(&log_key(aggregate_type, aggregate_id))
            .map(|log| log.iter().filter(|event| select.matches(event.seq_nr)).cloned().collect())
            .unwrap_or_default();

        Box::pin(stream::iter(selected.into_iter().map(Ok)))
    }
}

#[async_trait]
impl SnapshotGetter for MemoryEventStore {
    async fn get_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Option<PersistedSnapshot>, PersistenceError> {
        let snapshots = self.snapshots.read().unwrap();
        Ok(snapshots.get(&log_key(aggregate_type, aggregate_id)).cloned())
    }
}

#[async_trait]
impl CommandRecordGetter for MemoryEventStore {
    async fn get_command_record(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        command_id: &str,
    ) -> Result<Option<CommandRecord>, PersistenceError> {
        let records = self.command_records.read().unwrap();
        Ok(records.get(&command_key(aggregate_type, aggregate_id, command_id)).cloned())
    }
}

#[async_trait]
impl EventPersister for MemoryEventStore {
    async fn persist(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        events: &[PersistedEvent],
        expected_seq_nr: u64,
        snapshot: Option<&PersistedSnapshot>,
        command_record: Option<&CommandRecord>,
    ) -> Result<(), PersistenceError> {
        if self.high_water_mark(aggregate_type, aggregate_id) != expected_seq_nr {
            return Err(PersistenceError::OptimisticLock);
        }

        if !events.is_empty() {
            let mut all = self.events.write().unwrap();
            all.entry(log_key(aggregate_type, aggregate_id))
                .or_default()
                .extend(events.iter().cloned());
        }

        if let Some(snapshot) = snapshot {
            let mut snapshots = self.snapshots.write().unwrap();
            snapshots.insert(log_key(aggregate_type, aggregate_id), snapshot.clone());
        }

        if let Some(record) = command_record {
            let mut records = self.command_records.write().unwrap();
            records.insert(
                command_key(aggregate_type, aggregate_id, &record.command_id),
                record.clone(),
            );
        }

        Ok(())
    }
}

/// Memory-based offset store for testing and development.
#[derive(Clone, Default)]
pub struct MemoryOffsetStore {
    offsets: Arc<RwLock<HashMap<String, u64>>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn get_offset(&self, subscription_name: &str) -> Result<OffsetState, PersistenceError> {
        let offsets = self.offsets.read().unwrap();
        Ok(offsets
            .get(subscription_name)
            .copied()
            .map_or(OffsetState::NoOffset, OffsetState::LastProcessed))
    }

    async fn save_offset(&self, subscription_name: &str, value: u64) -> Result<(), PersistenceError> {
        let mut offsets = self.offsets.write().unwrap();
        offsets.insert(subscription_name.to_string(), value);
        Ok(())
    }
}

//! Tessera is an event-sourced aggregate runtime: commands are dispatched
//! through per-state behaviors against a persistent event log, with
//! snapshots, command deduplication, and optimistic concurrency. A companion
//! consumer polls a remote bounded context's event feed over HTTP and
//! dispatches decoded events to registered handlers, tracking one offset per
//! subscription.

pub mod aggregate;
pub mod aggregate_id;
pub mod behavior;
pub mod command_record;
pub mod config;
pub mod domain_event;
pub mod event;
pub mod mapper;
pub mod mem_store;
pub mod message;
pub mod reporter;
pub mod runtime;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod subscription;

pub use aggregate::Aggregate;
pub use aggregate_id::{AggregateId, EventId};
pub use behavior::{Behavior, BehaviorBuilder, Receive};
pub use command_record::CommandRecord;
pub use config::{EdenPolicy, EventSourcingConfig, HttpEventSourceConfig, SubscriptionConfig};
pub use domain_event::{DomainEvent, PersistedEvent};
pub use event::SequenceSelect;
pub use mapper::{EventMapping, EventPayloadMapper, MapperBuilder, MapperError, Migration};
pub use mem_store::{MemoryEventStore, MemoryOffsetStore};
pub use message::{CommandEnvelope, Message};
pub use reporter::{CommandReporter, Reporters, SubscriptionReporter};
pub use runtime::{AggregateRoot, AggregateRuntime, CommandResult, Rejection, RuntimeError};
pub use scheduler::{Job, JobError, Scheduler};
pub use snapshot::PersistedSnapshot;
pub use store::{CommandRecordGetter, EventPersister, EventStore, EventStreamer, PersistenceError, SnapshotGetter};
pub use subscription::{
    EventSourceConsumer, FeedClient, FeedEvent, FeedPage, FeedPosition, FeedQuery, HandlerError, HttpFeedClient,
    OffsetState, OffsetStore, SubscribeError, SubscriptionHandler,
};

use crate::{
    aggregate::Aggregate,
    aggregate_id::{AggregateId, EventId},
    behavior::Receive,
    command_record::CommandRecord,
    config::EventSourcingConfig,
    domain_event::{DomainEvent, PersistedEvent},
    event::SequenceSelect,
    mapper::{EventPayloadMapper, MapperError},
    message::{CommandEnvelope, Message},
    reporter::{CommandReporter, Reporters},
    snapshot::PersistedSnapshot,
    store::{EventStore, PersistenceError},
};
use chrono::Utc;
use futures::TryStreamExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use ulid::Ulid;

/// A rejection is a normal, typed outcome of handling a command.
#[derive(Debug, thiserror::Error)]
pub enum Rejection<E: std::error::Error> {
    #[error("command is not supported before the aggregate exists")]
    UnsupportedInEden,
    #[error(transparent)]
    Domain(E),
}

/// Failures that are not business outcomes: programmer errors, backend
/// trouble, and mapper misconfiguration.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("command {command_type} is not supported by the current behavior")]
    UnsupportedCommand { command_type: String },
    #[error("event {event_type} is not supported by the current behavior")]
    UnsupportedEvent { event_type: String },
    #[error("aggregate instance already exists")]
    AggregateAlreadyExists,
    #[error(transparent)]
    Store(#[from] PersistenceError),
    #[error(transparent)]
    Mapper(#[from] MapperError),
}

/// Outcome of processing one command envelope.
pub enum CommandResult<A: Aggregate> {
    /// The command was accepted and its events appended, or answered from a
    /// previously recorded run when `deduplicated` is set.
    Success {
        events: Vec<A::Event>,
        deduplicated: bool,
    },
    /// The command was refused; nothing was appended.
    Rejection(Rejection<A::Rejection>),
    /// Another writer appended first. The caller may retry.
    ConcurrentModification,
    UnexpectedError(RuntimeError),
}

impl<A: Aggregate> fmt::Debug for CommandResult<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Success { events, deduplicated } => f
                .debug_struct("Success")
                .field("events", events)
                .field("deduplicated", deduplicated)
                .finish(),
            CommandResult::Rejection(rejection) => f.debug_tuple("Rejection").field(rejection).finish(),
            CommandResult::ConcurrentModification => write!(f, "ConcurrentModification"),
            CommandResult::UnexpectedError(err) => f.debug_tuple("UnexpectedError").field(err).finish(),
        }
    }
}

struct Hydrated<A: Aggregate> {
    state: A::State,
    high_water_mark: u64,
    version_at_last_snapshot: u64,
}

/// The aggregate runtime: rehydrates state from snapshot and log, dedups
/// repeated command ids, dispatches through the behavior for the current
/// state, and appends under optimistic concurrency.
///
/// Commands against the same aggregate id are serialized internally; commands
/// against different ids run concurrently.
pub struct AggregateRuntime<A: Aggregate, S: EventStore> {
    store: Arc<S>,
    mapper: Arc<EventPayloadMapper<A::Event>>,
    config: EventSourcingConfig,
    reporters: Reporters<dyn CommandReporter>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<A: Aggregate, S: EventStore> AggregateRuntime<A, S> {
    pub fn new(store: Arc<S>, mapper: Arc<EventPayloadMapper<A::Event>>, config: EventSourcingConfig) -> Self {
        Self {
            store,
            mapper,
            config,
            reporters: Reporters::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_reporter(&self, reporter: Arc<dyn CommandReporter>) {
        self.reporters.register(reporter);
    }

    pub fn aggregate_root_of(&self, id: impl Into<AggregateId>) -> AggregateRoot<'_, A, S> {
        AggregateRoot {
            runtime: self,
            id: id.into(),
        }
    }

    fn lock_handle(&self, id: &AggregateId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn execute(&self, id: &AggregateId, envelope: CommandEnvelope<A::Command>) -> CommandResult<A> {
        let lock = self.lock_handle(id);
        let _guard = lock.lock().await;

        self.reporters
            .notify(|r| r.command_received(A::TYPE, id.as_str(), envelope.command.name()));

        let result = match self.try_process(id, &envelope).await {
            Ok(result) => result,
            Err(err) => CommandResult::UnexpectedError(err),
        };

        match &result {
            CommandResult::Success {
                deduplicated: true, ..
            } => {
                if let Some(command_id) = &envelope.command_id {
                    self.reporters
                        .notify(|r| r.command_deduplicated(A::TYPE, id.as_str(), command_id));
                }
            }
            CommandResult::Rejection(rejection) => {
                let reason = rejection.to_string();
                self.reporters
                    .notify(|r| r.command_rejected(A::TYPE, id.as_str(), &reason));
            }
            CommandResult::UnexpectedError(RuntimeError::Store(err)) => {
                let error = err.to_string();
                self.reporters.notify(|r| r.backend_error(A::TYPE, id.as_str(), &error));
            }
            _ => {}
        }

        result
    }

    async fn try_process(
        &self,
        id: &AggregateId,
        envelope: &CommandEnvelope<A::Command>,
    ) -> Result<CommandResult<A>, RuntimeError> {
        let dedup_threshold = self.config.command_dedup_threshold_for(A::TYPE);
        let record = match &envelope.command_id {
            Some(command_id) if dedup_threshold > 0 => {
                self.store
                    .get_command_record(A::TYPE, id.as_str(), command_id)
                    .await?
            }
            _ => None,
        };

        // A keep-forever horizon answers from the record without touching
        // the log tail.
        if let Some(record) = &record {
            if dedup_threshold == u64::MAX {
                let events = self.replay_recorded(id, record).await?;
                return Ok(CommandResult::Success {
                    events,
                    deduplicated: true,
                });
            }
        }

        let hydrated = self.rehydrate(id).await?;

        if let Some(record) = &record {
            if hydrated.high_water_mark.saturating_sub(record.last_seq_nr) <= dedup_threshold {
                let events = self.replay_recorded(id, record).await?;
                return Ok(CommandResult::Success {
                    events,
                    deduplicated: true,
                });
            }
        }

        let exists = hydrated.high_water_mark > 0;
        let behavior = if exists {
            A::behavior_for(&hydrated.state)
        } else {
            A::eden_behavior()
        };

        let events = match behavior.receive(&hydrated.state, &envelope.command) {
            Receive::Accept(events) => events,
            Receive::Reject(rejection) => {
                return Ok(CommandResult::Rejection(Rejection::Domain(rejection)));
            }
            Receive::Unhandled if !exists => {
                return Ok(CommandResult::Rejection(Rejection::UnsupportedInEden));
            }
            Receive::Unhandled => {
                // Tell an eden-only command replayed against a live instance
                // apart from a command nothing handles at all.
                let eden = A::eden_behavior().receive(&A::initial_state(), &envelope.command);
                return Err(if matches!(eden, Receive::Unhandled) {
                    RuntimeError::UnsupportedCommand {
                        command_type: envelope.command.name().to_string(),
                    }
                } else {
                    RuntimeError::AggregateAlreadyExists
                });
            }
        };

        if events.is_empty() {
            return Ok(CommandResult::Success {
                events,
                deduplicated: false,
            });
        }

        // Fold the new events before anything is appended. An event without
        // an apply clause must not leave a partial append behind.
        let mut state = hydrated.state.clone();
        let mut instance_exists = exists;
        for event in &events {
            let behavior = if instance_exists {
                A::behavior_for(&state)
            } else {
                A::eden_behavior()
            };
            state = behavior
                .apply(&state, event)
                .ok_or_else(|| RuntimeError::UnsupportedEvent {
                    event_type: event.event_type().to_string(),
                })?;
            instance_exists = true;
        }

        let new_high_water_mark = hydrated.high_water_mark + events.len() as u64;
        let snapshot_threshold = self.config.snapshot_threshold_for(A::TYPE);
        let snapshot = if snapshot_threshold > 0
            && new_high_water_mark - hydrated.version_at_last_snapshot >= snapshot_threshold
        {
            let state_bytes = serde_json::to_vec(&state).map_err(PersistenceError::from)?;
            Some(PersistedSnapshot::new(
                A::TYPE.to_string(),
                id.to_string(),
                state_bytes,
                new_high_water_mark,
            ))
        } else {
            None
        };

        let causation_id = envelope
            .command_id
            .clone()
            .unwrap_or_else(|| Ulid::new().to_string());
        let recorded_at = Utc::now();
        let mut persisted = Vec::with_capacity(events.len());
        for (index, event) in events.iter().enumerate() {
            let payload = self.mapper.serialize(event)?;
            persisted.push(PersistedEvent::new(
                EventId::new().to_string(),
                A::TYPE.to_string(),
                id.to_string(),
                causation_id.clone(),
                envelope.correlation_id.clone(),
                hydrated.high_water_mark + 1 + index as u64,
                recorded_at,
                payload.bytes,
                payload.type_name,
                payload.version,
            ));
        }

        let command_record = envelope.command_id.as_ref().map(|command_id| {
            CommandRecord::new(
                command_id.clone(),
                envelope.command.name().to_string(),
                hydrated.high_water_mark + 1,
                new_high_water_mark,
                persisted.iter().map(|event| event.event_id.clone()).collect(),
            )
        });

        match self
            .store
            .persist(
                A::TYPE,
                id.as_str(),
                &persisted,
                hydrated.high_water_mark,
                snapshot.as_ref(),
                command_record.as_ref(),
            )
            .await
        {
            Ok(()) => {
                self.reporters
                    .notify(|r| r.events_persisted(A::TYPE, id.as_str(), persisted.len(), new_high_water_mark));
                if let Some(snapshot) = &snapshot {
                    self.reporters
                        .notify(|r| r.snapshot_saved(A::TYPE, id.as_str(), snapshot.version));
                }
                Ok(CommandResult::Success {
                    events,
                    deduplicated: false,
                })
            }
            Err(PersistenceError::OptimisticLock) => Ok(CommandResult::ConcurrentModification),
            Err(err) => Err(RuntimeError::Store(err)),
        }
    }

    async fn rehydrate(&self, id: &AggregateId) -> Result<Hydrated<A>, RuntimeError> {
        let snapshot = self.store.get_snapshot(A::TYPE, id.as_str()).await?;
        let (mut state, version_at_last_snapshot) = match snapshot {
            Some(snapshot) => {
                let state = serde_json::from_slice(&snapshot.state).map_err(PersistenceError::from)?;
                (state, snapshot.version)
            }
            None => (A::initial_state(), 0),
        };
        let mut high_water_mark = version_at_last_snapshot;

        let mut events =
            self.store
                .stream_events(A::TYPE, id.as_str(), SequenceSelect::From(version_at_last_snapshot + 1));
        while let Some(persisted) = events.try_next().await? {
            let event = self
                .mapper
                .deserialize(&persisted.event_type, persisted.event_version, &persisted.payload)?;
            let behavior = if high_water_mark == 0 {
                A::eden_behavior()
            } else {
                A::behavior_for(&state)
            };
            state = behavior
                .apply(&state, &event)
                .ok_or_else(|| RuntimeError::UnsupportedEvent {
                    event_type: persisted.event_type.clone(),
                })?;
            high_water_mark = persisted.seq_nr;
        }

        Ok(Hydrated {
            state,
            high_water_mark,
            version_at_last_snapshot,
        })
    }

    async fn replay_recorded(&self, id: &AggregateId, record: &CommandRecord) -> Result<Vec<A::Event>, RuntimeError> {
        let mut events = Vec::with_capacity(record.event_ids.len());
        let mut stream = self.store.stream_events(
            A::TYPE,
            id.as_str(),
            SequenceSelect::Between(record.first_seq_nr, record.last_seq_nr),
        );
        while let Some(persisted) = stream.try_next().await? {
            events.push(
                self.mapper
                    .deserialize(&persisted.event_type, persisted.event_version, &persisted.payload)?,
            );
        }
        Ok(events)
    }
}

/// Handle on one aggregate instance, obtained from
/// [`AggregateRuntime::aggregate_root_of`].
pub struct AggregateRoot<'a, A: Aggregate, S: EventStore> {
    runtime: &'a AggregateRuntime<A, S>,
    id: AggregateId,
}

impl<A: Aggregate, S: EventStore> AggregateRoot<'_, A, S> {
    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    pub async fn handle_command(&self, command: A::Command) -> CommandResult<A> {
        self.runtime.execute(&self.id, CommandEnvelope::from(command)).await
    }

    pub async fn handle_command_envelope(
        &self,
        command: A::Command,
        command_id: impl Into<String>,
    ) -> CommandResult<A> {
        self.runtime
            .execute(&self.id, CommandEnvelope::new(command, command_id))
            .await
    }

    pub async fn handle_envelope(&self, envelope: CommandEnvelope<A::Command>) -> CommandResult<A> {
        self.runtime.execute(&self.id, envelope).await
    }

    /// The instance's current state, or `None` while no event has been
    /// appended yet.
    pub async fn current_state(&self) -> Result<Option<A::State>, RuntimeError> {
        let hydrated = self.runtime.rehydrate(&self.id).await?;
        Ok((hydrated.high_water_mark > 0).then_some(hydrated.state))
    }
}

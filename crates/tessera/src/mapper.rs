use crate::domain_event::DomainEvent;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("no serializer registered for event type {event_type}")]
    MissingSerializer { event_type: String },
    #[error("no deserializer registered for {type_name} v{version}")]
    MissingDeserializer { type_name: String, version: u32 },
    #[error("event type {event_type} is not registered")]
    UnknownEventType { event_type: String },
    #[error("unparseable payload: {cause}")]
    UnparseablePayload { cause: String, raw: Vec<u8> },
    #[error("migration of {type_name} v{version} failed: {cause}")]
    MigrationFailed {
        type_name: String,
        version: u32,
        cause: String,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TransformFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;
pub type SerializeFn<E> = Box<dyn Fn(&E) -> Result<Value, serde_json::Error> + Send + Sync>;
pub type DeserializeFn<E> = Box<dyn Fn(Value) -> Result<E, serde_json::Error> + Send + Sync>;

/// One step in an event type's migration chain. Migrations are ordered oldest
/// first; step `i` upgrades an encoded payload from version `i + 1` to
/// version `i + 2`.
pub enum Migration {
    /// Reshapes the payload without renaming the type.
    Format { transform: TransformFn },
    /// Renames the type while bumping the version, optionally reshaping the
    /// payload as well.
    Renamed {
        previous_type_name: String,
        transform: Option<TransformFn>,
    },
}

impl Migration {
    pub fn format(transform: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static) -> Self {
        Self::Format {
            transform: Arc::new(transform),
        }
    }

    pub fn renamed(previous_type_name: impl Into<String>) -> Self {
        Self::Renamed {
            previous_type_name: previous_type_name.into(),
            transform: None,
        }
    }

    pub fn renamed_with(
        previous_type_name: impl Into<String>,
        transform: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self::Renamed {
            previous_type_name: previous_type_name.into(),
            transform: Some(Arc::new(transform)),
        }
    }

    fn transform(&self) -> Option<TransformFn> {
        match self {
            Migration::Format { transform } => Some(transform.clone()),
            Migration::Renamed { transform, .. } => transform.clone(),
        }
    }
}

/// Registration of one event type: its current fully qualified name, a
/// serialize and deserialize pair for the current version, and the migration
/// chain leading up to it. The current version is `migrations.len() + 1`.
pub struct EventMapping<E> {
    type_name: String,
    tag: Option<String>,
    serialize: SerializeFn<E>,
    deserialize: DeserializeFn<E>,
    migrations: Vec<Migration>,
}

impl<E> EventMapping<E> {
    pub fn new(
        type_name: impl Into<String>,
        serialize: impl Fn(&E) -> Result<Value, serde_json::Error> + Send + Sync + 'static,
        deserialize: impl Fn(Value) -> Result<E, serde_json::Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            tag: None,
            serialize: Box::new(serialize),
            deserialize: Box::new(deserialize),
            migrations: Vec::new(),
        }
    }

    /// Sets the coarse feed tag this type is published under. Defaults to the
    /// type name itself.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }
}

impl<E: Serialize + DeserializeOwned> EventMapping<E> {
    /// Convenience registration that round-trips the whole event through its
    /// serde representation.
    pub fn via_serde(type_name: impl Into<String>) -> Self {
        Self::new(
            type_name,
            |event| serde_json::to_value(event),
            |value| serde_json::from_value(value),
        )
    }
}

/// The serialized form of an event: payload bytes plus the pair that selects
/// the deserializer on the way back in. Content type is JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedPayload {
    pub bytes: Vec<u8>,
    pub type_name: String,
    pub version: u32,
}

struct CurrentSerializer<E> {
    version: u32,
    tag: String,
    serialize: SerializeFn<E>,
}

struct VersionedDeserializer<E> {
    transforms: Vec<TransformFn>,
    deserialize: Arc<DeserializeFn<E>>,
}

pub struct MapperBuilder<E> {
    mappings: Vec<EventMapping<E>>,
}

impl<E> Default for MapperBuilder<E> {
    fn default() -> Self {
        Self { mappings: Vec::new() }
    }
}

impl<E: DomainEvent> MapperBuilder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn event(mut self, mapping: EventMapping<E>) -> Self {
        self.mappings.push(mapping);
        self
    }

    pub fn build(self) -> EventPayloadMapper<E> {
        let mut serializers = HashMap::new();
        let mut deserializers = HashMap::new();

        for mapping in self.mappings {
            let current_version = mapping.migrations.len() as u32 + 1;

            // Walk the chain backwards to recover the name each historical
            // version was recorded under.
            let mut name = mapping.type_name.clone();
            let mut names = vec![name.clone()];
            for migration in mapping.migrations.iter().rev() {
                if let Migration::Renamed { previous_type_name, .. } = migration {
                    name = previous_type_name.clone();
                }
                names.push(name.clone());
            }
            names.reverse();

            let transforms: Vec<Option<TransformFn>> =
                mapping.migrations.iter().map(Migration::transform).collect();
            let deserialize = Arc::new(mapping.deserialize);

            for version in 1..=current_version {
                let chain: Vec<TransformFn> = transforms[(version - 1) as usize..]
                    .iter()
                    .flatten()
                    .cloned()
                    .collect();
                deserializers.insert(
                    (names[(version - 1) as usize].clone(), version),
                    VersionedDeserializer {
                        transforms: chain,
                        deserialize: deserialize.clone(),
                    },
                );
            }

            let tag = mapping.tag.unwrap_or_else(|| mapping.type_name.clone());
            serializers.insert(
                mapping.type_name,
                CurrentSerializer {
                    version: current_version,
                    tag,
                    serialize: mapping.serialize,
                },
            );
        }

        EventPayloadMapper {
            serializers,
            deserializers,
        }
    }
}

/// Bidirectional map between domain events and their serialized wire form,
/// with per-type version migration chains. Immutable once built; the composed
/// transform for every historical `(type_name, version)` pair is precomputed
/// at build time.
pub struct EventPayloadMapper<E> {
    serializers: HashMap<String, CurrentSerializer<E>>,
    deserializers: HashMap<(String, u32), VersionedDeserializer<E>>,
}

impl<E: DomainEvent> EventPayloadMapper<E> {
    pub fn builder() -> MapperBuilder<E> {
        MapperBuilder::new()
    }

    /// Serializes an event, always emitting the current `(type_name, version)`
    /// pair.
    pub fn serialize(&self, event: &E) -> Result<MappedPayload, MapperError> {
        let type_name = event.event_type();
        let registered = self
            .serializers
            .get(type_name)
            .ok_or_else(|| MapperError::MissingSerializer {
                event_type: type_name.to_string(),
            })?;
        let value = (registered.serialize)(event)?;
        Ok(MappedPayload {
            bytes: serde_json::to_vec(&value)?,
            type_name: type_name.to_string(),
            version: registered.version,
        })
    }

    /// Deserializes a payload recorded under any historical `(type_name,
    /// version)` pair, running the composed migration chain up to the current
    /// version first.
    pub fn deserialize(&self, type_name: &str, version: u32, bytes: &[u8]) -> Result<E, MapperError> {
        let registered = self
            .deserializers
            .get(&(type_name.to_string(), version))
            .ok_or_else(|| MapperError::MissingDeserializer {
                type_name: type_name.to_string(),
                version,
            })?;
        let value = serde_json::from_slice(bytes).map_err(|err| MapperError::UnparseablePayload {
            cause: err.to_string(),
            raw: bytes.to_vec(),
        })?;
        let migrated = self.run_chain(registered, type_name, version, value)?;
        (registered.deserialize)(migrated).map_err(|err| MapperError::UnparseablePayload {
            cause: err.to_string(),
            raw: bytes.to_vec(),
        })
    }

    /// Decodes a payload that is already a JSON value at the current version,
    /// as delivered by the remote event feed.
    pub fn deserialize_current(&self, type_name: &str, payload: Value) -> Result<E, MapperError> {
        let registered = self
            .serializers
            .get(type_name)
            .ok_or_else(|| MapperError::UnknownEventType {
                event_type: type_name.to_string(),
            })?;
        let deserializer = self
            .deserializers
            .get(&(type_name.to_string(), registered.version))
            .ok_or_else(|| MapperError::MissingDeserializer {
                type_name: type_name.to_string(),
                version: registered.version,
            })?;
        (deserializer.deserialize)(payload.clone()).map_err(|err| MapperError::UnparseablePayload {
            cause: err.to_string(),
            raw: serde_json::to_vec(&payload).unwrap_or_default(),
        })
    }

    /// Resolves the feed tag an event type was registered under.
    pub fn tag_for(&self, type_name: &str) -> Option<&str> {
        self.serializers.get(type_name).map(|s| s.tag.as_str())
    }

    fn run_chain(
        &self,
        registered: &VersionedDeserializer<E>,
        type_name: &str,
        version: u32,
        mut value: Value,
    ) -> Result<Value, MapperError> {
        for transform in &registered.transforms {
            value = transform(value).map_err(|cause| MapperError::MigrationFailed {
                type_name: type_name.to_string(),
                version,
                cause,
            })?;
        }
        Ok(value)
    }
}

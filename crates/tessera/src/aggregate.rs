use crate::{behavior::Behavior, domain_event::DomainEvent, message::Message};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Trait that declares an aggregate: its identity, the commands and events it
/// speaks, its state variants, and the behavior installed for each of them.
///
/// State is a tagged enum whose variants select behaviors. `initial_state`
/// is the marker an instance carries before its first event is appended; the
/// behavior handling commands at that point is `eden_behavior`, and it is the
/// only behavior that may accept commands on a nonexistent instance. Once any
/// event is in the log, dispatch goes through `behavior_for`.
pub trait Aggregate: Sized + Send + Sync + 'static {
    const TYPE: &'static str;
    type Command: Message + fmt::Debug + Send + Sync + 'static;
    type Event: DomainEvent;
    type State: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Rejection: std::error::Error + Send + Sync + 'static;

    /// The state of an instance that does not exist yet.
    fn initial_state() -> Self::State;

    /// The behavior that applies before any event has been appended.
    fn eden_behavior() -> Behavior<Self>;

    /// Selects the behavior for the current state variant.
    fn behavior_for(state: &Self::State) -> Behavior<Self>;
}

pub trait Message {
    fn name(&self) -> &'static str;
}

/// A command together with the identifiers the runtime dedups and traces by.
///
/// Commands submitted without a `command_id` are never deduplicated. The
/// optional `correlation_id` is propagated unchanged onto every event the
/// command emits.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope<C> {
    pub command: C,
    pub command_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl<C> CommandEnvelope<C> {
    pub fn new(command: C, command_id: impl Into<String>) -> Self {
        Self {
            command,
            command_id: Some(command_id.into()),
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

impl<C> From<C> for CommandEnvelope<C> {
    fn from(command: C) -> Self {
        Self {
            command,
            command_id: None,
            correlation_id: None,
        }
    }
}

/// Record of one handled command, stored next to the event log and keyed by
/// `(aggregate_type, aggregate_id, command_id)`. A repeat of the same command
/// id within the dedup horizon is answered from the `first_seq_nr ..=
/// last_seq_nr` range instead of being executed again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub command_id: String,
    pub command_type: String,
    pub first_seq_nr: u64,
    pub last_seq_nr: u64,
    pub event_ids: Vec<String>,
}

impl CommandRecord {
    pub fn new(
        command_id: String,
        command_type: String,
        first_seq_nr: u64,
        last_seq_nr: u64,
        event_ids: Vec<String>,
    ) -> Self {
        Self {
            command_id,
            command_type,
            first_seq_nr,
            last_seq_nr,
            event_ids,
        }
    }
}

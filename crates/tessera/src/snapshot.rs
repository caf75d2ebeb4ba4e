/// Materialized aggregate state. `version` is the sequence number of the last
/// event folded into `state`; rehydration resumes the log from `version + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSnapshot {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub state: Vec<u8>,
    pub version: u64,
}

impl PersistedSnapshot {
    pub fn new(aggregate_type: String, aggregate_id: String, state: Vec<u8>, version: u64) -> Self {
        Self {
            aggregate_type,
            aggregate_id,
            state,
            version,
        }
    }
}

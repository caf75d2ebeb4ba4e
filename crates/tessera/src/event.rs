use futures::stream::BoxStream;

pub type Stream<'a, T, Err> = BoxStream<'a, Result<T, Err>>;

/// Selects which slice of an aggregate's event log to stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSelect {
    All,
    /// Events with `seq_nr >= from`.
    From(u64),
    /// Events with `from <= seq_nr <= to`. Used to re-read the exact range a
    /// previously recorded command emitted.
    Between(u64, u64),
}

impl SequenceSelect {
    pub fn matches(&self, seq_nr: u64) -> bool {
        match *self {
            SequenceSelect::All => true,
            SequenceSelect::From(from) => seq_nr >= from,
            SequenceSelect::Between(from, to) => seq_nr >= from && seq_nr <= to,
        }
    }
}

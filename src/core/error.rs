use crate::core::entry::EntryId;

/// Errors surfaced by store and loop operations.
///
/// Absent delete/ack targets are not errors: those operations report them as
/// `Ok(false)` because callers treat them as an already-processed race.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The store has been closed or cannot be reached. Callers retry with backoff.
    #[error("store unavailable")]
    StoreUnavailable,

    #[error("no consumer group '{group}' on queue '{queue}'")]
    GroupNotFound { queue: String, group: String },

    /// A required field is missing or unparsable; the entry is isolated, not fatal.
    #[error("malformed entry {id}: {reason}")]
    MalformedEntry { id: EntryId, reason: String },

    #[error("invalid entry id: {0}")]
    InvalidId(String),
}

impl QueueError {
    /// Infrastructure errors that a loop should back off from and retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::StoreUnavailable)
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

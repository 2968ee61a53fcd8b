use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session is held for the given conversation id.
    #[error("session not found: {conversation_id}")]
    NotFound { conversation_id: String },

    /// The session store has reached its configured cap and LRU eviction
    /// could not free a slot (e.g. every session was touched within the
    /// same instant during a pathological burst).
    #[error("session limit exceeded: max {limit}")]
    LimitExceeded { limit: usize },

    /// A tool-use/tool-result message pairing violated the ordering
    /// invariant in spec.md §3.
    #[error("invalid message sequence: {0}")]
    InvalidSequence(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

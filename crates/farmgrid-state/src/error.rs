//! Errors from the counter store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open counter store: {0}")]
    Open(String),

    /// A redb transaction, table, read or write failed.
    #[error("counter store access failed: {0}")]
    Storage(String),

    #[error("corrupt record for `{key}`: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cannot encode counters: {0}")]
    Encode(String),
}

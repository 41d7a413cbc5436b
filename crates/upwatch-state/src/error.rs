//! Errors raised by [`StateStore`](crate::StateStore).

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// The database file could not be created or opened.
    #[error("cannot open state database: {0}")]
    Open(String),

    /// Another handle, usually another process, holds the database file.
    #[error("state database {0} is in use by another process")]
    Locked(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    #[error("corrupt record: {0}")]
    Deserialize(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Ids end up as history key prefixes, so they must be non-empty and
    /// free of `:`.
    #[error("invalid target id {0:?}")]
    InvalidTargetId(String),

    /// More than `u16::MAX` history records in one second for one target.
    #[error("history slots exhausted at {key}")]
    HistoryFull { key: String },
}

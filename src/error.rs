//! Centralized error types for mailsink.

use thiserror::Error;

/// All errors produced by the mailsink library.
#[derive(Error, Debug)]
pub enum SinkError {
    /// A message, part, or rendering does not exist.
    #[error("{0} does not exist")]
    NotFound(&'static str),

    /// The raw message could not be parsed as MIME.
    #[error("MIME decoding error: {0}")]
    Decode(String),

    /// A database operation failed. Any open transaction has been rolled back.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A value could not be encoded for storage.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A writer panicked while holding the store lock.
    #[error("Storage lock poisoned")]
    LockPoisoned,

    /// A persisted row could not be turned back into a model value.
    #[error("Corrupt record for message {id}: {reason}")]
    CorruptRecord { id: i64, reason: String },

    /// A request parameter is malformed.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// I/O error with a short description of what was being done.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, SinkError>`.
pub type Result<T> = std::result::Result<T, SinkError>;

impl SinkError {
    /// Create an `Io` variant from a context string and an `io::Error`.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// `true` for the "absent" family of errors that map to a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Allow `?` on `std::io::Error` when no better context is available.
impl From<std::io::Error> for SinkError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            context: "performing I/O".to_string(),
            source,
        }
    }
}

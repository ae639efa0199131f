//! Error types for the index layer.

use thiserror::Error;

/// Errors raised by the index manager and index store adapters.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Network or I/O failure talking to the index engine.
    #[error("index transport error: {0}")]
    Transport(String),

    /// Schema creation failed for a reason other than "already exists".
    #[error("failed to initialise index '{index}': {reason}")]
    Init { index: String, reason: String },

    /// A stored field could not be decoded back into its declared type.
    #[error("corrupt field '{field}' on document '{id}': {value:?}")]
    DataCorruption {
        id: String,
        field: String,
        value: String,
    },

    /// The user's search term cannot be turned into a safe query.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A projected or sort field is not part of the schema.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// The schema definition itself is unusable.
    #[error("invalid schema: {0}")]
    Schema(String),
}

impl IndexError {
    /// True for errors caused by the caller's input rather than the engine.
    pub fn is_client_error(&self) -> bool {
        matches!(self, IndexError::InvalidQuery(_) | IndexError::UnknownField(_))
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

//! Error types for the redb storage adapter.

use thiserror::Error;

/// Result type alias for redb adapter operations.
pub type RedbResult<T> = Result<T, RedbAdapterError>;

/// Errors raised while talking to the redb database.
///
/// Converted into `anyhow::Error` at the `StorageAdapter` boundary, where
/// the store wraps it as a `StoreError::Adapter`.
#[derive(Debug, Error)]
pub enum RedbAdapterError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error for key `{key}`: {reason}")]
    Deserialize { key: String, reason: String },

    #[error("blocking task failed: {0}")]
    Join(String),
}

//! Store errors.

use thiserror::Error;

/// Bucket store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Could not obtain a pooled connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Filesystem error while opening the store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A bucket row carried malformed message JSON.
    #[error("bucket payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A bucket violated its structural invariants.
    #[error("invalid bucket: {0}")]
    InvalidBucket(String),

    /// A delete referenced a message no bucket contains.
    #[error("message '{message_id}' not found in topic '{topic_id}'")]
    MessageNotFound {
        topic_id: String,
        message_id: String,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

//! Sink errors and their retry classification.

use chat_bucket_store::StoreError;
use chat_event_log::{CodecError, LogError};
use thiserror::Error;

/// Sink error type.
#[derive(Error, Debug)]
pub enum SinkError {
    /// A record failed header validation or payload parse. Fatal for the
    /// batch: skipping it would silently skew the materialised state.
    #[error("record decode error: {0}")]
    Decode(#[from] CodecError),

    /// A failure inside the store session, before anything durable crossed
    /// the commit boundary. Safe to retry.
    #[error("transaction error: {0}")]
    Transaction(#[source] StoreError),

    /// The store committed but the log cursor did not. The batch will be
    /// redelivered and re-applied; handler idempotency resolves the
    /// duplicates. Not retried in place.
    #[error("log cursor commit failed after store commit: {0}")]
    CursorCommit(#[source] LogError),

    /// The log fetch failed; the fetch stage restarts after a delay.
    #[error("log fetch error: {0}")]
    Fetch(#[source] LogError),

    /// A stage panicked; converted to an error at the stage boundary.
    #[error("sink stage panicked: {0}")]
    StagePanic(String),
}

impl SinkError {
    /// True for errors where no external durable state crossed the commit
    /// boundary, so the transaction can simply run again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }
}

/// Result alias for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

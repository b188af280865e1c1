//! The stream sink: materialises the event log into the bucket store.
//!
//! # Core invariants
//!
//! 1. **At-least-once**: a record is acknowledged only after the store
//!    transaction that applied it committed. Crash or error before the
//!    cursor commit means redelivery.
//! 2. **One in-flight transaction**: batches apply strictly one at a time.
//! 3. **Replay is a no-op**: the inserted handler skips ids the topic has
//!    already materialised; the deleted handler's tombstone update is
//!    conditional on the message still being live.
//! 4. **Decode failures stop the pipeline**: an unrecognised event type or a
//!    malformed payload is fatal for the batch, never silently skipped.
//!
//! # Architecture
//!
//! ```text
//! log ──fetch──▶ batch (50 records / 100 ms) ──▶ transaction (≤3 attempts)
//!  ▲                                                     │
//!  └──────────────── cursor commit ◀─────────────────────┘
//! ```
//!
//! The three stages talk over bounded channels; every stage selects on the
//! shared cancellation token and exits cleanly, closing its downstream
//! channel.

mod error;
mod handlers;
mod pipeline;

#[cfg(test)]
mod tests;

pub use error::{SinkError, SinkResult};
pub use handlers::{DeletedHandler, InsertedHandler};
pub use pipeline::{
    Sink, BATCH_MAX_DELAY, BATCH_MAX_RECORDS, FETCH_RESTART_DELAY, TRANSACTION_ATTEMPTS,
};

//! Bucketed document store for materialised messages.
//!
//! Messages are stored in buckets of at most [`BUCKET_CAPACITY`] per topic,
//! each bucket a single row with a JSON `messages` column. Per topic the
//! buckets form a disjoint, id-ordered cover of every observed message, and
//! at most one bucket is open (`size < BUCKET_CAPACITY`) at rest.
//!
//! SQLite is the backing engine (WAL mode, r2d2 pool). Writes go through
//! [`StoreSession`], a transaction handle the sink uses to apply a whole
//! batch atomically; the paginated read path queries outside any session.

mod bucket;
mod error;
mod migrations;
mod store;

pub use bucket::{Bucket, BUCKET_CAPACITY};
pub use error::{StoreError, StoreResult};
pub use store::{BucketStore, StoreSession, TombstoneOutcome};

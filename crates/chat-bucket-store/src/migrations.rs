//! Schema setup.

use rusqlite::Connection;

use crate::error::StoreResult;

/// Applies pragmas and creates the schema if needed. Idempotent.
pub fn run(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;

        CREATE TABLE IF NOT EXISTS buckets (
            bucket_id TEXT PRIMARY KEY,
            topic_id  TEXT NOT NULL,
            min_id    TEXT NOT NULL,
            max_id    TEXT NOT NULL,
            size      INTEGER NOT NULL,
            messages  TEXT NOT NULL,
            UNIQUE (topic_id, min_id)
        );

        CREATE INDEX IF NOT EXISTS idx_buckets_topic_size
            ON buckets (topic_id, size);
        ",
    )?;
    Ok(())
}

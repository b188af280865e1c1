//! Store handle, sessions and queries.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chat_core::{Message, MessageId, Pagination, TopicId};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use tracing::debug;

use crate::bucket::{Bucket, BUCKET_CAPACITY};
use crate::error::{StoreError, StoreResult};
use crate::migrations;

static MEMORY_DB_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Handle to the bucket store. Cheap to clone; connections come from an
/// internal pool.
#[derive(Clone)]
pub struct BucketStore {
    pool: Pool<SqliteConnectionManager>,
    // Pins shared in-memory databases for the lifetime of the store.
    _anchor: Option<Arc<Mutex<Connection>>>,
}

/// Outcome of a tombstone attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TombstoneOutcome {
    /// The message was live and is now tombstoned, version incremented.
    Applied,
    /// The message was already tombstoned; nothing changed.
    AlreadyDeleted,
}

impl BucketStore {
    /// Opens (creating if needed) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(10).build(manager)?;
        migrations::run(&*pool.get()?)?;

        debug!(path = %path.display(), "bucket store opened");
        Ok(Self {
            pool,
            _anchor: None,
        })
    }

    /// Opens a fresh shared in-memory store. Useful for tests and local
    /// development.
    pub fn in_memory() -> StoreResult<Self> {
        let name = format!(
            "file:chat-buckets-{}?mode=memory&cache=shared",
            MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let anchor = Connection::open_with_flags(&name, flags)?;
        let manager = SqliteConnectionManager::file(&name).with_flags(flags);
        let pool = Pool::builder().max_size(10).build(manager)?;
        migrations::run(&*pool.get()?)?;

        Ok(Self {
            pool,
            _anchor: Some(Arc::new(Mutex::new(anchor))),
        })
    }

    /// Runs `f` inside one transaction and commits when it returns `Ok`.
    ///
    /// The sink applies a whole batch through one session; any error aborts
    /// the transaction and leaves the store untouched.
    pub fn with_session<T>(
        &self,
        f: impl FnOnce(&StoreSession<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let session = StoreSession { tx };
        let out = f(&session)?;
        session.tx.commit()?;
        Ok(out)
    }

    /// Liveness probe: round-trips a trivial query.
    pub fn ping(&self) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// The fused two-pass pagination query.
    ///
    /// Bucket pass: buckets of the topic whose `min_id` lies strictly inside
    /// the cursor window, ascending, limited. Message pass: flatten,
    /// re-filter by id window and tombstone, re-sort, re-limit. The second
    /// filter is required because a bucket's `min_id` can satisfy the window
    /// while individual messages in it do not.
    pub fn list_messages(
        &self,
        topic_id: &TopicId,
        page: &Pagination,
    ) -> StoreResult<Vec<Message>> {
        let limit = page.effective_limit();
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT messages FROM buckets
             WHERE topic_id = ?1
               AND (?2 IS NULL OR min_id > ?2)
               AND (?3 IS NULL OR min_id < ?3)
             ORDER BY min_id ASC
             LIMIT ?4",
        )?;

        let after = page.after_id.as_ref().map(|id| id.as_str().to_string());
        let before = page.before_id.as_ref().map(|id| id.as_str().to_string());

        let rows = stmt.query_map(params![topic_id.as_str(), after, before, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut messages: Vec<Message> = Vec::with_capacity(limit);
        for raw in rows {
            let batch: Vec<Message> = serde_json::from_str(&raw?)?;
            messages.extend(
                batch
                    .into_iter()
                    .filter(|m| !m.deleted && page.contains(&m.id)),
            );
        }

        messages.sort_by(|a, b| a.id.cmp(&b.id));
        messages.truncate(limit);
        Ok(messages)
    }

    /// All buckets of a topic, ascending by `min_id`.
    pub fn buckets_for_topic(&self, topic_id: &TopicId) -> StoreResult<Vec<Bucket>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT bucket_id, topic_id, min_id, max_id, messages FROM buckets
             WHERE topic_id = ?1 ORDER BY min_id ASC",
        )?;

        let rows = stmt.query_map(params![topic_id.as_str()], row_to_parts)?;
        rows.map(|r| parts_to_bucket(r?)).collect()
    }
}

/// One open transaction against the store.
///
/// All methods operate inside the transaction; nothing is visible to readers
/// until [`BucketStore::with_session`] commits.
pub struct StoreSession<'conn> {
    tx: Transaction<'conn>,
}

impl StoreSession<'_> {
    /// The topic's single open bucket, if any (lowest `min_id` among
    /// buckets with `size` below capacity).
    pub fn find_open_bucket(&self, topic_id: &TopicId) -> StoreResult<Option<Bucket>> {
        let mut stmt = self.tx.prepare(
            "SELECT bucket_id, topic_id, min_id, max_id, messages FROM buckets
             WHERE topic_id = ?1 AND size < ?2
             ORDER BY min_id ASC LIMIT 1",
        )?;

        let row = stmt
            .query_row(params![topic_id.as_str(), BUCKET_CAPACITY as i64], row_to_parts)
            .optional()?;

        row.map(parts_to_bucket).transpose()
    }

    /// Highest materialised message id for the topic, across all buckets.
    pub fn topic_max_id(&self, topic_id: &TopicId) -> StoreResult<Option<MessageId>> {
        let max: Option<String> = self.tx.query_row(
            "SELECT MAX(max_id) FROM buckets WHERE topic_id = ?1",
            params![topic_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(max.map(MessageId::from))
    }

    /// Inserts a new bucket row.
    pub fn insert_bucket(&self, bucket: &Bucket) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO buckets (bucket_id, topic_id, min_id, max_id, size, messages)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                bucket.bucket_id,
                bucket.topic_id.as_str(),
                bucket.min_id.as_str(),
                bucket.max_id.as_str(),
                bucket.size() as i64,
                serde_json::to_string(&bucket.messages)?,
            ],
        )?;
        Ok(())
    }

    /// Replaces an existing bucket row by `bucket_id`.
    pub fn replace_bucket(&self, bucket: &Bucket) -> StoreResult<()> {
        self.tx.execute(
            "UPDATE buckets SET min_id = ?2, max_id = ?3, size = ?4, messages = ?5
             WHERE bucket_id = ?1",
            params![
                bucket.bucket_id,
                bucket.min_id.as_str(),
                bucket.max_id.as_str(),
                bucket.size() as i64,
                serde_json::to_string(&bucket.messages)?,
            ],
        )?;
        Ok(())
    }

    /// Tombstones `message_id` in its containing bucket.
    ///
    /// The update is conditional on `deleted = false`: a message that is
    /// already tombstoned is left untouched (version included), so replays
    /// are no-ops. A message no bucket contains is
    /// [`StoreError::MessageNotFound`].
    pub fn tombstone(
        &self,
        topic_id: &TopicId,
        message_id: &MessageId,
    ) -> StoreResult<TombstoneOutcome> {
        let mut stmt = self.tx.prepare(
            "SELECT bucket_id, messages FROM buckets
             WHERE topic_id = ?1 AND min_id <= ?2 AND max_id >= ?2",
        )?;

        let candidates: Vec<(String, String)> = stmt
            .query_map(params![topic_id.as_str(), message_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<_, _>>()?;

        for (bucket_id, raw) in candidates {
            let mut messages: Vec<Message> = serde_json::from_str(&raw)?;
            let Some(target) = messages.iter_mut().find(|m| &m.id == message_id) else {
                continue;
            };

            if target.deleted {
                return Ok(TombstoneOutcome::AlreadyDeleted);
            }

            target.deleted = true;
            target.version += 1;
            self.tx.execute(
                "UPDATE buckets SET messages = ?2 WHERE bucket_id = ?1",
                params![bucket_id, serde_json::to_string(&messages)?],
            )?;
            return Ok(TombstoneOutcome::Applied);
        }

        Err(StoreError::MessageNotFound {
            topic_id: topic_id.to_string(),
            message_id: message_id.to_string(),
        })
    }
}

type BucketParts = (String, String, String, String, String);

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<BucketParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn parts_to_bucket(parts: BucketParts) -> StoreResult<Bucket> {
    let (bucket_id, topic_id, min_id, max_id, raw) = parts;
    let messages: Vec<Message> = serde_json::from_str(&raw)?;
    Ok(Bucket {
        bucket_id,
        topic_id: topic_id.into(),
        min_id: min_id.into(),
        max_id: max_id.into(),
        messages,
    })
}

//! In-memory log with consumer-group semantics.
//!
//! Backs the test harnesses and local development. Redelivery works the way
//! the real transport does: fetched-but-uncommitted records are handed out
//! again after [`MemoryLog::reset_group`] (the in-memory stand-in for a
//! consumer restart).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::record::{
    LogConsumer, LogError, LogProducer, LogRecord, LogResult, NewLogRecord, RecordId,
};

const POLL_TIMEOUT: Duration = Duration::from_millis(25);

#[derive(Default)]
struct GroupCursor {
    delivered: usize,
    committed: usize,
}

#[derive(Default)]
struct Shared {
    records: Vec<LogRecord>,
    groups: HashMap<String, GroupCursor>,
    next_seq: u64,
    closed: bool,
}

/// A shared in-memory log. Clone to hand the same log to producers and
/// consumers.
#[derive(Clone, Default)]
pub struct MemoryLog {
    shared: Arc<Mutex<Shared>>,
    notify: Arc<Notify>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn producer(&self) -> MemoryLogProducer {
        MemoryLogProducer { log: self.clone() }
    }

    /// A consumer for `group`. Groups are independent cursors; consumers of
    /// the same group share one.
    pub fn consumer(&self, group: impl Into<String>) -> MemoryLogConsumer {
        let group = group.into();
        self.shared
            .lock()
            .unwrap()
            .groups
            .entry(group.clone())
            .or_default();
        MemoryLogConsumer {
            log: self.clone(),
            group,
        }
    }

    /// Number of records ever appended.
    pub fn len(&self) -> usize {
        self.shared.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewinds a group's delivery point to its commit point, simulating a
    /// consumer restart: uncommitted records get redelivered.
    pub fn reset_group(&self, group: &str) {
        let mut shared = self.shared.lock().unwrap();
        if let Some(cursor) = shared.groups.get_mut(group) {
            cursor.delivered = cursor.committed;
        }
        self.notify.notify_waiters();
    }

    /// Marks the log closed; fetches fail with [`LogError::Closed`] once
    /// drained.
    pub fn close(&self) {
        self.shared.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }

    /// Snapshot of every record, in append order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.shared.lock().unwrap().records.clone()
    }
}

/// Producer half of a [`MemoryLog`].
#[derive(Clone)]
pub struct MemoryLogProducer {
    log: MemoryLog,
}

#[async_trait::async_trait]
impl LogProducer for MemoryLogProducer {
    async fn append(&self, record: NewLogRecord) -> LogResult<RecordId> {
        let id = {
            let mut shared = self.log.shared.lock().unwrap();
            if shared.closed {
                return Err(LogError::Closed);
            }

            let seq = shared.next_seq;
            shared.next_seq += 1;
            let id = RecordId(format!("{seq}-0"));
            shared.records.push(LogRecord {
                id: id.clone(),
                key: record.key,
                event_type: Some(record.event_type.into_bytes()),
                payload: record.payload,
            });
            id
        };

        self.log.notify.notify_waiters();
        Ok(id)
    }
}

/// Consumer half of a [`MemoryLog`], bound to one group.
pub struct MemoryLogConsumer {
    log: MemoryLog,
    group: String,
}

#[async_trait::async_trait]
impl LogConsumer for MemoryLogConsumer {
    async fn fetch(&mut self) -> LogResult<Option<LogRecord>> {
        loop {
            let notified = self.log.notify.notified();

            {
                let mut shared = self.log.shared.lock().unwrap();
                let total = shared.records.len();
                let closed = shared.closed;
                let delivered = shared
                    .groups
                    .get(&self.group)
                    .expect("consumer group registered at construction")
                    .delivered;

                if delivered < total {
                    let record = shared.records[delivered].clone();
                    shared.groups.get_mut(&self.group).unwrap().delivered += 1;
                    return Ok(Some(record));
                }
                if closed {
                    return Err(LogError::Closed);
                }
            }

            // Nothing to deliver yet; wait for an append or give the caller
            // its poll timeout back.
            if tokio::time::timeout(POLL_TIMEOUT, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, ids: &[RecordId]) -> LogResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut shared = self.log.shared.lock().unwrap();
        let last = ids.last().unwrap();
        let position = shared
            .records
            .iter()
            .position(|r| &r.id == last)
            .ok_or_else(|| LogError::Protocol(format!("unknown record id {last}")))?;

        let cursor = shared
            .groups
            .get_mut(&self.group)
            .expect("consumer group registered at construction");
        cursor.committed = cursor.committed.max(position + 1);
        Ok(())
    }
}

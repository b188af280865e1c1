//! The three-stage sink pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_bucket_store::BucketStore;
use chat_event_log::{Event, LogConsumer, LogRecord, RecordId};
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SinkError, SinkResult};
use crate::handlers::{DeletedHandler, InsertedHandler};

/// Batch emission threshold by size.
pub const BATCH_MAX_RECORDS: usize = 50;

/// Batch emission threshold by time since the previous emission.
pub const BATCH_MAX_DELAY: Duration = Duration::from_millis(100);

/// Attempts per batch before the pipeline stops.
pub const TRANSACTION_ATTEMPTS: u32 = 3;

/// Pause before the fetch stage restarts after an error.
pub const FETCH_RESTART_DELAY: Duration = Duration::from_millis(100);

const FETCH_CHANNEL_CAPACITY: usize = 64;
const BATCH_CHANNEL_CAPACITY: usize = 4;

/// Applies one decoded-and-grouped batch. Seam for fault injection in
/// tests; [`StoreApplier`] is the real thing.
#[async_trait]
pub(crate) trait BatchApplier: Send + Sync {
    async fn apply(&self, batch: &[LogRecord]) -> SinkResult<()>;
}

/// The sink: drives the log forward at-least-once with no more than one
/// uncommitted transaction in flight.
pub struct Sink<C> {
    consumer: Arc<Mutex<C>>,
    store: BucketStore,
}

impl<C: LogConsumer + 'static> Sink<C> {
    pub fn new(consumer: C, store: BucketStore) -> Self {
        Self {
            consumer: Arc::new(Mutex::new(consumer)),
            store,
        }
    }

    /// Runs the pipeline until cancellation (clean return) or a fatal error.
    pub async fn run(self, cancel: CancellationToken) -> SinkResult<()> {
        let stage_cancel = cancel.child_token();
        let (record_tx, record_rx) = mpsc::channel(FETCH_CHANNEL_CAPACITY);
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);

        let fetcher = tokio::spawn(run_fetcher(
            self.consumer.clone(),
            record_tx,
            stage_cancel.clone(),
        ));
        let batcher = tokio::spawn(run_batcher(record_rx, batch_tx, stage_cancel.clone()));

        let applier = StoreApplier {
            store: self.store,
            consumer: self.consumer,
        };
        let result = run_transactions(batch_rx, &applier, &stage_cancel).await;

        // Stop the upstream stages whether we exited clean or with an error.
        stage_cancel.cancel();
        let _ = fetcher.await;
        let _ = batcher.await;

        if result.is_ok() {
            info!("sink pipeline stopped");
        }
        result
    }
}

/// Stage 1: fetch records, restart on error.
async fn run_fetcher<C: LogConsumer>(
    consumer: Arc<Mutex<C>>,
    tx: mpsc::Sender<LogRecord>,
    cancel: CancellationToken,
) {
    loop {
        match fetch_stage(&consumer, &tx, &cancel).await {
            Ok(()) => return,
            Err(e) => {
                error!(error = %e, "fetch stage failed, restarting");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(FETCH_RESTART_DELAY) => {}
                }
            }
        }
    }
}

async fn fetch_stage<C: LogConsumer>(
    consumer: &Arc<Mutex<C>>,
    tx: &mpsc::Sender<LogRecord>,
    cancel: &CancellationToken,
) -> SinkResult<()> {
    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            fetched = guarded_fetch(consumer) => fetched,
        };

        match fetched? {
            Some(record) => {
                // A closed channel means the batcher is gone; exit clean.
                if tx.send(record).await.is_err() {
                    return Ok(());
                }
            }
            // Poll timeout expired with nothing new.
            None => debug!("no records available, continuing to poll"),
        }
    }
}

/// One fetch with panic containment: a panicking consumer surfaces as a
/// stage error, not a crashed task.
async fn guarded_fetch<C: LogConsumer>(
    consumer: &Arc<Mutex<C>>,
) -> SinkResult<Option<LogRecord>> {
    let mut guard = consumer.lock().await;
    match std::panic::AssertUnwindSafe(guard.fetch()).catch_unwind().await {
        Ok(result) => result.map_err(SinkError::Fetch),
        Err(panic) => Err(SinkError::StagePanic(panic_message(&panic))),
    }
}

/// Stage 2: accumulate records, emit on size or timer, flush on shutdown.
pub(crate) async fn run_batcher(
    mut rx: mpsc::Receiver<LogRecord>,
    tx: mpsc::Sender<Vec<LogRecord>>,
    cancel: CancellationToken,
) {
    let mut batch: Vec<LogRecord> = Vec::with_capacity(BATCH_MAX_RECORDS);
    let mut timer = interval_at(Instant::now() + BATCH_MAX_DELAY, BATCH_MAX_DELAY);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if !batch.is_empty() {
                    let _ = tx.send(std::mem::take(&mut batch)).await;
                }
                return;
            }
            received = rx.recv() => match received {
                Some(record) => {
                    batch.push(record);
                    if batch.len() >= BATCH_MAX_RECORDS {
                        if tx.send(std::mem::take(&mut batch)).await.is_err() {
                            return;
                        }
                        timer.reset();
                    }
                }
                // Fetch stage shut down: flush the partial batch, terminate.
                None => {
                    if !batch.is_empty() {
                        let _ = tx.send(std::mem::take(&mut batch)).await;
                    }
                    return;
                }
            },
            _ = timer.tick() => {
                if !batch.is_empty() && tx.send(std::mem::take(&mut batch)).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Stage 3: apply each batch, up to [`TRANSACTION_ATTEMPTS`] times.
async fn run_transactions<A: BatchApplier>(
    mut rx: mpsc::Receiver<Vec<LogRecord>>,
    applier: &A,
    cancel: &CancellationToken,
) -> SinkResult<()> {
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            batch = rx.recv() => match batch {
                Some(batch) => batch,
                None => return Ok(()),
            },
        };

        apply_with_retry(applier, &batch, cancel).await?;
    }
}

pub(crate) async fn apply_with_retry<A: BatchApplier>(
    applier: &A,
    batch: &[LogRecord],
    cancel: &CancellationToken,
) -> SinkResult<()> {
    let mut attempt = 0;
    loop {
        // Cancelled mid-retry: return without committing.
        if cancel.is_cancelled() {
            return Ok(());
        }

        attempt += 1;
        match applier.apply(batch).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < TRANSACTION_ATTEMPTS => {
                warn!(attempt, error = %e, "transaction failed");
            }
            Err(e) => return Err(e),
        }
    }
}

/// The real applier: decode, dispatch, one store session, cursor commit.
pub(crate) struct StoreApplier<C> {
    pub(crate) store: BucketStore,
    pub(crate) consumer: Arc<Mutex<C>>,
}

#[async_trait]
impl<C: LogConsumer> BatchApplier for StoreApplier<C> {
    async fn apply(&self, batch: &[LogRecord]) -> SinkResult<()> {
        // Header-first decode of the whole batch before any store work.
        let mut inserted = InsertedHandler::default();
        let mut deleted = DeletedHandler::default();
        for record in batch {
            match Event::decode(record.event_type.as_deref(), &record.payload)? {
                Event::Inserted(e) => inserted.record(e),
                Event::Deleted(e) => deleted.record(e),
            }
        }

        // One session for the whole batch. Inserts before deletes so a
        // message and its tombstone in the same batch resolve in log order.
        if !inserted.is_empty() || !deleted.is_empty() {
            self.store
                .with_session(|session| {
                    inserted.apply(session)?;
                    deleted.apply(session)?;
                    Ok(())
                })
                .map_err(SinkError::Transaction)?;
        }

        // The store is durable; move the cursor past the batch. Failing
        // here means redelivery of records the store already holds.
        let ids: Vec<RecordId> = batch.iter().map(|r| r.id.clone()).collect();
        let mut consumer = self.consumer.lock().await;
        if let Err(e) = consumer.commit(&ids).await {
            error!(
                first_record = ids.first().map(|id| id.as_str()).unwrap_or(""),
                last_record = ids.last().map(|id| id.as_str()).unwrap_or(""),
                error = %e,
                "store committed but log cursor did not; batch will be re-applied on redelivery"
            );
            return Err(SinkError::CursorCommit(e));
        }

        debug!(records = batch.len(), "batch applied");
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

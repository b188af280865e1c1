//! Batching-stage behavior: size threshold, timer, shutdown flush.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::harness::opaque_record;
use crate::pipeline::{run_batcher, BATCH_MAX_RECORDS};

#[tokio::test]
async fn emits_when_the_size_threshold_is_reached() {
    let (record_tx, record_rx) = mpsc::channel(128);
    let (batch_tx, mut batch_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let stage = tokio::spawn(run_batcher(record_rx, batch_tx, cancel.clone()));

    for n in 0..BATCH_MAX_RECORDS as u64 {
        record_tx.send(opaque_record(n)).await.unwrap();
    }

    // The size threshold fires well before the 100 ms timer.
    let batch = tokio::time::timeout(Duration::from_millis(50), batch_rx.recv())
        .await
        .expect("size-triggered batch")
        .unwrap();
    assert_eq!(batch.len(), BATCH_MAX_RECORDS);

    cancel.cancel();
    stage.await.unwrap();
}

#[tokio::test]
async fn emits_a_partial_batch_on_the_timer() {
    let (record_tx, record_rx) = mpsc::channel(128);
    let (batch_tx, mut batch_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let stage = tokio::spawn(run_batcher(record_rx, batch_tx, cancel.clone()));

    for n in 0..3 {
        record_tx.send(opaque_record(n)).await.unwrap();
    }

    let batch = tokio::time::timeout(Duration::from_millis(500), batch_rx.recv())
        .await
        .expect("timer-triggered batch")
        .unwrap();
    assert_eq!(batch.len(), 3);

    cancel.cancel();
    stage.await.unwrap();
}

#[tokio::test]
async fn flushes_the_partial_batch_when_upstream_closes() {
    let (record_tx, record_rx) = mpsc::channel(128);
    let (batch_tx, mut batch_rx) = mpsc::channel(8);
    let stage = tokio::spawn(run_batcher(record_rx, batch_tx, CancellationToken::new()));

    record_tx.send(opaque_record(1)).await.unwrap();
    record_tx.send(opaque_record(2)).await.unwrap();
    drop(record_tx);

    let batch = tokio::time::timeout(Duration::from_millis(500), batch_rx.recv())
        .await
        .expect("flush on shutdown")
        .unwrap();
    assert_eq!(batch.len(), 2);

    // The stage terminates and closes its downstream channel.
    stage.await.unwrap();
    assert!(batch_rx.recv().await.is_none());
}

#[tokio::test]
async fn emits_nothing_while_idle() {
    let (_record_tx, record_rx) = mpsc::channel::<chat_event_log::LogRecord>(8);
    let (batch_tx, mut batch_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let stage = tokio::spawn(run_batcher(record_rx, batch_tx, cancel.clone()));

    // Several timer periods pass with no input; no empty batches appear.
    let quiet = tokio::time::timeout(Duration::from_millis(350), batch_rx.recv()).await;
    assert!(quiet.is_err(), "idle batcher must not emit");

    cancel.cancel();
    stage.await.unwrap();
}

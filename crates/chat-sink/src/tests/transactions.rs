//! Transaction-stage retry policy.

use tokio_util::sync::CancellationToken;

use super::harness::{opaque_record, Script, ScriptedApplier};
use crate::error::SinkError;
use crate::pipeline::{apply_with_retry, TRANSACTION_ATTEMPTS};

#[tokio::test]
async fn retries_transaction_errors_up_to_three_attempts() {
    let applier = ScriptedApplier::new([Script::FailRetryable, Script::FailRetryable, Script::Succeed]);
    let batch = [opaque_record(1)];

    apply_with_retry(&applier, &batch, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(applier.attempts(), TRANSACTION_ATTEMPTS as usize);
}

#[tokio::test]
async fn persistent_failure_surfaces_after_three_attempts() {
    let applier = ScriptedApplier::new([
        Script::FailRetryable,
        Script::FailRetryable,
        Script::FailRetryable,
    ]);
    let batch = [opaque_record(1)];

    let err = apply_with_retry(&applier, &batch, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::Transaction(_)));
    assert_eq!(applier.attempts(), TRANSACTION_ATTEMPTS as usize);
}

#[tokio::test]
async fn fatal_errors_are_not_retried() {
    let applier = ScriptedApplier::new([Script::FailFatal]);
    let batch = [opaque_record(1)];

    let err = apply_with_retry(&applier, &batch, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::StagePanic(_)));
    assert_eq!(applier.attempts(), 1);
}

#[tokio::test]
async fn cancellation_mid_retry_returns_without_committing() {
    let applier = ScriptedApplier::new([Script::FailRetryable; 3]);
    let batch = [opaque_record(1)];
    let cancel = CancellationToken::new();
    cancel.cancel();

    apply_with_retry(&applier, &batch, &cancel).await.unwrap();
    assert_eq!(applier.attempts(), 0);
}

//! Behavior tests for the relay processor against mock collaborators.
//!
//! These tests drive full fetch→publish→mark cycles without a database or
//! broker, verifying ordering, batch isolation, retry scheduling, and
//! cancellation semantics.

use std::{sync::Arc, time::Duration};

use outpost_core::{RowStatus, TestClock};
use outpost_relay::{
    processor::{RelayConfig, RelayProcessor},
    publisher::{mock::MockPublisher, PublishError},
    retry::RetryPolicy,
    store::mock::MockOutboxStore,
};
use tokio_util::sync::CancellationToken;

fn single_attempt_config() -> RelayConfig {
    RelayConfig {
        retry_policy: RetryPolicy { max_attempts: 1, ..Default::default() },
        ..Default::default()
    }
}

fn processor_with(
    store: Arc<MockOutboxStore>,
    publisher: Arc<MockPublisher>,
    config: RelayConfig,
) -> RelayProcessor {
    RelayProcessor::new(store, publisher, config, Arc::new(TestClock::new()))
}

#[tokio::test]
async fn one_failing_row_does_not_block_the_rest_of_the_batch() {
    let store = Arc::new(MockOutboxStore::new());
    let row1 = store.add_pending_row("orders", b"payload-1").await;
    let row2 = store.add_pending_row("orders", b"payload-2").await;
    let row3 = store.add_pending_row("orders", b"payload-3").await;

    let publisher = Arc::new(MockPublisher::new());
    publisher
        .fail_payloads_containing(b"payload-2", PublishError::connection("sink down"))
        .await;

    let processor = processor_with(store.clone(), publisher.clone(), single_attempt_config());
    let processed = processor.process_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(processed, 3);
    assert_eq!(store.row_status(row1).await, Some(RowStatus::Sent));
    assert_eq!(store.row_status(row2).await, Some(RowStatus::Failed));
    assert_eq!(store.row_status(row3).await, Some(RowStatus::Sent));

    // Exactly the transitions the cycle should have driven: two sends, one
    // failure, nothing extra.
    assert_eq!(store.mark_sent_calls().await, vec![row1, row3]);
    assert_eq!(store.mark_failed_calls().await, vec![row2]);
}

#[tokio::test]
async fn rows_publish_in_insertion_order() {
    let store = Arc::new(MockOutboxStore::new());
    for i in 0..5 {
        store.add_pending_row("orders", format!("payload-{i}").as_bytes()).await;
    }

    let publisher = Arc::new(MockPublisher::new());
    let processor = processor_with(store.clone(), publisher.clone(), RelayConfig::default());

    processor.process_cycle(&CancellationToken::new()).await.unwrap();

    let published = publisher.published().await;
    let payloads: Vec<_> = published.iter().map(|(_, p)| p.as_ref().to_vec()).collect();
    let expected: Vec<_> = (0..5).map(|i| format!("payload-{i}").into_bytes()).collect();
    assert_eq!(payloads, expected);
}

#[tokio::test]
async fn cycle_fetches_at_most_the_configured_batch() {
    let store = Arc::new(MockOutboxStore::new());
    for i in 0..10 {
        store.add_pending_row("orders", format!("payload-{i}").as_bytes()).await;
    }

    let publisher = Arc::new(MockPublisher::new());
    let config = RelayConfig { batch_size: 4, ..Default::default() };
    let processor = processor_with(store.clone(), publisher.clone(), config);

    let processed = processor.process_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(processed, 4);
    assert_eq!(publisher.publish_count().await, 4);

    // The backlog drains across subsequent cycles.
    processor.process_cycle(&CancellationToken::new()).await.unwrap();
    processor.process_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(publisher.publish_count().await, 10);
}

#[tokio::test]
async fn retryable_failure_schedules_backoff_with_incremented_attempt() {
    let store = Arc::new(MockOutboxStore::new());
    let id = store.add_pending_row("orders", b"payload").await;

    let publisher = Arc::new(MockPublisher::new());
    publisher
        .fail_payloads_containing(b"payload", PublishError::connection("sink down"))
        .await;

    let processor = processor_with(store.clone(), publisher.clone(), RelayConfig::default());
    processor.process_cycle(&CancellationToken::new()).await.unwrap();

    // Still pending, but deferred and with the attempt recorded.
    assert_eq!(store.row_status(id).await, Some(RowStatus::Pending));
    let row = store.row(id).await.unwrap();
    assert_eq!(row.attempt_count, 1);
    assert!(row.next_attempt_at.is_some());
    assert!(store.mark_failed_calls().await.is_empty());

    let retries = store.retry_calls().await;
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].2, 1);
}

#[tokio::test]
async fn deferred_row_is_skipped_until_due() {
    let store = Arc::new(MockOutboxStore::new());
    store.add_pending_row("orders", b"payload").await;

    let publisher = Arc::new(MockPublisher::new());
    publisher
        .fail_payloads_containing(b"payload", PublishError::connection("sink down"))
        .await;

    let clock = Arc::new(TestClock::new());
    let processor = RelayProcessor::new(
        store.clone(),
        publisher.clone(),
        RelayConfig::default(),
        clock.clone(),
    );
    let token = CancellationToken::new();

    processor.process_cycle(&token).await.unwrap();

    // The row is scheduled in the future; an immediate cycle finds nothing.
    let processed = processor.process_cycle(&token).await.unwrap();
    assert_eq!(processed, 0);

    // Once the clock passes the schedule the row is eligible again.
    clock.advance(Duration::from_secs(120));
    let processed = processor.process_cycle(&token).await.unwrap();
    assert_eq!(processed, 1);
}

#[tokio::test]
async fn exhausted_attempts_mark_the_row_failed() {
    let store = Arc::new(MockOutboxStore::new());
    let id = store.add_pending_row("orders", b"payload").await;

    let publisher = Arc::new(MockPublisher::new());
    publisher
        .fail_payloads_containing(b"payload", PublishError::connection("sink down"))
        .await;

    let clock = Arc::new(TestClock::new());
    let config = RelayConfig {
        retry_policy: RetryPolicy { max_attempts: 3, ..Default::default() },
        ..Default::default()
    };
    let processor = RelayProcessor::new(store.clone(), publisher.clone(), config, clock.clone());
    let token = CancellationToken::new();

    // Attempts 1 and 2 reschedule; attempt 3 exhausts the budget.
    for _ in 0..3 {
        clock.advance(Duration::from_secs(300));
        processor.process_cycle(&token).await.unwrap();
    }

    assert_eq!(store.row_status(id).await, Some(RowStatus::Failed));
    assert_eq!(store.retry_calls().await.len(), 2);
    assert_eq!(store.mark_failed_calls().await, vec![id]);
}

#[tokio::test]
async fn rejected_payload_fails_without_retry() {
    let store = Arc::new(MockOutboxStore::new());
    let id = store.add_pending_row("orders", b"payload").await;

    let publisher = Arc::new(MockPublisher::new());
    publisher
        .fail_payloads_containing(b"payload", PublishError::rejected("malformed entry"))
        .await;

    let processor = processor_with(store.clone(), publisher.clone(), RelayConfig::default());
    processor.process_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(store.row_status(id).await, Some(RowStatus::Failed));
    assert!(store.retry_calls().await.is_empty());
}

#[tokio::test]
async fn hung_sink_is_bounded_by_the_publish_timeout() {
    let store = Arc::new(MockOutboxStore::new());
    let id = store.add_pending_row("orders", b"payload").await;

    let publisher = Arc::new(MockPublisher::new());
    publisher.set_delay(Duration::from_secs(30)).await;

    let config = RelayConfig { publish_timeout: Duration::from_millis(20), ..Default::default() };
    let processor = processor_with(store.clone(), publisher.clone(), config);

    processor.process_cycle(&CancellationToken::new()).await.unwrap();

    // Timeout is retryable: the row is deferred, not abandoned.
    assert_eq!(store.row_status(id).await, Some(RowStatus::Pending));
    assert_eq!(store.retry_calls().await.len(), 1);
}

#[tokio::test]
async fn spawned_relay_drains_rows_and_stops_on_cancellation() {
    let store = Arc::new(MockOutboxStore::new());
    for i in 0..3 {
        store.add_pending_row("orders", format!("payload-{i}").as_bytes()).await;
    }

    let publisher = Arc::new(MockPublisher::new());
    let processor = processor_with(store.clone(), publisher.clone(), RelayConfig::default());

    let token = CancellationToken::new();
    let handle = processor.spawn(token.clone());

    // Wait for the background loop to drain the staged rows.
    tokio::time::timeout(Duration::from_secs(5), async {
        while publisher.publish_count().await < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay should drain staged rows");

    token.cancel();
    handle.shutdown().await.expect("relay should stop within the grace period");

    // After cancellation and grace, the loop issues no further fetches.
    let fetches_after_shutdown = store.fetch_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.fetch_count(), fetches_after_shutdown);
}

#[tokio::test]
async fn shutdown_without_pending_work_is_immediate() {
    let store = Arc::new(MockOutboxStore::new());
    let publisher = Arc::new(MockPublisher::new());
    let processor = processor_with(store, publisher, RelayConfig::default());

    let token = CancellationToken::new();
    let handle = processor.spawn(token);

    handle.shutdown().await.expect("idle relay should stop cleanly");
}

//! Polling processor that drains pending outbox rows to the sink.
//!
//! One background task repeats a fetch→publish→mark cycle until cancelled.
//! Cycles never overlap: a slow cycle simply delays the next one. A failure
//! on one row never blocks the rows behind it, and a fetch failure aborts
//! only the current cycle, so producers keep staging rows while the sink or
//! store recovers.

use std::{sync::Arc, time::Duration};

use outpost_core::{models::OutboxRow, Clock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{RelayError, Result},
    publisher::{PublishError, Publisher},
    retry::{RetryContext, RetryDecision, RetryPolicy},
    store::OutboxStore,
};

/// Wait before retrying after a cycle-level store failure.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Configuration for the relay processor.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum rows fetched per cycle.
    pub batch_size: usize,

    /// How long to wait after a cycle that found no work.
    pub poll_interval: Duration,

    /// Upper bound on a single publish call.
    pub publish_timeout: Duration,

    /// Retry policy for failed publishes.
    pub retry_policy: RetryPolicy,

    /// How long shutdown waits for an in-flight cycle to finish.
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: crate::DEFAULT_POLL_INTERVAL,
            publish_timeout: crate::DEFAULT_PUBLISH_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

/// Background processor relaying staged rows to the message sink.
///
/// The processor never mutates rows outside the transitions recorded through
/// its store: `sent` on success, a retry schedule on a retryable failure,
/// `failed` when giving up.
pub struct RelayProcessor {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn Publisher>,
    config: RelayConfig,
    clock: Arc<dyn Clock>,
}

impl RelayProcessor {
    /// Creates a processor over the given store and publisher.
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn Publisher>,
        config: RelayConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, publisher, config, clock }
    }

    /// Spawns the processor loop and returns immediately.
    ///
    /// Cancelling `token` is the sole stop signal; the returned handle awaits
    /// the loop with the configured grace period.
    pub fn spawn(self, token: CancellationToken) -> RelayHandle {
        let grace = self.config.shutdown_grace;
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            self.run(loop_token).await;
        });

        RelayHandle { handle, token, grace }
    }

    /// Main processor loop - fetches and relays rows until cancelled.
    ///
    /// A cycle that found work rolls directly into the next one so backlogs
    /// drain without waiting out the poll interval; an empty cycle sleeps.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis(),
            "outbox relay starting"
        );

        loop {
            if token.is_cancelled() {
                break;
            }

            match self.process_cycle(&token).await {
                Ok(processed) => {
                    if processed == 0 {
                        tokio::select! {
                            () = self.clock.sleep(self.config.poll_interval) => {}
                            () = token.cancelled() => break,
                        }
                    }
                },
                Err(error) => {
                    error!(error = %error, "relay cycle failed");
                    // Wait before retrying to avoid tight error loops
                    tokio::select! {
                        () = self.clock.sleep(ERROR_BACKOFF) => {}
                        () = token.cancelled() => break,
                    }
                },
            }
        }

        info!("outbox relay stopped");
    }

    /// Fetches and processes one batch of eligible pending rows.
    ///
    /// Returns the number of rows fetched so the loop can decide whether to
    /// sleep. Row-level failures are absorbed here; only a fetch failure
    /// propagates, and it aborts just this cycle.
    ///
    /// # Errors
    ///
    /// Returns error if the pending fetch fails.
    pub async fn process_cycle(&self, token: &CancellationToken) -> Result<usize> {
        let now = self.clock.now_utc();
        let rows = self.store.fetch_pending(self.config.batch_size, now).await?;
        let fetched = rows.len();

        debug!(batch_size = fetched, "processing relay cycle");

        for row in rows {
            if token.is_cancelled() {
                break;
            }

            self.deliver_row(row).await;
        }

        Ok(fetched)
    }

    /// Publishes one row and records the resulting transition.
    ///
    /// Every outcome ends in a store write: `sent`, a retry schedule, or
    /// `failed`. A failed store write is logged and the row keeps its prior
    /// status, to be picked up again by a later cycle.
    async fn deliver_row(&self, row: OutboxRow) {
        let attempt_number = u32::try_from(row.attempt_count + 1).unwrap_or(u32::MAX);

        let publish_result = match tokio::time::timeout(
            self.config.publish_timeout,
            self.publisher.publish(&row.topic, row.payload_bytes()),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(PublishError::timeout(
                u64::try_from(self.config.publish_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        match publish_result {
            Ok(()) => {
                if let Err(error) = self.store.mark_sent(row.id).await {
                    // Row stays pending and will be republished later;
                    // consumers must tolerate the duplicate.
                    warn!(
                        row_id = %row.id,
                        topic = %row.topic,
                        error = %error,
                        "published but failed to mark row sent"
                    );
                } else {
                    info!(
                        row_id = %row.id,
                        topic = %row.topic,
                        attempt_number,
                        "row published"
                    );
                }
            },
            Err(error) => {
                self.handle_failed_publish(&row, attempt_number, error).await;
            },
        }
    }

    /// Applies the retry policy to a failed publish.
    async fn handle_failed_publish(&self, row: &OutboxRow, attempt_number: u32, error: PublishError) {
        let context = RetryContext::new(
            attempt_number,
            error.clone(),
            self.clock.now_utc(),
            self.config.retry_policy.clone(),
        );

        match context.decide_retry() {
            RetryDecision::Retry { next_attempt_at } => {
                let attempt_count = i32::try_from(attempt_number).unwrap_or(i32::MAX);
                if let Err(store_error) =
                    self.store.schedule_retry(row.id, next_attempt_at, attempt_count).await
                {
                    warn!(
                        row_id = %row.id,
                        error = %store_error,
                        "failed to schedule retry; row stays pending"
                    );
                } else {
                    warn!(
                        row_id = %row.id,
                        topic = %row.topic,
                        attempt_number,
                        next_attempt_at = %next_attempt_at,
                        error = %error,
                        "publish failed, retry scheduled"
                    );
                }
            },
            RetryDecision::GiveUp { reason } => {
                if let Err(store_error) = self.store.mark_failed(row.id).await {
                    warn!(
                        row_id = %row.id,
                        error = %store_error,
                        "failed to mark row failed; row stays pending"
                    );
                } else {
                    error!(
                        row_id = %row.id,
                        topic = %row.topic,
                        attempt_number,
                        reason = %reason,
                        error = %error,
                        "publish permanently failed"
                    );
                }
            },
        }
    }
}

/// Handle to a spawned relay processor.
///
/// Cancelling the token stops the loop; [`shutdown`](RelayHandle::shutdown)
/// does both the cancel and a bounded wait for the in-flight cycle.
pub struct RelayHandle {
    handle: JoinHandle<()>,
    token: CancellationToken,
    grace: Duration,
}

impl RelayHandle {
    /// Signals cancellation and waits out the grace period.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ShutdownTimeout` if the in-flight cycle does not
    /// finish within the grace period, or `RelayError::Panic` if the loop
    /// task panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.token.cancel();

        match tokio::time::timeout(self.grace, self.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_error)) => Err(RelayError::Panic { message: join_error.to_string() }),
            Err(_elapsed) => Err(RelayError::ShutdownTimeout { timeout: self.grace }),
        }
    }

    /// Whether the processor task has already stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

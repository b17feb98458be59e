//! Storage seam between the relay and the outbox table.
//!
//! Trait-based abstraction over the store operations the processor drives,
//! so delivery logic and failure handling are testable without a database.
//! Production uses the concrete repository from `outpost-core`; tests use
//! the in-memory mock in [`mock`].

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use outpost_core::{
    error::Result,
    models::{OutboxRow, RowId},
    storage::Storage,
};

/// Store operations required by the relay processor.
///
/// The relay owns a fetched batch for one cycle only; no row is held across
/// cycles, so every operation is a single round trip keyed by row id.
pub trait OutboxStore: Send + Sync + 'static {
    /// Fetches up to `batch_size` eligible pending rows in ascending id
    /// order.
    ///
    /// Eligibility is `status = pending` and `next_attempt_at` unset or at or
    /// before `now`. An empty result is not an error.
    fn fetch_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxRow>>> + Send + '_>>;

    /// Marks a row as successfully published. Terminal, idempotent.
    fn mark_sent(&self, id: RowId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks a row as permanently failed. Terminal for the relay, idempotent.
    fn mark_failed(&self, id: RowId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns a row to pending with an incremented attempt count and a
    /// future eligibility time.
    fn schedule_retry(
        &self,
        id: RowId,
        next_attempt_at: DateTime<Utc>,
        attempt_count: i32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production store implementation backed by PostgreSQL.
pub struct PostgresOutboxStore {
    storage: Arc<Storage>,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl OutboxStore for PostgresOutboxStore {
    fn fetch_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxRow>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox.fetch_pending(batch_size, now).await })
    }

    fn mark_sent(&self, id: RowId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox.mark_sent(id).await })
    }

    fn mark_failed(&self, id: RowId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.outbox.mark_failed(id).await })
    }

    fn schedule_retry(
        &self,
        id: RowId,
        next_attempt_at: DateTime<Utc>,
        attempt_count: i32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(
            async move { storage.outbox.schedule_retry(id, next_attempt_at, attempt_count).await },
        )
    }
}

pub mod mock {
    //! In-memory store for testing relay logic without a database.

    use std::{
        collections::BTreeMap,
        future::Future,
        pin::Pin,
        sync::{
            atomic::{AtomicI64, AtomicUsize, Ordering},
            Arc,
        },
    };

    use chrono::{DateTime, Utc};
    use outpost_core::{
        error::{CoreError, Result},
        models::{OutboxRow, RowId, RowStatus},
    };
    use tokio::sync::RwLock;

    use super::OutboxStore;

    /// Mock store holding rows in a `BTreeMap` so iteration follows id order.
    ///
    /// Counts fetch and mark calls and supports injecting failures so tests
    /// can verify exactly which transitions the processor drove.
    pub struct MockOutboxStore {
        rows: Arc<RwLock<BTreeMap<i64, OutboxRow>>>,
        next_id: AtomicI64,
        fetch_calls: AtomicUsize,
        mark_sent_calls: Arc<RwLock<Vec<RowId>>>,
        mark_failed_calls: Arc<RwLock<Vec<RowId>>>,
        retry_calls: Arc<RwLock<Vec<(RowId, DateTime<Utc>, i32)>>>,
        fetch_error: Arc<RwLock<Option<String>>>,
        mark_sent_error: Arc<RwLock<Option<String>>>,
    }

    impl MockOutboxStore {
        /// Creates an empty mock store.
        pub fn new() -> Self {
            Self {
                rows: Arc::new(RwLock::new(BTreeMap::new())),
                next_id: AtomicI64::new(1),
                fetch_calls: AtomicUsize::new(0),
                mark_sent_calls: Arc::new(RwLock::new(Vec::new())),
                mark_failed_calls: Arc::new(RwLock::new(Vec::new())),
                retry_calls: Arc::new(RwLock::new(Vec::new())),
                fetch_error: Arc::new(RwLock::new(None)),
                mark_sent_error: Arc::new(RwLock::new(None)),
            }
        }

        /// Stages a pending row and returns its assigned id.
        pub async fn add_pending_row(&self, topic: &str, payload: &[u8]) -> RowId {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let now = Utc::now();
            let row = OutboxRow {
                id: RowId(id),
                topic: topic.to_string(),
                payload: payload.to_vec(),
                status: RowStatus::Pending,
                attempt_count: 0,
                next_attempt_at: None,
                created_at: now,
                updated_at: now,
            };
            self.rows.write().await.insert(id, row);
            RowId(id)
        }

        /// Injects an error for the next fetch operation.
        pub async fn inject_fetch_error(&self, error: impl Into<String>) {
            *self.fetch_error.write().await = Some(error.into());
        }

        /// Injects an error for the next `mark_sent` operation.
        pub async fn inject_mark_sent_error(&self, error: impl Into<String>) {
            *self.mark_sent_error.write().await = Some(error.into());
        }

        /// Current status of a row.
        pub async fn row_status(&self, id: RowId) -> Option<RowStatus> {
            self.rows.read().await.get(&id.0).map(|r| r.status)
        }

        /// Full copy of a row for verification.
        pub async fn row(&self, id: RowId) -> Option<OutboxRow> {
            self.rows.read().await.get(&id.0).cloned()
        }

        /// Number of fetch operations issued so far.
        pub fn fetch_count(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }

        /// Ids passed to `mark_sent`, in call order.
        pub async fn mark_sent_calls(&self) -> Vec<RowId> {
            self.mark_sent_calls.read().await.clone()
        }

        /// Ids passed to `mark_failed`, in call order.
        pub async fn mark_failed_calls(&self) -> Vec<RowId> {
            self.mark_failed_calls.read().await.clone()
        }

        /// Retry schedules recorded, in call order.
        pub async fn retry_calls(&self) -> Vec<(RowId, DateTime<Utc>, i32)> {
            self.retry_calls.read().await.clone()
        }
    }

    impl Default for MockOutboxStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl OutboxStore for MockOutboxStore {
        fn fetch_pending(
            &self,
            batch_size: usize,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxRow>>> + Send + '_>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.clone();
            let fetch_error = self.fetch_error.clone();

            Box::pin(async move {
                let error = fetch_error.write().await.take();
                if let Some(error) = error {
                    return Err(CoreError::Database(error));
                }

                let rows = rows.read().await;
                let batch = rows
                    .values()
                    .filter(|r| {
                        r.status == RowStatus::Pending
                            && r.next_attempt_at.is_none_or(|at| at <= now)
                    })
                    .take(batch_size)
                    .cloned()
                    .collect();

                Ok(batch)
            })
        }

        fn mark_sent(&self, id: RowId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let rows = self.rows.clone();
            let calls = self.mark_sent_calls.clone();
            let mark_sent_error = self.mark_sent_error.clone();

            Box::pin(async move {
                calls.write().await.push(id);

                let error = mark_sent_error.write().await.take();
                if let Some(error) = error {
                    return Err(CoreError::Database(error));
                }

                if let Some(row) = rows.write().await.get_mut(&id.0) {
                    row.status = RowStatus::Sent;
                    row.updated_at = Utc::now();
                }
                Ok(())
            })
        }

        fn mark_failed(&self, id: RowId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let rows = self.rows.clone();
            let calls = self.mark_failed_calls.clone();

            Box::pin(async move {
                calls.write().await.push(id);

                if let Some(row) = rows.write().await.get_mut(&id.0) {
                    row.status = RowStatus::Failed;
                    row.updated_at = Utc::now();
                }
                Ok(())
            })
        }

        fn schedule_retry(
            &self,
            id: RowId,
            next_attempt_at: DateTime<Utc>,
            attempt_count: i32,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let rows = self.rows.clone();
            let calls = self.retry_calls.clone();

            Box::pin(async move {
                calls.write().await.push((id, next_attempt_at, attempt_count));

                if let Some(row) = rows.write().await.get_mut(&id.0) {
                    row.status = RowStatus::Pending;
                    row.attempt_count = attempt_count;
                    row.next_attempt_at = Some(next_attempt_at);
                    row.updated_at = Utc::now();
                }
                Ok(())
            })
        }
    }
}

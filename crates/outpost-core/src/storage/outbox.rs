//! Repository for outbox row database operations.
//!
//! Provides the staging insert used by producer transactions and the
//! fetch/mark operations the relay drives. Inserts are offered against the
//! pool and against a caller-supplied transaction so a staged event commits
//! or rolls back together with the entity write that produced it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{OutboxRow, RowId},
};

/// Repository for outbox row database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Stages a new row in `pending` status.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails; the store never silently drops a
    /// write.
    pub async fn insert(&self, topic: &str, payload: &[u8]) -> Result<RowId> {
        self.insert_impl(&*self.pool, topic, payload).await
    }

    /// Stages a new row within an open transaction.
    ///
    /// This is the variant producer workflows use: the staged event becomes
    /// visible to the relay only when the owning transaction commits.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        topic: &str,
        payload: &[u8],
    ) -> Result<RowId> {
        self.insert_impl(&mut **tx, topic, payload).await
    }

    async fn insert_impl<'e, E>(&self, executor: E, topic: &str, payload: &[u8]) -> Result<RowId>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO outbox (topic, payload, status)
            VALUES ($1, $2, 'pending')
            RETURNING id
            "#,
        )
        .bind(topic)
        .bind(payload)
        .fetch_one(executor)
        .await?;

        Ok(RowId(id))
    }

    /// Fetches up to `limit` eligible pending rows in insertion order.
    ///
    /// A row is eligible when its `next_attempt_at` is unset or due. Returns
    /// an empty vector (not an error) when nothing is pending. Never returns
    /// more than `limit` rows.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn fetch_pending(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxRow>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, topic, payload, status, attempt_count, next_attempt_at,
                   created_at, updated_at
            FROM outbox
            WHERE status = 'pending'
              AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows)
    }

    /// Marks a row as successfully published.
    ///
    /// Terminal state. The update is idempotent: marking an already-sent row
    /// succeeds and leaves the status unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_sent(&self, id: RowId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'sent', updated_at = NOW()
            WHERE id = $1 AND status <> 'sent'
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks a row as permanently failed.
    ///
    /// Terminal for the relay. Idempotent in the same way as [`mark_sent`].
    ///
    /// [`mark_sent`]: Repository::mark_sent
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(&self, id: RowId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'failed', updated_at = NOW()
            WHERE id = $1 AND status <> 'failed'
            "#,
        )
        .bind(id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Returns a row to `pending` with a future eligibility time.
    ///
    /// Records the incremented attempt count so the retry policy can decide
    /// when to give up.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn schedule_retry(
        &self,
        id: RowId,
        next_attempt_at: DateTime<Utc>,
        attempt_count: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'pending', attempt_count = $2, next_attempt_at = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(next_attempt_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Looks up a single row by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: RowId) -> Result<Option<OutboxRow>> {
        let row = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, topic, payload, status, attempt_count, next_attempt_at,
                   created_at, updated_at
            FROM outbox
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row)
    }
}

//! Repository for the sample task entity.

use std::sync::Arc;

use sqlx::{Executor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{error::Result, models::Task};

/// Repository for task database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Persists a new task.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or constraints are violated.
    pub async fn create(&self, task: &Task) -> Result<()> {
        self.create_impl(&*self.pool, task).await
    }

    /// Persists a new task within an open transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &Task,
    ) -> Result<()> {
        self.create_impl(&mut **tx, task).await
    }

    async fn create_impl<'e, E>(&self, executor: E, task: &Task) -> Result<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, description, due_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(task.id)
        .bind(&task.description)
        .bind(task.due_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Looks up a task by id.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, description, due_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(task)
    }
}

//! Sample producer workflow exercising the transactional seam.
//!
//! Creating a task persists the entity and stages its event in one
//! transaction: either both commit or neither does. This is the pattern any
//! producer joining the outbox guarantee follows.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    error::{CoreError, Result},
    models::Task,
    storage::Storage,
    writer::OutboxWriter,
};

/// Stream that task events are staged for.
pub const TASK_TOPIC: &str = "tasks";

/// Producer service for the sample task entity.
pub struct TaskService {
    storage: Storage,
    writer: OutboxWriter,
}

impl TaskService {
    /// Creates a task service over shared storage.
    pub fn new(storage: Storage) -> Self {
        let writer = OutboxWriter::new(storage.outbox.clone());
        Self { storage, writer }
    }

    /// Creates a task and stages its event atomically.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for an empty description, or a
    /// storage/serialization error. On any error the transaction rolls back
    /// and neither the task nor its event is persisted.
    pub async fn create(&self, description: &str, due_at: DateTime<Utc>) -> Result<Task> {
        if description.trim().is_empty() {
            return Err(CoreError::InvalidInput("description must not be empty".to_string()));
        }

        let task = Task::new(description, due_at);

        let mut tx = self.storage.outbox.pool().begin().await?;
        self.storage.tasks.create_in_tx(&mut tx, &task).await?;
        let row_id = self.writer.write_in_tx(&mut tx, TASK_TOPIC, &task).await?;
        tx.commit().await?;

        info!(task_id = %task.id, row_id = %row_id, "task created and event staged");

        Ok(task)
    }
}

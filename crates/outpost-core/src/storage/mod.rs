//! Database access layer implementing the repository pattern.
//!
//! The repository layer translates between domain models and the database
//! schema. All database operations go through these repositories; SQL outside
//! this module is forbidden to keep the schema contract in one place.

use std::sync::Arc;

use sqlx::PgPool;

pub mod outbox;
pub mod tasks;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
///
/// Manages a shared connection pool and provides type-safe access to each
/// domain repository. The pool is shared between the producer write path and
/// the relay's fetch/mark cycle.
#[derive(Clone)]
pub struct Storage {
    /// Repository for outbox row operations.
    pub outbox: Arc<outbox::Repository>,

    /// Repository for the sample task entity.
    pub tasks: Arc<tasks::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            outbox: Arc::new(outbox::Repository::new(pool.clone())),
            tasks: Arc::new(tasks::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.outbox.pool()).await?;

        Ok(())
    }
}

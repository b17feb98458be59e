//! Transactional write path into the outbox.
//!
//! The writer is the only way rows enter the outbox. It serializes an event
//! into the opaque payload form and stages it through the repository, either
//! directly or inside a caller-owned transaction. Serialization failures are
//! reported synchronously and nothing is inserted.

use std::sync::Arc;

use serde::Serialize;
use sqlx::{Postgres, Transaction};

use crate::{
    error::{CoreError, Result},
    models::RowId,
    storage::outbox,
};

/// Staging API used by producer workflows to record an event.
///
/// Producers that need the outbox guarantee must use [`write_in_tx`] inside
/// the same transaction as their own entity write; [`write`] exists for
/// callers without a surrounding transaction.
///
/// [`write_in_tx`]: OutboxWriter::write_in_tx
/// [`write`]: OutboxWriter::write
#[derive(Clone)]
pub struct OutboxWriter {
    outbox: Arc<outbox::Repository>,
}

impl OutboxWriter {
    /// Creates a writer over the outbox repository.
    pub fn new(outbox: Arc<outbox::Repository>) -> Self {
        Self { outbox }
    }

    /// Serializes `event` and stages it for delivery to `topic`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for an empty topic,
    /// `CoreError::Serialization` if the event cannot be encoded, or a
    /// storage error if the insert fails.
    pub async fn write<T: Serialize>(&self, topic: &str, event: &T) -> Result<RowId> {
        let payload = encode(topic, event)?;
        self.outbox.insert(topic, &payload).await
    }

    /// Serializes `event` and stages it within an open transaction.
    ///
    /// The staged row commits or rolls back together with whatever else the
    /// transaction writes, which is what makes the delivery guarantee hold.
    ///
    /// # Errors
    ///
    /// Same conditions as [`write`](OutboxWriter::write).
    pub async fn write_in_tx<T: Serialize>(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        topic: &str,
        event: &T,
    ) -> Result<RowId> {
        let payload = encode(topic, event)?;
        self.outbox.insert_in_tx(tx, topic, &payload).await
    }
}

/// Validates the topic and encodes the event to its payload form.
fn encode<T: Serialize>(topic: &str, event: &T) -> Result<Vec<u8>> {
    if topic.is_empty() {
        return Err(CoreError::InvalidInput("topic must not be empty".to_string()));
    }

    let payload = serde_json::to_vec(event)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use serde::Deserialize;

    use super::*;
    use crate::models::Task;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        order_id: u64,
        amount_cents: i64,
    }

    #[test]
    fn encoded_payload_round_trips() {
        let event = OrderPlaced { order_id: 42, amount_cents: 1999 };

        let payload = encode("orders", &event).expect("encoding should succeed");
        let decoded: OrderPlaced = serde_json::from_slice(&payload).expect("payload is valid JSON");

        assert_eq!(decoded, event);
    }

    #[test]
    fn task_events_round_trip() {
        let task = Task::new("file the report", Utc::now());

        let payload = encode("tasks", &task).expect("encoding should succeed");
        let decoded: Task = serde_json::from_slice(&payload).expect("payload is valid JSON");

        assert_eq!(decoded.id, task.id);
        assert_eq!(decoded.description, task.description);
    }

    #[test]
    fn empty_topic_is_rejected_before_encoding() {
        let event = OrderPlaced { order_id: 1, amount_cents: 100 };

        let err = encode("", &event).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn unencodable_event_fails_synchronously() {
        // JSON object keys must be strings; a tuple-keyed map cannot encode.
        let mut event = HashMap::new();
        event.insert((1u8, 2u8), "value");

        let err = encode("orders", &event).unwrap_err();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}

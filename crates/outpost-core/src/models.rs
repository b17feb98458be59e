//! Core domain models and strongly-typed identifiers.
//!
//! Defines outbox rows, their lifecycle states, and the sample `tasks`
//! producer entity. Includes database serialization impls so the types map
//! directly onto their PostgreSQL columns.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed outbox row identifier.
///
/// Wraps the `BIGSERIAL` surrogate key assigned by the store. Row ids are
/// monotonically increasing, so ascending id order is insertion order and
/// therefore the delivery-attempt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub i64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for RowId {
    fn type_info() -> PgTypeInfo {
        <i64 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RowId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for RowId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i64 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Lifecycle state of an outbox row.
///
/// Rows are created `pending` and move to exactly one of the terminal states.
/// There is no intermediate claim state: a single relay instance drains the
/// table, so a row is either waiting, delivered, or abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// Waiting for the relay to pick the row up.
    ///
    /// Also the state a row returns to when a retryable publish failure
    /// schedules another attempt.
    Pending,

    /// Successfully published to the sink.
    ///
    /// Terminal. The relay never re-reads a sent row.
    Sent,

    /// Abandoned after a non-retryable failure or exhausted attempts.
    ///
    /// Terminal for the relay; operators may reset the status manually to
    /// requeue the row.
    Failed,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for RowStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RowStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid row status: {s}").into()),
        }
    }
}

/// One staged event awaiting relay to the message stream.
///
/// The payload is opaque to everything past the writer: the relay forwards
/// the bytes to the sink without interpreting them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxRow {
    /// Store-assigned identifier; doubles as the FIFO ordering key.
    pub id: RowId,

    /// Destination stream name.
    pub topic: String,

    /// Serialized event body.
    ///
    /// Stored as `Vec<u8>` for database compatibility, converted to `Bytes`
    /// for cheap handoff to the publisher.
    pub payload: Vec<u8>,

    /// Current lifecycle state.
    pub status: RowStatus,

    /// Number of failed publish attempts so far.
    pub attempt_count: i32,

    /// Earliest time the row is eligible for another attempt.
    ///
    /// `None` means immediately eligible. Set by the retry scheduler after a
    /// retryable failure.
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// When the row was staged.
    pub created_at: DateTime<Utc>,

    /// Updated on every status transition.
    pub updated_at: DateTime<Utc>,
}

impl OutboxRow {
    /// Payload as `Bytes` for zero-copy handoff.
    pub fn payload_bytes(&self) -> Bytes {
        Bytes::from(self.payload.clone())
    }
}

/// Sample producer entity staged alongside its outbox event.
///
/// Tasks exist to exercise the transactional seam: creating one persists the
/// entity and its event in a single transaction.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,

    /// Free-form description.
    pub description: String,

    /// When the task is due.
    pub due_at: DateTime<Utc>,
}

impl Task {
    /// Creates a task with a fresh random id.
    pub fn new(description: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self { id: Uuid::new_v4(), description: description.into(), due_at }
    }
}

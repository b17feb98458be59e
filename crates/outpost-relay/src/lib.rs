//! Outbox relay processor with at-least-once delivery guarantees.
//!
//! This crate implements the background side of the transactional outbox:
//! a polling processor that fetches pending rows staged by `outpost-core`'s
//! writer, publishes each payload to a message stream, and records the
//! resulting state transition with bounded exponential-backoff retries.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ RelayProcessor │──▶│ OutboxStore  │   │ Publisher   │
//! └────────────────┘   └──────────────┘   └─────────────┘
//!        │                   │                   │
//!        ▼                   ▼                   ▼
//!   poll cycle          PostgreSQL         Redis Stream
//! ```
//!
//! The processor is a single logical worker: one fetch→publish→mark cycle
//! runs at a time, rows are handled in insertion order, and a failure on one
//! row never blocks the rows behind it. Producers never wait on the sink;
//! they only pay for the transactional insert.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use outpost_core::{storage::Storage, RealClock};
//! use outpost_relay::{
//!     processor::{RelayConfig, RelayProcessor},
//!     publisher::RedisStreamPublisher,
//!     store::PostgresOutboxStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(pool: sqlx::PgPool) -> anyhow::Result<()> {
//! let storage = Arc::new(Storage::new(pool));
//! let store = Arc::new(PostgresOutboxStore::new(storage));
//! let publisher = Arc::new(RedisStreamPublisher::from_url("redis://localhost:6379")?);
//!
//! let processor =
//!     RelayProcessor::new(store, publisher, RelayConfig::default(), Arc::new(RealClock));
//! let token = CancellationToken::new();
//! let handle = processor.spawn(token.clone());
//!
//! // ... later: cancelling the token is the sole stop signal
//! token.cancel();
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod processor;
pub mod publisher;
pub mod retry;
pub mod store;

pub use error::{RelayError, Result};
pub use processor::{RelayConfig, RelayHandle, RelayProcessor};
pub use publisher::{PublishError, Publisher, RedisStreamPublisher};
pub use retry::RetryPolicy;
pub use store::{OutboxStore, PostgresOutboxStore};

use std::time::Duration;

/// Default maximum rows fetched per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 30;

/// Default wait between cycles that found no work.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default upper bound on a single publish call.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

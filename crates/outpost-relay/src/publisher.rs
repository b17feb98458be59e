//! Message sink abstraction and the Redis Streams implementation.
//!
//! The relay treats the sink as a named-topic append: one `publish` call per
//! row, any error is a row-level failure. The production implementation
//! appends payloads to a Redis Stream with `XADD`; tests use the scripted
//! mock in [`mock`].

use std::{future::Future, pin::Pin};

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

/// Errors a publisher can report for a single delivery.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// The sink could not be reached.
    #[error("sink connection failed: {message}")]
    Connection {
        /// Error message describing the connection failure.
        message: String,
    },

    /// The sink rejected the payload.
    #[error("sink rejected payload: {message}")]
    Rejected {
        /// Error message describing the rejection.
        message: String,
    },

    /// The publish call exceeded its timeout.
    #[error("publish timeout after {timeout_ms}ms")]
    Timeout {
        /// Milliseconds before the call was abandoned.
        timeout_ms: u64,
    },
}

impl PublishError {
    /// Creates a connection error from a message.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Creates a rejection error from a message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Whether this failure is worth another attempt.
    ///
    /// Connection failures and timeouts are transient; a rejection means the
    /// sink understood the payload and refused it, so retrying the same bytes
    /// cannot succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Rejected { .. } => false,
        }
    }
}

/// Delivery capability the relay calls once per row.
pub trait Publisher: Send + Sync + 'static {
    /// Delivers `payload` to the named topic.
    ///
    /// Implementations apply their own transport semantics; the relay treats
    /// any error as a row-level failure and consults
    /// [`PublishError::is_retryable`] for scheduling.
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), PublishError>> + Send + '_>>;
}

/// Publisher appending payloads to Redis Streams.
///
/// Each topic maps to a stream key; payloads land as the `data` field of an
/// auto-id entry, mirroring how consumers read them back out.
pub struct RedisStreamPublisher {
    pool: deadpool_redis::Pool,
}

impl RedisStreamPublisher {
    /// Creates a publisher over an existing connection pool.
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }

    /// Creates a publisher from a Redis URL.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Connection` if the pool cannot be built.
    pub fn from_url(url: &str) -> std::result::Result<Self, PublishError> {
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| PublishError::connection(format!("failed to create redis pool: {e}")))?;

        Ok(Self { pool })
    }
}

impl Publisher for RedisStreamPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), PublishError>> + Send + '_>> {
        let topic = topic.to_string();
        let pool = self.pool.clone();

        Box::pin(async move {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| PublishError::connection(format!("failed to get connection: {e}")))?;

            let () = deadpool_redis::redis::cmd("XADD")
                .arg(&topic)
                .arg("*")
                .arg("data")
                .arg(payload.as_ref())
                .query_async(&mut conn)
                .await
                .map_err(|e| PublishError::connection(format!("XADD failed: {e}")))?;

            debug!(topic = %topic, bytes = payload.len(), "appended payload to stream");
            Ok(())
        })
    }
}

pub mod mock {
    //! Scripted publisher for testing the relay without a broker.

    use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

    use bytes::Bytes;
    use tokio::sync::RwLock;

    use super::{PublishError, Publisher};

    /// In-memory publisher with scriptable failures.
    ///
    /// Failures are keyed on payload content so tests can fail a specific
    /// row in a batch. An optional artificial delay simulates a hung sink
    /// for timeout coverage.
    #[derive(Default)]
    pub struct MockPublisher {
        published: Arc<RwLock<Vec<(String, Bytes)>>>,
        failures: Arc<RwLock<Vec<(Vec<u8>, PublishError)>>>,
        delay: Arc<RwLock<Option<Duration>>>,
    }

    impl MockPublisher {
        /// Creates a mock publisher that accepts everything.
        pub fn new() -> Self {
            Self::default()
        }

        /// Fails any publish whose payload contains `marker`.
        pub async fn fail_payloads_containing(&self, marker: &[u8], error: PublishError) {
            self.failures.write().await.push((marker.to_vec(), error));
        }

        /// Delays every publish by `delay` before responding.
        pub async fn set_delay(&self, delay: Duration) {
            *self.delay.write().await = Some(delay);
        }

        /// Returns every successfully published `(topic, payload)` pair in
        /// call order.
        pub async fn published(&self) -> Vec<(String, Bytes)> {
            self.published.read().await.clone()
        }

        /// Number of successful publish calls.
        pub async fn publish_count(&self) -> usize {
            self.published.read().await.len()
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
    }

    impl Publisher for MockPublisher {
        fn publish(
            &self,
            topic: &str,
            payload: Bytes,
        ) -> Pin<Box<dyn Future<Output = std::result::Result<(), PublishError>> + Send + '_>>
        {
            let topic = topic.to_string();
            let published = self.published.clone();
            let failures = self.failures.clone();
            let delay = self.delay.clone();

            Box::pin(async move {
                let delay = *delay.read().await;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                for (marker, error) in failures.read().await.iter() {
                    if contains(&payload, marker) {
                        return Err(error.clone());
                    }
                }

                published.write().await.push((topic, payload));
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(PublishError::connection("connection refused").is_retryable());
        assert!(PublishError::timeout(5000).is_retryable());
        assert!(!PublishError::rejected("malformed entry").is_retryable());
    }

    #[test]
    fn error_display_format() {
        let error = PublishError::timeout(5000);
        assert_eq!(error.to_string(), "publish timeout after 5000ms");

        let rejected = PublishError::rejected("stream full");
        assert_eq!(rejected.to_string(), "sink rejected payload: stream full");
    }

    #[tokio::test]
    async fn mock_publisher_records_successful_publishes() {
        let publisher = mock::MockPublisher::new();

        publisher.publish("orders", Bytes::from_static(b"a")).await.unwrap();
        publisher.publish("orders", Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(publisher.publish_count().await, 2);
    }

    #[tokio::test]
    async fn mock_publisher_fails_scripted_payloads() {
        let publisher = mock::MockPublisher::new();
        publisher
            .fail_payloads_containing(b"poison", PublishError::connection("down"))
            .await;

        let err = publisher.publish("orders", Bytes::from_static(b"has poison inside")).await;
        assert!(err.is_err());

        publisher.publish("orders", Bytes::from_static(b"clean")).await.unwrap();
        assert_eq!(publisher.publish_count().await, 1);
    }
}

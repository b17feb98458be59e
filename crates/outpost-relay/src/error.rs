//! Error types for the relay processor.

use std::time::Duration;

use outpost_core::CoreError;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors surfaced by the relay loop and its lifecycle controller.
///
/// Row-level publish failures are not errors at this level; they are handled
/// inside a cycle by marking the row. Only store failures and lifecycle
/// problems propagate.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A store operation failed during a cycle.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// The processor task did not stop within the shutdown grace period.
    #[error("relay shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Grace period that elapsed before giving up.
        timeout: Duration,
    },

    /// The processor task panicked.
    #[error("relay task panicked: {message}")]
    Panic {
        /// Panic payload description.
        message: String,
    },
}

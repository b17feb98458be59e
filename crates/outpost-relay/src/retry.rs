//! Exponential backoff retry policy for failed publishes.
//!
//! A retryable publish failure returns the row to the pending queue with a
//! jittered exponential delay; non-retryable failures and exhausted attempt
//! budgets give up and the row is marked failed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::publisher::PublishError;

/// Retry policy applied to failed publish attempts.
///
/// Setting `max_attempts` to 1 disables requeueing entirely: the first
/// failure is final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of publish attempts (including the initial attempt).
    pub max_attempts: u32,

    /// Base delay for exponential backoff calculation.
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1, // ±10% randomization
        }
    }
}

/// Retry decision context for a failed publish attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based).
    pub attempt_number: u32,
    /// Error that caused the failure.
    pub error: PublishError,
    /// Timestamp of the failed attempt.
    pub failed_at: DateTime<Utc>,
    /// Retry policy to apply.
    pub policy: RetryPolicy,
}

/// Result of retry decision calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the publish at the specified time.
    Retry {
        /// When the row becomes eligible again.
        next_attempt_at: DateTime<Utc>,
    },
    /// Do not retry - the row is abandoned.
    GiveUp {
        /// Reason why the row should not be retried.
        reason: String,
    },
}

impl RetryContext {
    /// Creates a new retry context for a failed publish.
    pub fn new(
        attempt_number: u32,
        error: PublishError,
        failed_at: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> Self {
        Self { attempt_number, error, failed_at, policy }
    }

    /// Determines if and when to retry based on the failure context.
    pub fn decide_retry(&self) -> RetryDecision {
        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.policy.max_attempts),
            };
        }

        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        let delay = self.calculate_delay();
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };
        let next_attempt_at = self.failed_at + chrono_delay;

        RetryDecision::Retry { next_attempt_at }
    }

    /// Calculates the delay until the next attempt.
    ///
    /// Doubles the base delay per attempt, capped at `max_delay`, with
    /// jitter applied inside the cap.
    fn calculate_delay(&self) -> Duration {
        let exponent = self.attempt_number.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let base_delay = self.policy.base_delay * multiplier;

        let capped_delay = std::cmp::min(base_delay, self.policy.max_delay);

        let jittered_delay = apply_jitter(capped_delay, self.policy.jitter_factor);

        std::cmp::min(jittered_delay, self.policy.max_delay)
    }
}

/// Applies jitter to a duration to prevent thundering herd effects.
///
/// Randomizes the delay by ±`jitter_factor` percentage. For example, with
/// jitter_factor=0.25, a 10s delay becomes 7.5s to 12.5s randomly.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_increases_correctly() {
        let mut policy = RetryPolicy::default();
        policy.jitter_factor = 0.0;
        let base_time = Utc::now();

        let delays = (1..=4)
            .map(|attempt| {
                let context = RetryContext::new(
                    attempt,
                    PublishError::timeout(5000),
                    base_time,
                    policy.clone(),
                );
                context.calculate_delay()
            })
            .collect::<Vec<_>>();

        // Should be: 1s, 2s, 4s, 8s
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
    }

    #[test]
    fn retry_respects_maximum_attempts() {
        let policy = RetryPolicy { max_attempts: 3, ..Default::default() };

        let context = RetryContext::new(
            3, // At maximum attempts
            PublishError::timeout(5000),
            Utc::now(),
            policy,
        );

        match context.decide_retry() {
            RetryDecision::GiveUp { reason } => {
                assert!(reason.contains("maximum attempts"));
            },
            RetryDecision::Retry { .. } => {
                unreachable!("Should not retry when at max attempts");
            },
        }
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let policy = RetryPolicy { max_attempts: 1, ..Default::default() };

        let context =
            RetryContext::new(1, PublishError::connection("down"), Utc::now(), policy);

        assert!(matches!(context.decide_retry(), RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn non_retryable_errors_rejected() {
        let context = RetryContext::new(
            1,
            PublishError::rejected("malformed entry"),
            Utc::now(),
            RetryPolicy::default(),
        );

        match context.decide_retry() {
            RetryDecision::GiveUp { reason } => {
                assert!(reason.contains("non-retryable"));
            },
            RetryDecision::Retry { .. } => {
                unreachable!("Should not retry rejections");
            },
        }
    }

    #[test]
    fn retry_schedules_relative_to_failure_time() {
        let mut policy = RetryPolicy::default();
        policy.jitter_factor = 0.0;
        let failed_at = Utc::now();

        let context =
            RetryContext::new(1, PublishError::connection("down"), failed_at, policy);

        match context.decide_retry() {
            RetryDecision::Retry { next_attempt_at } => {
                assert_eq!(next_attempt_at, failed_at + chrono::Duration::seconds(1));
            },
            RetryDecision::GiveUp { .. } => unreachable!("first attempt should retry"),
        }
    }

    #[test]
    fn jitter_varies_delay() {
        let policy = RetryPolicy {
            jitter_factor: 0.5, // Large jitter for testing
            ..Default::default()
        };

        let base_delay = Duration::from_secs(10);
        let mut seen_delays = std::collections::HashSet::new();

        for _ in 0..20 {
            let jittered = apply_jitter(base_delay, policy.jitter_factor);
            seen_delays.insert(jittered.as_millis());
        }

        assert!(seen_delays.len() > 1, "Jitter should create variation");

        // All values should be reasonable (5-15 seconds with 50% jitter)
        for &delay_ms in &seen_delays {
            assert!(delay_ms >= 5_000, "Delay too small: {delay_ms}ms");
            assert!(delay_ms <= 15_000, "Delay too large: {delay_ms}ms");
        }
    }

    #[test]
    fn max_delay_enforced() {
        let policy = RetryPolicy {
            max_attempts: 20,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            ..Default::default()
        };

        let context = RetryContext::new(
            15, // High attempt number for large exponential delay
            PublishError::timeout(5000),
            Utc::now(),
            policy,
        );

        let delay = context.calculate_delay();
        assert!(delay <= Duration::from_secs(60));
    }
}

//! Retry with exponential backoff, cap, and jitter, built on `backon`
//! the way the teacher framework's `grpc::connect_channel` builds its
//! connection-retry sequence from `ExponentialBuilder`.
//!
//! Used for transient errors (snapshot unavailable, deadline exceeded,
//! transport drop) per spec §7. Proof errors are never retried through
//! this path — callers must check [`crate::ClientError::is_proof_error`]
//! first.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

/// Knobs for a reconnect backoff sequence.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Delay cap once the exponential curve passes it.
    pub max_delay: Duration,
    /// Number of retries after the initial attempt.
    pub max_retries: usize,
    /// Whether to randomize each delay to avoid a reconnect thundering herd.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(5),
            max_retries: 8,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry config for reconnecting the subscriber transport.
    pub fn for_reconnect() -> Self {
        Self::default()
    }

    /// Materialize the full delay sequence for one connect attempt cycle,
    /// one entry per retry.
    pub fn delays(&self) -> Vec<Duration> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter().build().collect()
        } else {
            builder.build().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_without_jitter() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_retries: 5,
            jitter: false,
        };
        let delays = config.delays();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[3], Duration::from_millis(800));
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_retries: 10,
            jitter: false,
        };
        let delays = config.delays();
        assert_eq!(delays[3], Duration::from_millis(500));
        assert_eq!(delays[9], Duration::from_millis(500));
    }

    #[test]
    fn sequence_length_matches_max_retries() {
        let config = RetryConfig {
            max_retries: 3,
            ..Default::default()
        };
        assert_eq!(config.delays().len(), 3);
    }

    #[test]
    fn no_overflow_on_large_retry_count() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            max_retries: 100,
            jitter: false,
        };
        let delays = config.delays();
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(60)));
    }
}

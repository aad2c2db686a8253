//! # Requeue Backoff
//!
//! Delay before a failed `Jwker` is reconciled again.
//!
//! `FixedBackoff` retries at a constant interval (10s by default). `FibonacciBackoff`
//! grows the delay along the Fibonacci sequence, which backs off more gently than
//! exponential growth while still spreading retries against the broker.
//!
//! ## Usage
//!
//! ```rust
//! use jwker_controller::controller::backoff::{BackoffPolicy, FibonacciBackoff};
//! use std::time::Duration;
//!
//! let backoff = FibonacciBackoff::new(Duration::from_secs(10), Duration::from_secs(300));
//! assert_eq!(backoff.next_delay(1), Duration::from_secs(10));
//! assert_eq!(backoff.next_delay(2), Duration::from_secs(10));
//! assert_eq!(backoff.next_delay(3), Duration::from_secs(20));
//! assert_eq!(backoff.next_delay(4), Duration::from_secs(30));
//! ```

use std::time::Duration;

/// Maps the number of consecutive failures of one resource to a requeue delay
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// `attempt` starts at 1 for the first failure
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Constant delay regardless of attempt count
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::constants::DEFAULT_REQUEUE_INTERVAL_SECS))
    }
}

impl BackoffPolicy for FixedBackoff {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Fibonacci backoff calculator
///
/// Attempts 1 and 2 wait `min`, every later attempt waits the sum of the two
/// previous delays, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }
}

impl BackoffPolicy for FibonacciBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let (mut prev, mut current) = (Duration::ZERO, self.min);
        for _ in 1..attempt {
            let next = prev.saturating_add(current);
            prev = current;
            current = next.min(self.max);
            if current == self.max {
                break;
            }
        }
        current
    }
}

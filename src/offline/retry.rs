//! # Retry Policy and Backoff Strategies
//!
//! Shared retry arithmetic for the offline layer. The sync reconciler uses
//! the attempt ceiling to decide when a pending operation becomes `failed`;
//! the media download manager additionally sleeps between attempts using
//! the backoff strategy.
//!
//! ## Usage
//!
//! ```rust
//! use companion_offline::offline::retry::{BackoffStrategy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, BackoffStrategy::Linear { step: Duration::from_secs(1) });
//! assert_eq!(policy.delay_after(2), Duration::from_secs(2));
//! assert!(policy.should_give_up(3));
//! ```

use std::time::Duration;

/// How long to wait after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same interval after every failure
    Fixed {
        interval: Duration,
    },
    /// `attempt × step`
    Linear {
        step: Duration,
    },
    /// `base × 2^(attempt-1)`, capped at `max`
    Exponential {
        base: Duration,
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Delay after the given (1-based) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffStrategy::Fixed { interval } => interval,
            BackoffStrategy::Linear { step } => step.saturating_mul(attempt),
            BackoffStrategy::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Linear {
            step: Duration::from_secs(1),
        }
    }
}

/// Attempt ceiling plus backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed in total (not retries after the first)
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether `attempts` failures exhaust the policy
    pub fn should_give_up(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffStrategy::default())
    }
}

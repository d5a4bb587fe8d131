//! Retry policy for making uploaded artifacts public.
//!
//! Implements linear backoff: the delay before attempt `n` (1-based) is
//! `initial_delay + (n - 1) * delay_increment`.

use std::time::Duration;

use crate::config::PublishSettings;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishRetryPolicy {
    /// Maximum number of publish attempts, first one included.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Added to the delay for every subsequent attempt.
    pub delay_increment: Duration,
}

impl PublishRetryPolicy {
    pub fn new(settings: &PublishSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: secs_to_duration(settings.initial_delay_secs),
            delay_increment: secs_to_duration(settings.delay_increment_secs),
        }
    }

    /// Delay to wait before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.delay_increment
            .checked_mul(attempt.saturating_sub(1))
            .map_or(Duration::MAX, |extra| self.initial_delay.saturating_add(extra))
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Total time spent waiting across the first `attempts` attempts.
    pub fn total_delay(&self, attempts: u32) -> Duration {
        (1..=attempts).fold(Duration::ZERO, |total, n| {
            total.saturating_add(self.delay_before(n))
        })
    }
}

/// Negative or unrepresentable values clamp to zero or `Duration::MAX`.
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for PublishRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(2),
            delay_increment: Duration::from_millis(1500),
        }
    }
}

// src/core/strategy/retry.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Linear reconnect backoff with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retry_times: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_times: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_times: u32, retry_delay: Duration) -> Self {
        Self {
            retry_times,
            retry_delay,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based), or `None` to stop retrying.
    pub fn retry_strategy(&self, attempt: u32) -> Option<Duration> {
        if attempt <= self.retry_times {
            Some(self.retry_delay.saturating_mul(attempt))
        } else {
            None
        }
    }
}

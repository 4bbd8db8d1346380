//! Bounded retry of part sends.

use std::time::Duration;

use chunkdrop_transfer::ChannelError;
use serde::{Deserialize, Serialize};

/// How often a transient part failure is retried.
///
/// Defaults to no retries: a failed part fails its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    /// Whether failed attempt number `attempt` (0-based) may be retried.
    pub fn should_retry(&self, attempt: u32, err: &ChannelError) -> bool {
        err.is_retryable() && attempt < self.max_retries
    }

    /// Delay before retrying after failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

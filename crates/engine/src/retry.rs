//! Retry policy: exponential backoff with a dead-letter ceiling.
//!
//! After the k-th failed attempt a job waits `2^k` seconds before it becomes
//! eligible again (2s, 4s, 8s, 16s, ...). Once the retry count reaches
//! `max_retries` the job is dead-lettered instead.

use chrono::{DateTime, Duration, Utc};

/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Longest backoff ever scheduled, to keep `2^k` from overflowing on large ceilings.
const MAX_BACKOFF_SECONDS: i64 = 24 * 60 * 60;

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return to `pending`, eligible again at the given instant.
    Retry { eligible_at: DateTime<Utc> },
    /// Retry budget exhausted; move to `dlq`.
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Backoff before the next attempt, given the retry count after the failure.
    pub fn backoff(retry_count: u32) -> Duration {
        let seconds = 2i64
            .checked_pow(retry_count)
            .unwrap_or(MAX_BACKOFF_SECONDS)
            .min(MAX_BACKOFF_SECONDS);
        Duration::seconds(seconds)
    }

    /// Decide the next state for a job whose retry count is now `retry_count`.
    pub fn decide(&self, retry_count: u32, now: DateTime<Utc>) -> RetryDecision {
        if retry_count >= self.max_retries {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Retry {
                eligible_at: now + Self::backoff(retry_count),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

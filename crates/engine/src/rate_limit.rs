//! Fixed-window request limiter, keyed per caller.
//!
//! The first request for a key opens a window of `window_ms`; at most
//! `max_requests` are admitted until it closes. The Redis limiter keeps the
//! counter in an expiring key so every API instance shares one budget.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use beacon_common::config::RateLimitConfig;
use beacon_common::error::AppError;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `key`. Returns false once the window's budget is spent.
    async fn try_acquire(&self, key: &str, now: DateTime<Utc>) -> Result<bool, AppError>;
}

struct Window {
    count: u32,
    resets_at: DateTime<Utc>,
}

/// Process-local limiter.
pub struct MemoryRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn window(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.config.window_ms).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn try_acquire(&self, key: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut windows = self.windows.lock();
        windows.retain(|_, w| w.resets_at > now);

        match windows.get_mut(key) {
            Some(window) if window.count >= self.config.max_requests => Ok(false),
            Some(window) => {
                window.count += 1;
                Ok(true)
            }
            None => {
                windows.insert(
                    key.to_string(),
                    Window {
                        count: 1,
                        resets_at: now + self.window(),
                    },
                );
                Ok(self.config.max_requests > 0)
            }
        }
    }
}

/// Redis-backed limiter shared by every API instance.
pub struct RedisRateLimiter {
    redis: ConnectionManager,
    config: RateLimitConfig,
}

impl RedisRateLimiter {
    pub fn new(redis: ConnectionManager, config: RateLimitConfig) -> Self {
        Self { redis, config }
    }

    fn redis_key(key: &str) -> String {
        format!("notification:rate-limit:{}", key)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn try_acquire(&self, key: &str, _now: DateTime<Utc>) -> Result<bool, AppError> {
        let key = Self::redis_key(key);
        let mut redis = self.redis.clone();

        let count: u64 = redis.incr(&key, 1).await?;
        if count == 1 {
            let window_ms = i64::try_from(self.config.window_ms).unwrap_or(i64::MAX);
            let _: () = redis.pexpire(&key, window_ms).await?;
        }

        Ok(count <= u64::from(self.config.max_requests))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> MemoryRateLimiter {
        MemoryRateLimiter::new(RateLimitConfig {
            window_ms: 60_000,
            max_requests,
        })
    }

    #[tokio::test]
    async fn test_budget_is_spent_then_refilled() {
        let limiter = limiter(3);
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.try_acquire("alice", now).await.unwrap());
        }
        assert!(!limiter.try_acquire("alice", now).await.unwrap());
        assert!(
            !limiter
                .try_acquire("alice", now + Duration::seconds(59))
                .await
                .unwrap()
        );

        let next_window = now + Duration::seconds(60);
        assert!(limiter.try_acquire("alice", next_window).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_have_separate_budgets() {
        let limiter = limiter(1);
        let now = Utc::now();

        assert!(limiter.try_acquire("alice", now).await.unwrap());
        assert!(!limiter.try_acquire("alice", now).await.unwrap());
        assert!(limiter.try_acquire("bob", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_windows_are_dropped() {
        let limiter = limiter(5);
        let now = Utc::now();

        limiter.try_acquire("alice", now).await.unwrap();
        limiter.try_acquire("bob", now).await.unwrap();
        assert_eq!(limiter.windows.lock().len(), 2);

        limiter
            .try_acquire("carol", now + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(limiter.windows.lock().len(), 1);
    }
}

//! Idempotency cache for client-supplied request keys.
//!
//! A key registered less than [`REUSE_WINDOW_SECONDS`] ago resolves to the
//! notification id registered for it; older registrations are replaced. A
//! registration whose request failed is released so the client can retry. The memory
//! store prunes entries older than [`RETENTION_SECONDS`] on every
//! registration. The Redis store lets the key expire after the reuse window,
//! which keeps the cache shared across API instances.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use beacon_common::error::AppError;

/// A registration younger than this is reused (1 minute).
pub const REUSE_WINDOW_SECONDS: i64 = 60;

/// Registrations older than this are dropped from the memory store (5 minutes).
pub const RETENTION_SECONDS: i64 = 300;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Return the id registered for `key` within the reuse window, or
    /// register `candidate` and return `None`.
    async fn check_or_register(
        &self,
        key: &str,
        candidate: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, AppError>;

    /// Drop `key` if it still points at `id`.
    async fn release(&self, key: &str, id: Uuid) -> Result<(), AppError>;
}

/// Scope a client key to the user that supplied it.
pub fn scoped_key(user_id: Uuid, key: &str) -> String {
    format!("{}:{}", user_id, key)
}

struct Entry {
    notification_id: Uuid,
    registered_at: DateTime<Utc>,
}

/// Process-local idempotency cache.
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(entries: &mut HashMap<String, Entry>, key: &str, id: Uuid, now: DateTime<Utc>) {
        entries.insert(
            key.to_string(),
            Entry {
                notification_id: id,
                registered_at: now,
            },
        );

        let retention = Duration::seconds(RETENTION_SECONDS);
        entries.retain(|_, e| now - e.registered_at <= retention);
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn check_or_register(
        &self,
        key: &str,
        candidate: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, AppError> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(key) {
            if now - entry.registered_at < Duration::seconds(REUSE_WINDOW_SECONDS) {
                return Ok(Some(entry.notification_id));
            }
        }

        Self::insert(&mut entries, key, candidate, now);
        Ok(None)
    }

    async fn release(&self, key: &str, id: Uuid) -> Result<(), AppError> {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.notification_id == id) {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Deletes KEYS[1] only while it still holds ARGV[1].
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Redis-backed idempotency cache shared by every API instance.
pub struct RedisIdempotencyStore {
    redis: ConnectionManager,
}

impl RedisIdempotencyStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn redis_key(key: &str) -> String {
        format!("notification:idempotency:{}", key)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn check_or_register(
        &self,
        key: &str,
        candidate: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, AppError> {
        let key = Self::redis_key(key);
        let mut redis = self.redis.clone();

        // SET key candidate NX EX window: Some("OK") when we registered it.
        let set: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(candidate.to_string())
            .arg("NX")
            .arg("EX")
            .arg(REUSE_WINDOW_SECONDS)
            .query_async(&mut redis)
            .await?;
        if set.is_some() {
            return Ok(None);
        }

        let existing: Option<String> = redis.get(&key).await?;
        match existing.and_then(|id| id.parse().ok()) {
            Some(id) => Ok(Some(id)),
            None => {
                // Expired (or unreadable) between the two commands.
                redis
                    .set_ex::<_, _, ()>(&key, candidate.to_string(), REUSE_WINDOW_SECONDS as u64)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn release(&self, key: &str, id: Uuid) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(Self::redis_key(key))
            .arg(id.to_string())
            .invoke_async(&mut redis)
            .await?;
        Ok(())
    }
}

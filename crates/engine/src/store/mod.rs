//! Persistence seams for the delivery pipeline.
//!
//! [`PgStore`] is the production implementation; [`MemoryStore`] backs tests
//! and single-process development setups. Both uphold the same contract: the
//! claim is a single conditional write, and outcome writes only land while the
//! caller still holds the claim.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use beacon_common::error::AppError;
use beacon_common::types::{DeliveryJob, DeviceToken, Notification, Platform};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Fields supplied by the caller when creating a notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub linked_content: Option<String>,
    pub metadata: serde_json::Value,
}

/// Recorded on a job whose lease ran out before its holder wrote an outcome.
pub const LEASE_EXPIRED_ERROR: &str = "claim lease expired before an outcome was recorded";

/// A claim attempt: who is claiming, when, and for how long.
#[derive(Debug, Clone, Copy)]
pub struct Claim {
    pub token: Uuid,
    pub at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(at: DateTime<Utc>, lease: Duration) -> Self {
        Self {
            token: Uuid::new_v4(),
            at,
            lease_expires_at: at + lease,
        }
    }
}

/// Owner-scoped notification records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(
        &self,
        id: Uuid,
        new: &NewNotification,
        now: DateTime<Utc>,
    ) -> Result<Notification, AppError>;

    async fn notification(&self, id: Uuid) -> Result<Option<Notification>, AppError>;

    /// Non-deleted notifications of a user, newest first.
    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, AppError>;

    async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError>;

    /// Returns false when the user owns no such notification.
    async fn mark_read(&self, user_id: Uuid, id: Uuid, now: DateTime<Utc>)
    -> Result<bool, AppError>;

    /// Sets the soft-delete flag. Returns false when the user owns no such notification.
    async fn soft_delete(
        &self,
        user_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

/// User → device token directory.
#[async_trait]
pub trait TokenDirectory: Send + Sync {
    async fn tokens_for_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError>;

    async fn device_token(&self, id: Uuid) -> Result<Option<DeviceToken>, AppError>;

    /// Register a token, reassigning ownership if another user held it.
    async fn upsert_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<DeviceToken, AppError>;

    /// Returns false when the user does not own the token.
    async fn remove_token(&self, user_id: Uuid, token: &str) -> Result<bool, AppError>;
}

/// Durable delivery-job queue.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create one pending job per token. Existing (notification, token) pairs are left untouched.
    async fn insert_jobs(
        &self,
        notification_id: Uuid,
        device_token_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// Claimable jobs, oldest first: pending and past their backoff, or
    /// processing with an expired lease.
    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DeliveryJob>, AppError>;

    /// Move a job into `processing` if it is still claimable. Returns the
    /// claimed row, or `None` when another cycle got there first.
    ///
    /// Taking over an expired lease counts the abandoned attempt as a
    /// failure: `retry_count` goes up by one and the error is set to
    /// [`LEASE_EXPIRED_ERROR`].
    async fn claim(&self, job_id: Uuid, claim: &Claim) -> Result<Option<DeliveryJob>, AppError>;

    /// Mark the job delivered and its notification sent.
    async fn complete(
        &self,
        job_id: Uuid,
        claim_token: Uuid,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Return the job to `pending` with a backoff deadline.
    async fn reschedule(
        &self,
        job_id: Uuid,
        claim_token: Uuid,
        retry_count: i32,
        error: &str,
        eligible_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Move the job to the terminal `dlq` state.
    async fn dead_letter(
        &self,
        job_id: Uuid,
        claim_token: Uuid,
        retry_count: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn job(&self, id: Uuid) -> Result<Option<DeliveryJob>, AppError>;

    async fn jobs_for_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryJob>, AppError>;

    /// Most recently dead-lettered jobs.
    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeliveryJob>, AppError>;
}

/// Everything the pipeline needs from persistence.
pub trait Store: NotificationStore + TokenDirectory + JobStore {}

impl<T: NotificationStore + TokenDirectory + JobStore> Store for T {}

//! PostgreSQL-backed store.
//!
//! Every job transition is a single `UPDATE ... WHERE` guarded by the current
//! status (for claims) or by the claim token (for outcomes), so concurrent
//! cycles in any number of processes never both win the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use beacon_common::error::AppError;
use beacon_common::types::{DeliveryJob, DeviceToken, JobStatus, Notification, Platform};

use super::{
    Claim, JobStore, LEASE_EXPIRED_ERROR, NewNotification, NotificationStore, TokenDirectory,
};

/// Store over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_notification(
        &self,
        id: Uuid,
        new: &NewNotification,
        now: DateTime<Utc>,
    ) -> Result<Notification, AppError> {
        let notification: Notification = sqlx::query_as(
            r#"
            INSERT INTO notifications
                (id, user_id, title, body, linked_content, metadata, received_at, sent, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, $7, $7)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new.user_id)
        .bind(&new.title)
        .bind(&new.body)
        .bind(&new.linked_content)
        .bind(&new.metadata)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(notification)
    }

    async fn notification(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        let notification = sqlx::query_as("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(notification)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, AppError> {
        let notifications: Vec<Notification> = sqlx::query_as(
            r#"
            SELECT *
            FROM notifications
            WHERE user_id = $1
              AND is_deleted = false
              AND ($2::timestamptz IS NULL OR created_at >= $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false AND is_deleted = false",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn mark_read(
        &self,
        user_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true, updated_at = $3 WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete(
        &self,
        user_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_deleted = true, updated_at = $3 WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TokenDirectory for PgStore {
    async fn tokens_for_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        let tokens: Vec<DeviceToken> = sqlx::query_as(
            "SELECT * FROM device_tokens WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn device_token(&self, id: Uuid) -> Result<Option<DeviceToken>, AppError> {
        let token = sqlx::query_as("SELECT * FROM device_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(token)
    }

    async fn upsert_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<DeviceToken, AppError> {
        let device_token: DeviceToken = sqlx::query_as(
            r#"
            INSERT INTO device_tokens (id, user_id, token, platform, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (token) DO UPDATE
                SET user_id = EXCLUDED.user_id,
                    platform = EXCLUDED.platform,
                    updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token)
        .bind(platform.to_string())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(device_token)
    }

    async fn remove_token(&self, user_id: Uuid, token: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM device_tokens WHERE token = $1 AND user_id = $2")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_jobs(
        &self,
        notification_id: Uuid,
        device_token_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for token_id in device_token_ids {
            let result = sqlx::query(
                r#"
                INSERT INTO notification_jobs
                    (id, notification_id, device_token_id, status, retry_count, created_at, updated_at)
                VALUES ($1, $2, $3, $4, 0, $5, $5)
                ON CONFLICT (notification_id, device_token_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(notification_id)
            .bind(token_id)
            .bind(JobStatus::Pending.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DeliveryJob>, AppError> {
        let jobs: Vec<DeliveryJob> = sqlx::query_as(
            r#"
            SELECT *
            FROM notification_jobs
            WHERE (status = 'pending' AND (eligible_at IS NULL OR eligible_at <= $1))
               OR (status = 'processing' AND lease_expires_at <= $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn claim(&self, job_id: Uuid, claim: &Claim) -> Result<Option<DeliveryJob>, AppError> {
        // Re-checking eligibility here keeps a job that was rescheduled after
        // selection from being picked up before its backoff elapses.
        // SET expressions see the pre-update status.
        let job = sqlx::query_as(
            r#"
            UPDATE notification_jobs
            SET retry_count = CASE WHEN status = 'processing'
                                   THEN retry_count + 1 ELSE retry_count END,
                error_message = CASE WHEN status = 'processing'
                                     THEN $5 ELSE error_message END,
                status = 'processing',
                claim_token = $2,
                lease_expires_at = $3,
                updated_at = $4
            WHERE id = $1
              AND (
                    (status = 'pending' AND (eligible_at IS NULL OR eligible_at <= $4))
                 OR (status = 'processing' AND lease_expires_at <= $4)
              )
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(claim.token)
        .bind(claim.lease_expires_at)
        .bind(claim.at)
        .bind(LEASE_EXPIRED_ERROR)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        claim_token: Uuid,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE notification_jobs
            SET status = 'completed',
                message_id = $3,
                error_message = NULL,
                eligible_at = NULL,
                claim_token = NULL,
                lease_expires_at = NULL,
                updated_at = $4
            WHERE id = $1 AND status = 'processing' AND claim_token = $2
            RETURNING notification_id
            "#,
        )
        .bind(job_id)
        .bind(claim_token)
        .bind(message_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((notification_id,)) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("UPDATE notifications SET sent = true, updated_at = $2 WHERE id = $1")
            .bind(notification_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn reschedule(
        &self,
        job_id: Uuid,
        claim_token: Uuid,
        retry_count: i32,
        error: &str,
        eligible_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET status = 'pending',
                retry_count = $3,
                error_message = $4,
                eligible_at = $5,
                claim_token = NULL,
                lease_expires_at = NULL,
                updated_at = $6
            WHERE id = $1 AND status = 'processing' AND claim_token = $2
            "#,
        )
        .bind(job_id)
        .bind(claim_token)
        .bind(retry_count)
        .bind(error)
        .bind(eligible_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn dead_letter(
        &self,
        job_id: Uuid,
        claim_token: Uuid,
        retry_count: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET status = 'dlq',
                retry_count = $3,
                error_message = $4,
                eligible_at = NULL,
                claim_token = NULL,
                lease_expires_at = NULL,
                updated_at = $5
            WHERE id = $1 AND status = 'processing' AND claim_token = $2
            "#,
        )
        .bind(job_id)
        .bind(claim_token)
        .bind(retry_count)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn job(&self, id: Uuid) -> Result<Option<DeliveryJob>, AppError> {
        let job = sqlx::query_as("SELECT * FROM notification_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn jobs_for_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryJob>, AppError> {
        let jobs: Vec<DeliveryJob> = sqlx::query_as(
            "SELECT * FROM notification_jobs WHERE notification_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeliveryJob>, AppError> {
        let jobs: Vec<DeliveryJob> = sqlx::query_as(
            "SELECT * FROM notification_jobs WHERE status = 'dlq' ORDER BY updated_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }
}

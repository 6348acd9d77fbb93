//! In-memory store.
//!
//! All state sits behind one mutex, which is never held across an `.await`,
//! so each operation (including the claim) is atomic within the process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use beacon_common::error::AppError;
use beacon_common::types::{DeliveryJob, DeviceToken, JobStatus, Notification, Platform};

use super::{
    Claim, JobStore, LEASE_EXPIRED_ERROR, NewNotification, NotificationStore, TokenDirectory,
};

#[derive(Default)]
struct State {
    notifications: HashMap<Uuid, Notification>,
    tokens: HashMap<Uuid, DeviceToken>,
    jobs: HashMap<Uuid, DeliveryJob>,
}

impl State {
    /// The job, if it is `processing` under `claim_token`.
    fn claimed_job(&mut self, job_id: Uuid, claim_token: Uuid) -> Option<&mut DeliveryJob> {
        self.jobs.get_mut(&job_id).filter(|job| {
            job.status == JobStatus::Processing && job.claim_token == Some(claim_token)
        })
    }
}

/// Process-local store, used by tests and single-instance development runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(
        &self,
        id: Uuid,
        new: &NewNotification,
        now: DateTime<Utc>,
    ) -> Result<Notification, AppError> {
        let notification = Notification {
            id,
            user_id: new.user_id,
            title: new.title.clone(),
            body: new.body.clone(),
            is_read: false,
            is_deleted: false,
            linked_content: new.linked_content.clone(),
            metadata: Some(new.metadata.clone()),
            received_at: Some(now),
            sent: false,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.lock();
        if state.notifications.contains_key(&id) {
            return Err(AppError::Validation(format!(
                "Notification {} already exists",
                id
            )));
        }
        state.notifications.insert(id, notification.clone());
        Ok(notification)
    }

    async fn notification(&self, id: Uuid) -> Result<Option<Notification>, AppError> {
        Ok(self.state.lock().notifications.get(&id).cloned())
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, AppError> {
        let state = self.state.lock();
        let mut notifications: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && !n.is_deleted)
            .filter(|n| since.is_none_or(|since| n.created_at >= since))
            .cloned()
            .collect();

        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(notifications)
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        let state = self.state.lock();
        let count = state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && !n.is_read && !n.is_deleted)
            .count();
        Ok(count as i64)
    }

    async fn mark_read(
        &self,
        user_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        match state.notifications.get_mut(&id) {
            Some(n) if n.user_id == user_id => {
                n.is_read = true;
                n.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete(
        &self,
        user_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        match state.notifications.get_mut(&id) {
            Some(n) if n.user_id == user_id => {
                n.is_deleted = true;
                n.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TokenDirectory for MemoryStore {
    async fn tokens_for_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        let state = self.state.lock();
        let mut tokens: Vec<DeviceToken> = state
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }

    async fn device_token(&self, id: Uuid) -> Result<Option<DeviceToken>, AppError> {
        Ok(self.state.lock().tokens.get(&id).cloned())
    }

    async fn upsert_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Result<DeviceToken, AppError> {
        let mut state = self.state.lock();

        if let Some(existing) = state.tokens.values_mut().find(|t| t.token == token) {
            existing.user_id = user_id;
            existing.platform = platform;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let device_token = DeviceToken {
            id: Uuid::new_v4(),
            user_id,
            token: token.to_string(),
            platform,
            created_at: now,
            updated_at: now,
        };
        state.tokens.insert(device_token.id, device_token.clone());
        Ok(device_token)
    }

    async fn remove_token(&self, user_id: Uuid, token: &str) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        let id = state
            .tokens
            .values()
            .find(|t| t.token == token && t.user_id == user_id)
            .map(|t| t.id);

        Ok(id.and_then(|id| state.tokens.remove(&id)).is_some())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_jobs(
        &self,
        notification_id: Uuid,
        device_token_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock();
        let mut inserted = 0u64;

        for token_id in device_token_ids {
            let exists = state
                .jobs
                .values()
                .any(|j| j.notification_id == notification_id && j.device_token_id == *token_id);
            if exists {
                continue;
            }

            let job = DeliveryJob::new_pending(notification_id, *token_id, now);
            state.jobs.insert(job.id, job);
            inserted += 1;
        }

        Ok(inserted)
    }

    async fn select_eligible(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DeliveryJob>, AppError> {
        let state = self.state.lock();
        let mut jobs: Vec<DeliveryJob> = state
            .jobs
            .values()
            .filter(|j| j.is_eligible(now))
            .cloned()
            .collect();

        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn claim(&self, job_id: Uuid, claim: &Claim) -> Result<Option<DeliveryJob>, AppError> {
        let mut state = self.state.lock();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };

        if !job.is_eligible(claim.at) {
            return Ok(None);
        }

        if job.status == JobStatus::Processing {
            job.retry_count += 1;
            job.error_message = Some(LEASE_EXPIRED_ERROR.to_string());
        }
        job.status = JobStatus::Processing;
        job.claim_token = Some(claim.token);
        job.lease_expires_at = Some(claim.lease_expires_at);
        job.updated_at = claim.at;
        Ok(Some(job.clone()))
    }

    async fn complete(
        &self,
        job_id: Uuid,
        claim_token: Uuid,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        let Some(job) = state.claimed_job(job_id, claim_token) else {
            return Ok(false);
        };

        job.status = JobStatus::Completed;
        job.message_id = Some(message_id.to_string());
        job.error_message = None;
        job.eligible_at = None;
        job.claim_token = None;
        job.lease_expires_at = None;
        job.updated_at = now;
        let notification_id = job.notification_id;

        if let Some(notification) = state.notifications.get_mut(&notification_id) {
            notification.sent = true;
            notification.updated_at = now;
        }
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
        let mut state = self.state.lock();
        let Some(job) = state.claimed_job(job_id, claim_token) else {
            return Ok(false);
        };

        job.status = JobStatus::Pending;
        job.retry_count = retry_count;
        job.error_message = Some(error.to_string());
        job.eligible_at = Some(eligible_at);
        job.claim_token = None;
        job.lease_expires_at = None;
        job.updated_at = now;
        Ok(true)
    }

    async fn dead_letter(
        &self,
        job_id: Uuid,
        claim_token: Uuid,
        retry_count: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        let Some(job) = state.claimed_job(job_id, claim_token) else {
            return Ok(false);
        };

        job.status = JobStatus::Dlq;
        job.retry_count = retry_count;
        job.error_message = Some(error.to_string());
        job.eligible_at = None;
        job.claim_token = None;
        job.lease_expires_at = None;
        job.updated_at = now;
        Ok(true)
    }

    async fn job(&self, id: Uuid) -> Result<Option<DeliveryJob>, AppError> {
        Ok(self.state.lock().jobs.get(&id).cloned())
    }

    async fn jobs_for_notification(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryJob>, AppError> {
        let state = self.state.lock();
        let mut jobs: Vec<DeliveryJob> = state
            .jobs
            .values()
            .filter(|j| j.notification_id == notification_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeliveryJob>, AppError> {
        let state = self.state.lock();
        let mut jobs: Vec<DeliveryJob> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Dlq)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(jobs)
    }
}

//! Dispatch cycle: select → claim → deliver → record outcome.
//!
//! A cycle selects at most `batch_size` eligible jobs, oldest first, and
//! handles them one at a time. Each job is claimed with a single conditional
//! write; losing that race simply skips the job. Every per-job failure is
//! turned into a state transition, so nothing escapes `run_cycle` and one bad
//! job never stops the rest of the batch.
//!
//! Cycles may overlap freely, within one process or across many.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use beacon_common::config::DispatchConfig;
use beacon_common::error::AppError;
use beacon_common::types::{DeliveryJob, DeviceToken, Notification};
use beacon_notifier::{DeliveryHints, GatewayError, PushGateway, PushMessage};

use crate::clock::Clock;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{Claim, LEASE_EXPIRED_ERROR, Store};

/// Default number of jobs handled per cycle.
pub const DEFAULT_BATCH_SIZE: u32 = 10;

/// Why a claimed job could not be delivered.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    /// The job's device token or notification no longer exists.
    #[error("missing reference: {0}")]
    MissingReference(String),

    /// The device token was re-registered by someone other than the notification's owner.
    #[error("device token {0} now belongs to another user")]
    TokenReassigned(Uuid),

    #[error("{0}")]
    Gateway(#[from] GatewayError),

    /// The store could not be read while resolving the job.
    #[error("store error: {0}")]
    Store(String),
}

impl DeliveryFailure {
    /// Retrying cannot bring back a deleted token or notification, nor hand a
    /// reassigned token back to its old owner.
    fn is_permanent(&self) -> bool {
        matches!(
            self,
            DeliveryFailure::MissingReference(_) | DeliveryFailure::TokenReassigned(_)
        )
    }
}

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub selected: u32,
    pub claimed: u32,
    pub completed: u32,
    pub retried: u32,
    pub dead_lettered: u32,
    /// Jobs another cycle claimed first.
    pub lost_claims: u32,
    /// Jobs whose claim or outcome write failed in the store.
    pub store_errors: u32,
}

/// Runs dispatch cycles against a store and a push gateway.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PushGateway>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    batch_size: u32,
    claim_lease: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PushGateway>,
        clock: Arc<dyn Clock>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            policy: RetryPolicy::new(config.max_retries),
            batch_size: config.batch_size,
            claim_lease: Duration::seconds(config.claim_lease_secs as i64),
        }
    }

    /// Run one bounded cycle. Never fails; problems are logged and counted.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let jobs = match self
            .store
            .select_eligible(self.clock.now(), self.batch_size)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to select delivery jobs");
                report.store_errors += 1;
                return report;
            }
        };
        report.selected = jobs.len() as u32;

        for job in jobs {
            self.handle_job(job, &mut report).await;
        }

        if report.claimed > 0 {
            tracing::info!(
                selected = report.selected,
                completed = report.completed,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                lost_claims = report.lost_claims,
                "Dispatch cycle finished"
            );
        }

        report
    }

    async fn handle_job(&self, job: DeliveryJob, report: &mut CycleReport) {
        let claim = Claim::new(self.clock.now(), self.claim_lease);
        let job = match self.store.claim(job.id, &claim).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                tracing::debug!(job_id = %job.id, "Job claimed by another cycle, skipping");
                report.lost_claims += 1;
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to claim job");
                report.store_errors += 1;
                return;
            }
        };
        report.claimed += 1;

        // Only an abandoned lease can push a claimed job to the ceiling.
        let retry_count = job.retry_count.max(0) as u32;
        if retry_count >= self.policy.max_retries {
            let error = job
                .error_message
                .clone()
                .unwrap_or_else(|| LEASE_EXPIRED_ERROR.to_string());
            let written = self
                .write_dead_letter(&job, claim.token, retry_count, &error, report)
                .await;
            Self::check_failure_write(&job, written, report);
            return;
        }

        match self.deliver(&job).await {
            Ok(message_id) => self.record_success(&job, claim.token, &message_id, report).await,
            Err(failure) => self.record_failure(&job, claim.token, failure, report).await,
        }
    }

    async fn deliver(&self, job: &DeliveryJob) -> Result<String, DeliveryFailure> {
        let token = self
            .store
            .device_token(job.device_token_id)
            .await
            .map_err(|e| DeliveryFailure::Store(e.to_string()))?
            .ok_or_else(|| {
                DeliveryFailure::MissingReference(format!(
                    "device token {} not found",
                    job.device_token_id
                ))
            })?;

        let notification = self
            .store
            .notification(job.notification_id)
            .await
            .map_err(|e| DeliveryFailure::Store(e.to_string()))?
            .ok_or_else(|| {
                DeliveryFailure::MissingReference(format!(
                    "notification {} not found",
                    job.notification_id
                ))
            })?;

        if token.user_id != notification.user_id {
            return Err(DeliveryFailure::TokenReassigned(token.id));
        }

        let message = build_message(&token, &notification);
        Ok(self.gateway.send(&message).await?)
    }

    async fn record_success(
        &self,
        job: &DeliveryJob,
        claim_token: Uuid,
        message_id: &str,
        report: &mut CycleReport,
    ) {
        match self
            .store
            .complete(job.id, claim_token, message_id, self.clock.now())
            .await
        {
            Ok(true) => {
                report.completed += 1;
                tracing::info!(
                    job_id = %job.id,
                    notification_id = %job.notification_id,
                    message_id,
                    gateway = self.gateway.name(),
                    "Push delivered"
                );
            }
            Ok(false) => Self::log_superseded(job),
            Err(e) => {
                report.store_errors += 1;
                tracing::error!(job_id = %job.id, error = %e, "Failed to record delivery");
            }
        }
    }

    async fn record_failure(
        &self,
        job: &DeliveryJob,
        claim_token: Uuid,
        failure: DeliveryFailure,
        report: &mut CycleReport,
    ) {
        let now = self.clock.now();
        let error = failure.to_string();
        let attempts = job.retry_count.max(0) as u32 + 1;

        let decision = if failure.is_permanent() {
            RetryDecision::DeadLetter
        } else {
            self.policy.decide(attempts, now)
        };

        let written = match decision {
            RetryDecision::Retry { eligible_at } => {
                let result = self
                    .store
                    .reschedule(job.id, claim_token, attempts as i32, &error, eligible_at, now)
                    .await;
                if matches!(result, Ok(true)) {
                    report.retried += 1;
                    tracing::warn!(
                        job_id = %job.id,
                        retry_count = attempts,
                        max_retries = self.policy.max_retries,
                        backoff_secs = (eligible_at - now).num_seconds(),
                        error = %error,
                        "Push failed, will retry"
                    );
                }
                result
            }
            RetryDecision::DeadLetter => {
                // Permanent failures skip the remaining budget, so the
                // recorded count still meets the dead-letter ceiling.
                let retry_count = attempts.max(self.policy.max_retries);
                self.write_dead_letter(job, claim_token, retry_count, &error, report)
                    .await
            }
        };

        Self::check_failure_write(job, written, report);
    }

    async fn write_dead_letter(
        &self,
        job: &DeliveryJob,
        claim_token: Uuid,
        retry_count: u32,
        error: &str,
        report: &mut CycleReport,
    ) -> Result<bool, AppError> {
        let result = self
            .store
            .dead_letter(job.id, claim_token, retry_count as i32, error, self.clock.now())
            .await;
        if matches!(result, Ok(true)) {
            report.dead_lettered += 1;
            tracing::error!(
                job_id = %job.id,
                retry_count,
                error = %error,
                "Job moved to dead-letter queue"
            );
        }
        result
    }

    fn check_failure_write(
        job: &DeliveryJob,
        written: Result<bool, AppError>,
        report: &mut CycleReport,
    ) {
        match written {
            Ok(true) => {}
            Ok(false) => Self::log_superseded(job),
            Err(e) => {
                report.store_errors += 1;
                tracing::error!(job_id = %job.id, error = %e, "Failed to record delivery failure");
            }
        }
    }

    fn log_superseded(job: &DeliveryJob) {
        tracing::warn!(
            job_id = %job.id,
            "Claim expired before the outcome was recorded; another cycle owns the job"
        );
    }
}

/// Build the gateway message for one job.
pub fn build_message(token: &DeviceToken, notification: &Notification) -> PushMessage {
    let mut data = BTreeMap::new();
    data.insert("notificationId".to_string(), notification.id.to_string());
    data.insert(
        "linkedContent".to_string(),
        notification.linked_content.clone().unwrap_or_default(),
    );
    data.insert("userId".to_string(), notification.user_id.to_string());
    data.insert("type".to_string(), notification.kind().to_string());

    PushMessage {
        token: token.token.clone(),
        title: notification.title.clone(),
        body: notification.body.clone(),
        data,
        hints: DeliveryHints::default(),
    }
}

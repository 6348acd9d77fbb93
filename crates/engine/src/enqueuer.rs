//! Fan-out of a created notification into delivery jobs.

use std::sync::Arc;

use uuid::Uuid;

use beacon_common::error::AppError;

use crate::clock::Clock;
use crate::store::Store;

/// Writes one pending job per device token currently registered to a user.
#[derive(Clone)]
pub struct Enqueuer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Enqueuer {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Enqueue `notification_id` for every token of `user_id`.
    ///
    /// Returns the number of jobs created. A user without tokens is a no-op,
    /// and calling this twice for the same notification creates nothing new.
    pub async fn enqueue(&self, notification_id: Uuid, user_id: Uuid) -> Result<u64, AppError> {
        let tokens = self.store.tokens_for_user(user_id).await?;
        if tokens.is_empty() {
            tracing::debug!(
                notification_id = %notification_id,
                user_id = %user_id,
                "No device tokens registered, nothing to enqueue"
            );
            return Ok(0);
        }

        let token_ids: Vec<Uuid> = tokens.iter().map(|t| t.id).collect();
        let inserted = self
            .store
            .insert_jobs(notification_id, &token_ids, self.clock.now())
            .await?;

        tracing::info!(
            notification_id = %notification_id,
            user_id = %user_id,
            jobs = inserted,
            "Delivery jobs enqueued"
        );

        Ok(inserted)
    }
}

//! Notification service: create, list, read-state and delivery inspection.
//!
//! Every created notification is handed to the [`Enqueuer`]. When a dispatcher
//! is attached, one dispatch cycle is started in the background right after,
//! so delivery does not have to wait for the next worker tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use beacon_common::error::AppError;
use beacon_common::types::{DeliveryJob, Notification};

use crate::clock::Clock;
use crate::dispatcher::Dispatcher;
use crate::enqueuer::Enqueuer;
use crate::idempotency::{IdempotencyStore, scoped_key};
use crate::store::{NewNotification, Store};

/// Default page size for [`NotificationService::list`].
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Largest page a caller may request.
pub const MAX_LIST_LIMIT: i64 = 100;

const MAX_TITLE_CHARS: usize = 200;
const MAX_BODY_CHARS: usize = 500;

/// Parameters for creating a notification on behalf of a user.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotificationParams {
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub linked_content: Option<String>,
}

/// Parameters for a test push to the caller's own devices.
#[derive(Debug, Clone, Deserialize)]
pub struct SendTestParams {
    pub title: String,
    pub body: String,
    #[serde(alias = "idempotencyKey")]
    pub idempotency_key: Option<String>,
}

pub struct NotificationService {
    store: Arc<dyn Store>,
    enqueuer: Enqueuer,
    idempotency: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn Store>,
        idempotency: Arc<dyn IdempotencyStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            enqueuer: Enqueuer::new(store.clone(), clock.clone()),
            store,
            idempotency,
            clock,
            dispatcher: None,
        }
    }

    /// Run a background dispatch cycle after every enqueue.
    pub fn with_dispatch_after_enqueue(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Create a system notification and queue it for delivery.
    pub async fn create(&self, params: &CreateNotificationParams) -> Result<Notification, AppError> {
        let new = NewNotification {
            user_id: params.user_id,
            title: params.title.clone(),
            body: params.body.clone(),
            linked_content: params.linked_content.clone(),
            metadata: serde_json::json!({ "type": "system" }),
        };

        self.persist_and_enqueue(Uuid::new_v4(), &new).await
    }

    /// Send a test push to the caller's own devices.
    ///
    /// A repeated idempotency key within a minute returns the notification
    /// created for the first request instead of creating another one. While
    /// that first request is still being processed the repeat gets
    /// [`AppError::Conflict`], and a failed request releases its key.
    pub async fn send_test(
        &self,
        user_id: Uuid,
        params: &SendTestParams,
    ) -> Result<Notification, AppError> {
        validate_length("title", &params.title, MAX_TITLE_CHARS)?;
        validate_length("body", &params.body, MAX_BODY_CHARS)?;

        let id = Uuid::new_v4();
        let key = params
            .idempotency_key
            .as_deref()
            .map(|key| scoped_key(user_id, key));

        if let Some(key) = &key {
            let now = self.clock.now();
            if let Some(existing) = self.idempotency.check_or_register(key, id, now).await? {
                return match self.store.notification(existing).await? {
                    Some(notification) => {
                        tracing::debug!(
                            notification_id = %notification.id,
                            user_id = %user_id,
                            "Idempotency key reused, returning existing notification"
                        );
                        Ok(notification)
                    }
                    None => Err(AppError::Conflict(
                        "A request with this idempotency key is still in progress".to_string(),
                    )),
                };
            }
        }

        let new = NewNotification {
            user_id,
            title: params.title.clone(),
            body: params.body.clone(),
            linked_content: None,
            metadata: serde_json::json!({
                "type": "test",
                "idempotencyKey": params.idempotency_key,
            }),
        };

        let result = self.persist_and_enqueue(id, &new).await;
        if let (Err(e), Some(key)) = (&result, &key) {
            tracing::warn!(
                notification_id = %id,
                user_id = %user_id,
                error = %e,
                "Test push failed, releasing idempotency key"
            );
            if let Err(release_error) = self.idempotency.release(key, id).await {
                tracing::error!(error = %release_error, "Failed to release idempotency key");
            }
        }
        result
    }

    /// Non-deleted notifications of a user, newest first.
    pub async fn list(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Notification>, AppError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        self.store.list_notifications(user_id, limit, since).await
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        self.store.unread_count(user_id).await
    }

    pub async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<(), AppError> {
        if !self
            .store
            .mark_read(user_id, notification_id, self.clock.now())
            .await?
        {
            return Err(not_found(notification_id));
        }
        Ok(())
    }

    /// Soft delete: the row stays, but no longer shows up in listings.
    pub async fn delete(&self, user_id: Uuid, notification_id: Uuid) -> Result<(), AppError> {
        if !self
            .store
            .soft_delete(user_id, notification_id, self.clock.now())
            .await?
        {
            return Err(not_found(notification_id));
        }

        tracing::info!(
            notification_id = %notification_id,
            user_id = %user_id,
            "Notification deleted"
        );
        Ok(())
    }

    /// Delivery jobs of a notification the user owns.
    pub async fn delivery_jobs(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryJob>, AppError> {
        match self.store.notification(notification_id).await? {
            Some(n) if n.user_id == user_id => {
                self.store.jobs_for_notification(notification_id).await
            }
            _ => Err(not_found(notification_id)),
        }
    }

    async fn persist_and_enqueue(
        &self,
        id: Uuid,
        new: &NewNotification,
    ) -> Result<Notification, AppError> {
        let notification = self
            .store
            .insert_notification(id, new, self.clock.now())
            .await?;

        tracing::info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            kind = notification.kind(),
            "Notification created"
        );

        self.enqueuer
            .enqueue(notification.id, notification.user_id)
            .await?;

        if let Some(dispatcher) = &self.dispatcher {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.run_cycle().await;
            });
        }

        Ok(notification)
    }
}

fn validate_length(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    let len = value.chars().count();
    if len == 0 || len > max {
        return Err(AppError::Validation(format!(
            "{} must be between 1 and {} characters",
            field, max
        )));
    }
    Ok(())
}

fn not_found(notification_id: Uuid) -> AppError {
    AppError::NotFound(format!("Notification {} not found", notification_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::types::{JobStatus, Platform};
    use chrono::Duration;

    use crate::idempotency::{MemoryIdempotencyStore, REUSE_WINDOW_SECONDS};
    use crate::store::NotificationStore;
    use crate::test_support::Harness;

    fn service(h: &Harness) -> NotificationService {
        NotificationService::new(
            h.store.clone(),
            Arc::new(MemoryIdempotencyStore::new()),
            h.clock.clone(),
        )
    }

    fn test_params(key: Option<&str>) -> SendTestParams {
        SendTestParams {
            title: "Ping".to_string(),
            body: "Is this thing on?".to_string(),
            idempotency_key: key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_create_enqueues_one_job_per_token() {
        let h = Harness::new();
        let user_id = Uuid::new_v4();
        h.register_token(user_id, "token-1", Platform::Android).await;
        h.register_token(user_id, "token-2", Platform::Ios).await;

        let svc = service(&h);
        let notification = svc
            .create(&CreateNotificationParams {
                user_id,
                title: "Welcome".to_string(),
                body: "Thanks for joining".to_string(),
                linked_content: Some("/content/1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(notification.kind(), "system");
        assert!(!notification.sent);
        assert!(notification.received_at.is_some());

        let jobs = svc.delivery_jobs(user_id, notification.id).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Pending));
    }

    #[tokio::test]
    async fn test_create_without_tokens_has_no_jobs() {
        let h = Harness::new();
        let user_id = Uuid::new_v4();
        let svc = service(&h);

        let notification = svc
            .create(&CreateNotificationParams {
                user_id,
                title: "Hi".to_string(),
                body: "There".to_string(),
                linked_content: None,
            })
            .await
            .unwrap();

        assert!(
            svc.delivery_jobs(user_id, notification.id)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(!h.store.notification(notification.id).await.unwrap().unwrap().sent);
    }

    #[tokio::test]
    async fn test_send_test_validates_lengths() {
        let h = Harness::new();
        let svc = service(&h);
        let user_id = Uuid::new_v4();

        let mut params = test_params(None);
        params.title = String::new();
        assert!(matches!(
            svc.send_test(user_id, &params).await,
            Err(AppError::Validation(_))
        ));

        let mut params = test_params(None);
        params.body = "x".repeat(501);
        assert!(matches!(
            svc.send_test(user_id, &params).await,
            Err(AppError::Validation(_))
        ));

        let mut params = test_params(None);
        params.title = "é".repeat(200);
        assert!(svc.send_test(user_id, &params).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_test_reuses_key_within_window() {
        let h = Harness::new();
        let svc = service(&h);
        let user_id = Uuid::new_v4();

        let first = svc.send_test(user_id, &test_params(Some("k1"))).await.unwrap();
        assert_eq!(first.kind(), "test");
        assert_eq!(
            first.metadata.as_ref().unwrap()["idempotencyKey"],
            serde_json::json!("k1")
        );

        h.clock.advance(Duration::seconds(30));
        let second = svc.send_test(user_id, &test_params(Some("k1"))).await.unwrap();
        assert_eq!(second.id, first.id);

        h.clock.advance(Duration::seconds(31));
        let third = svc.send_test(user_id, &test_params(Some("k1"))).await.unwrap();
        assert_ne!(third.id, first.id);
    }

    #[tokio::test]
    async fn test_repeat_while_first_request_in_flight_conflicts() {
        let h = Harness::new();
        let idempotency = Arc::new(MemoryIdempotencyStore::new());
        let svc = NotificationService::new(h.store.clone(), idempotency.clone(), h.clock.clone());
        let user_id = Uuid::new_v4();

        // The first request has registered its key but not yet stored its notification.
        let in_flight = Uuid::new_v4();
        idempotency
            .check_or_register(&scoped_key(user_id, "k"), in_flight, h.clock.now())
            .await
            .unwrap();

        h.clock.advance(Duration::seconds(1));
        assert!(matches!(
            svc.send_test(user_id, &test_params(Some("k"))).await,
            Err(AppError::Conflict(_))
        ));
        assert!(svc.list(user_id, None, None).await.unwrap().is_empty());

        // Once the key has aged out of the reuse window, a new request goes through.
        h.clock.advance(Duration::seconds(REUSE_WINDOW_SECONDS));
        let fresh = svc.send_test(user_id, &test_params(Some("k"))).await.unwrap();
        assert_ne!(fresh.id, in_flight);
        assert_eq!(svc.list(user_id, None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_idempotency_keys_do_not_cross_users() {
        let h = Harness::new();
        let svc = service(&h);

        let alice = svc
            .send_test(Uuid::new_v4(), &test_params(Some("shared")))
            .await
            .unwrap();
        let bob = svc
            .send_test(Uuid::new_v4(), &test_params(Some("shared")))
            .await
            .unwrap();
        assert_ne!(alice.id, bob.id);
    }

    #[tokio::test]
    async fn test_send_test_without_key_always_creates() {
        let h = Harness::new();
        let svc = service(&h);
        let user_id = Uuid::new_v4();

        let a = svc.send_test(user_id, &test_params(None)).await.unwrap();
        let b = svc.send_test(user_id, &test_params(None)).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_list_and_read_state() {
        let h = Harness::new();
        let svc = service(&h);
        let user_id = Uuid::new_v4();

        let older = h.notification_for(user_id).await;
        h.clock.advance(Duration::seconds(1));
        let newer = h.notification_for(user_id).await;
        h.notification_for(Uuid::new_v4()).await;

        let listed = svc.list(user_id, None, None).await.unwrap();
        assert_eq!(
            listed.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
        assert_eq!(svc.unread_count(user_id).await.unwrap(), 2);

        svc.mark_read(user_id, older.id).await.unwrap();
        assert_eq!(svc.unread_count(user_id).await.unwrap(), 1);

        svc.delete(user_id, newer.id).await.unwrap();
        let listed = svc.list(user_id, Some(10), None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, older.id);
        assert_eq!(svc.unread_count(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_limit_is_clamped() {
        let h = Harness::new();
        let svc = service(&h);
        let user_id = Uuid::new_v4();
        for _ in 0..105 {
            h.notification_for(user_id).await;
        }

        assert_eq!(svc.list(user_id, None, None).await.unwrap().len(), 50);
        assert_eq!(svc.list(user_id, Some(500), None).await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_operations_are_owner_scoped() {
        let h = Harness::new();
        let svc = service(&h);
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let notification = h.notification_for(owner).await;

        assert!(matches!(
            svc.mark_read(stranger, notification.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            svc.delete(stranger, notification.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            svc.delivery_jobs(stranger, notification.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_after_enqueue_delivers() {
        let h = Harness::new();
        let user_id = Uuid::new_v4();
        h.register_token(user_id, "token-1", Platform::Android).await;

        let svc = service(&h).with_dispatch_after_enqueue(Arc::new(h.dispatcher()));
        let notification = svc.send_test(user_id, &test_params(None)).await.unwrap();

        // The cycle runs in the background.
        let mut status = JobStatus::Pending;
        for _ in 0..100 {
            let jobs = svc.delivery_jobs(user_id, notification.id).await.unwrap();
            status = jobs[0].status;
            if status == JobStatus::Completed {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(status, JobStatus::Completed);
        assert_eq!(h.gateway.sends_to("token-1"), 1);
    }
}

//! Notification routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use beacon_common::error::AppError;
use beacon_common::types::{DeliveryJob, Notification};
use beacon_engine::notifications::{CreateNotificationParams, SendTestParams};

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/notifications",
            get(list_notifications).post(create_notification),
        )
        .route("/api/notifications/send-test", post(send_test))
        .route("/api/notifications/mark-read", post(mark_read))
        .route("/api/notifications/{id}", delete(delete_notification))
        .route("/api/notifications/{id}/jobs", get(delivery_jobs))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    #[serde(alias = "notificationId")]
    pub notification_id: Uuid,
}

/// GET /api/notifications: Newest-first notifications plus the unread count.
async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let notifications = state
        .notifications
        .list(auth.user_id, query.limit, query.since)
        .await?;
    let unread_count = state.notifications.unread_count(auth.user_id).await?;

    Ok(Json(ListResponse {
        notifications,
        unread_count,
    }))
}

/// POST /api/notifications: Create a notification for the user named in the body.
async fn create_notification(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(params): Json<CreateNotificationParams>,
) -> Result<(StatusCode, Json<Notification>), AppError> {
    let notification = state.notifications.create(&params).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// POST /api/notifications/send-test: Push a test notification to the caller's own devices.
async fn send_test(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(params): Json<SendTestParams>,
) -> Result<(StatusCode, Json<Notification>), AppError> {
    let admitted = state
        .send_test_limiter
        .try_acquire(&auth.user_id.to_string(), state.clock.now())
        .await?;
    if !admitted {
        tracing::warn!(user_id = %auth.user_id, "Test push rate limit exceeded");
        return Err(AppError::RateLimited(
            "Too many requests, please try again later.".to_string(),
        ));
    }

    let notification = state.notifications.send_test(auth.user_id, &params).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// POST /api/notifications/mark-read
async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<MarkReadRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .notifications
        .mark_read(auth.user_id, request.notification_id)
        .await?;
    Ok(Json(serde_json::json!({"success": true})))
}

/// DELETE /api/notifications/:id: Soft-delete a notification.
async fn delete_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.notifications.delete(auth.user_id, id).await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

/// GET /api/notifications/:id/jobs: Per-device delivery state.
async fn delivery_jobs(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryJob>>, AppError> {
    let jobs = state.notifications.delivery_jobs(auth.user_id, id).await?;
    Ok(Json(jobs))
}

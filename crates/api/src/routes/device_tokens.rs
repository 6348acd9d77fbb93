//! Device token routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};

use beacon_common::error::AppError;
use beacon_common::types::DeviceToken;
use beacon_engine::device_tokens::RegisterTokenParams;

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/device-tokens",
            get(list_tokens).post(register_token),
        )
        .route("/api/device-tokens/{token}", delete(remove_token))
}

/// POST /api/device-tokens: Register (or take over) a push token.
async fn register_token(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(params): Json<RegisterTokenParams>,
) -> Result<(StatusCode, Json<DeviceToken>), AppError> {
    let token = state.device_tokens.register(auth.user_id, &params).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// GET /api/device-tokens: Tokens registered to the authenticated user.
async fn list_tokens(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<DeviceToken>>, AppError> {
    let tokens = state.device_tokens.list(auth.user_id).await?;
    Ok(Json(tokens))
}

/// DELETE /api/device-tokens/:token
async fn remove_token(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.device_tokens.remove(auth.user_id, &token).await?;
    Ok(Json(serde_json::json!({"success": true})))
}

//! Shared-secret guard for scheduler-triggered endpoints.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use beacon_common::error::AppError;

use super::auth::bearer_token;
use crate::state::AppState;

/// Extractor that admits a request when it carries `Authorization: Bearer
/// $CRON_SECRET`. With no secret configured every request is admitted.
#[derive(Debug, Clone, Copy)]
pub struct CronCaller;

impl FromRequestParts<AppState> for CronCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.cron_secret.as_deref() else {
            return Ok(CronCaller);
        };

        match bearer_token(parts) {
            Some(token) if token == secret => Ok(CronCaller),
            _ => {
                tracing::warn!("Rejected worker trigger with missing or wrong cron secret");
                Err(AppError::Auth("Unauthorized".to_string()))
            }
        }
    }
}

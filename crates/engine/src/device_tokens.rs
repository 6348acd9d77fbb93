//! Device token service: registration and removal of push destinations.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use beacon_common::error::AppError;
use beacon_common::types::{DeviceToken, Platform};

use crate::clock::Clock;
use crate::store::Store;

/// Parameters for registering a device token.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterTokenParams {
    pub token: String,
    pub platform: String,
}

pub struct DeviceTokenService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl DeviceTokenService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Register a token for a user. A token already held by another user
    /// moves to this one.
    pub async fn register(
        &self,
        user_id: Uuid,
        params: &RegisterTokenParams,
    ) -> Result<DeviceToken, AppError> {
        let token = params.token.trim();
        if token.is_empty() {
            return Err(AppError::Validation("token must not be empty".to_string()));
        }
        let platform: Platform = params.platform.parse().map_err(AppError::Validation)?;

        let device_token = self
            .store
            .upsert_token(user_id, token, platform, self.clock.now())
            .await?;

        tracing::info!(
            device_token_id = %device_token.id,
            user_id = %user_id,
            platform = %platform,
            "Device token registered"
        );

        Ok(device_token)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        self.store.tokens_for_user(user_id).await
    }

    /// Remove a token the user owns.
    pub async fn remove(&self, user_id: Uuid, token: &str) -> Result<(), AppError> {
        if !self.store.remove_token(user_id, token).await? {
            return Err(AppError::NotFound("Device token not found".to_string()));
        }

        tracing::info!(user_id = %user_id, "Device token removed");
        Ok(())
    }
}

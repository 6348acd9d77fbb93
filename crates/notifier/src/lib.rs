//! Push gateway adapters.
//!
//! The delivery engine only sees the [`PushGateway`] trait: one message to one
//! device token, answered with a provider message id or a [`GatewayError`].
//! Every error is treated as retryable by the caller.

pub mod fcm;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use beacon_common::config::FcmConfig;

pub use fcm::FcmGateway;

/// Errors raised by a push gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("push gateway is not configured")]
    NotConfigured,

    #[error("device token rejected: {0}")]
    InvalidToken(String),

    #[error("provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected provider response: {0}")]
    Decode(String),
}

/// Platform-specific delivery hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryHints {
    /// Ask the provider for immediate (high priority) delivery
    pub high_priority: bool,
    /// Sound played on arrival
    pub sound: String,
    /// Android notification channel
    pub android_channel_id: String,
    /// Wake the app in the background on iOS (`content-available: 1`)
    pub content_available: bool,
}

impl Default for DeliveryHints {
    fn default() -> Self {
        Self {
            high_priority: true,
            sound: "default".to_string(),
            android_channel_id: "default".to_string(),
            content_available: true,
        }
    }
}

/// A single push message addressed to one device token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
    pub hints: DeliveryHints,
}

/// Sends one message to one device token.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Provider name used in logs.
    fn name(&self) -> &'static str;

    /// Deliver `message`, returning the provider's message id.
    async fn send(&self, message: &PushMessage) -> Result<String, GatewayError>;
}

/// Gateway used when no provider credentials are configured.
///
/// Every send fails, so jobs back off and eventually dead-letter instead of
/// being silently marked delivered.
pub struct DisabledGateway;

#[async_trait]
impl PushGateway for DisabledGateway {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn send(&self, _message: &PushMessage) -> Result<String, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}

/// Pick the gateway for a deployment: FCM when credentials are present,
/// otherwise [`DisabledGateway`].
pub fn gateway_from_config(config: &FcmConfig) -> Result<Arc<dyn PushGateway>, GatewayError> {
    match FcmGateway::from_config(config)? {
        Some(fcm) => {
            tracing::info!(endpoint = %config.endpoint, "FCM push gateway configured");
            Ok(Arc::new(fcm))
        }
        None => {
            tracing::warn!("FCM credentials not set, push delivery is disabled");
            Ok(Arc::new(DisabledGateway))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_gateway_always_fails() {
        let message = PushMessage {
            token: "tok".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            data: BTreeMap::new(),
            hints: DeliveryHints::default(),
        };
        let result = DisabledGateway.send(&message).await;
        assert!(matches!(result, Err(GatewayError::NotConfigured)));
    }

    #[test]
    fn test_gateway_from_config_without_credentials() {
        let gateway = gateway_from_config(&FcmConfig::default()).unwrap();
        assert_eq!(gateway.name(), "disabled");
    }

    #[test]
    fn test_default_hints() {
        let hints = DeliveryHints::default();
        assert!(hints.high_priority);
        assert_eq!(hints.sound, "default");
        assert_eq!(hints.android_channel_id, "default");
    }
}

//! Firebase Cloud Messaging adapter (HTTP v1 API).
//!
//! Posts to `/v1/projects/{project}/messages:send` with a pre-issued OAuth2
//! bearer token. Minting and refreshing that token is left to the deployment.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use beacon_common::config::FcmConfig;

use crate::{GatewayError, PushGateway, PushMessage};

/// Error codes FCM uses for tokens that will never accept a message again.
const DEAD_TOKEN_CODES: &[&str] = &["UNREGISTERED", "INVALID_ARGUMENT"];

/// FCM HTTP v1 push gateway.
pub struct FcmGateway {
    client: reqwest::Client,
    send_url: String,
    access_token: String,
}

impl FcmGateway {
    pub fn new(
        endpoint: &str,
        project_id: &str,
        access_token: String,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            send_url: format!(
                "{}/v1/projects/{}/messages:send",
                endpoint.trim_end_matches('/'),
                project_id
            ),
            access_token,
        })
    }

    /// Build a gateway from config. Returns `Ok(None)` when credentials are missing.
    pub fn from_config(config: &FcmConfig) -> Result<Option<Self>, GatewayError> {
        match (&config.project_id, &config.access_token) {
            (Some(project_id), Some(token)) => {
                Self::new(&config.endpoint, project_id, token.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Render the FCM v1 request body for a message.
    pub fn request_body(message: &PushMessage) -> serde_json::Value {
        let hints = &message.hints;
        let android_priority = if hints.high_priority { "high" } else { "normal" };
        let apns_priority = if hints.high_priority { "10" } else { "5" };

        json!({
            "message": {
                "token": message.token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
                "android": {
                    "priority": android_priority,
                    "notification": {
                        "channel_id": hints.android_channel_id,
                        "sound": hints.sound,
                    },
                },
                "apns": {
                    "headers": { "apns-priority": apns_priority },
                    "payload": {
                        "aps": {
                            "sound": hints.sound,
                            "content-available": u8::from(hints.content_available),
                        },
                    },
                },
            }
        })
    }

    fn classify_failure(status: u16, body: String) -> GatewayError {
        let code = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/status")
                    .and_then(|s| s.as_str())
                    .map(str::to_string)
            });

        match code {
            Some(code) if DEAD_TOKEN_CODES.contains(&code.as_str()) => {
                GatewayError::InvalidToken(code)
            }
            _ => GatewayError::Rejected { status, body },
        }
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    fn name(&self) -> &'static str {
        "fcm"
    }

    async fn send(&self, message: &PushMessage) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(&self.access_token)
            .json(&Self::request_body(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), "FCM rejected message");
            return Err(Self::classify_failure(status.as_u16(), body));
        }

        let payload: serde_json::Value = response.json().await?;
        payload
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Decode(format!("missing message name in {}", payload)))
    }
}

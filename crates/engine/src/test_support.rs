//! Shared fixtures for engine unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use beacon_common::config::DispatchConfig;
use beacon_common::types::{DeviceToken, Notification, Platform};
use beacon_notifier::{GatewayError, PushGateway, PushMessage};

use crate::clock::{Clock, ManualClock};
use crate::dispatcher::Dispatcher;
use crate::enqueuer::Enqueuer;
use crate::store::{JobStore, MemoryStore, NewNotification, NotificationStore, TokenDirectory};

type Outcome = Result<String, String>;

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Outcome>>,
    always_fail: HashMap<String, String>,
    sent: Vec<PushMessage>,
    counter: u64,
}

/// Gateway whose per-token results are queued up front. Tokens without a
/// scripted result succeed with a generated message id.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
}

impl ScriptedGateway {
    pub fn succeed(&self, token: &str, message_id: &str) {
        self.push(token, Ok(message_id.to_string()));
    }

    pub fn fail(&self, token: &str, error: &str) {
        self.push(token, Err(error.to_string()));
    }

    pub fn always_fail(&self, token: &str, error: &str) {
        self.script
            .lock()
            .always_fail
            .insert(token.to_string(), error.to_string());
    }

    pub fn sends_to(&self, token: &str) -> usize {
        self.script
            .lock()
            .sent
            .iter()
            .filter(|m| m.token == token)
            .count()
    }

    /// `notificationId` of every message sent, in send order.
    pub fn sent_notification_ids(&self) -> Vec<Uuid> {
        self.script
            .lock()
            .sent
            .iter()
            .filter_map(|m| m.data.get("notificationId"))
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    fn push(&self, token: &str, outcome: Outcome) {
        self.script
            .lock()
            .queued
            .entry(token.to_string())
            .or_default()
            .push_back(outcome);
    }
}

#[async_trait]
impl PushGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(&self, message: &PushMessage) -> Result<String, GatewayError> {
        let mut script = self.script.lock();
        script.sent.push(message.clone());
        script.counter += 1;

        if let Some(error) = script.always_fail.get(&message.token) {
            return Err(GatewayError::Rejected {
                status: 503,
                body: error.clone(),
            });
        }

        let counter = script.counter;
        match script
            .queued
            .get_mut(&message.token)
            .and_then(VecDeque::pop_front)
        {
            Some(Ok(id)) => Ok(id),
            Some(Err(error)) => Err(GatewayError::Rejected {
                status: 503,
                body: error,
            }),
            None => Ok(format!("projects/test/messages/{}", counter)),
        }
    }
}

/// Memory store, manual clock and scripted gateway wired together.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<ScriptedGateway>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(chrono::Utc::now())),
            gateway: Arc::new(ScriptedGateway::default()),
        }
    }

    pub fn config(&self) -> DispatchConfig {
        DispatchConfig::default()
    }

    pub fn enqueuer(&self) -> Enqueuer {
        Enqueuer::new(self.store.clone(), self.clock.clone())
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.store.clone(),
            self.gateway.clone(),
            self.clock.clone(),
            &self.config(),
        )
    }

    pub async fn register_token(&self, user_id: Uuid, token: &str, platform: Platform) -> DeviceToken {
        self.store
            .upsert_token(user_id, token, platform, self.clock.now())
            .await
            .unwrap()
    }

    pub async fn notification_for(&self, user_id: Uuid) -> Notification {
        let new = NewNotification {
            user_id,
            title: "Hello".to_string(),
            body: "World".to_string(),
            linked_content: None,
            metadata: serde_json::json!({"type": "test"}),
        };
        self.store
            .insert_notification(Uuid::new_v4(), &new, self.clock.now())
            .await
            .unwrap()
    }

    /// The single job of a notification.
    pub async fn only_job(&self, notification_id: Uuid) -> beacon_common::types::DeliveryJob {
        let mut jobs = self
            .store
            .jobs_for_notification(notification_id)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        jobs.remove(0)
    }
}

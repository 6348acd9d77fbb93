//! Shared application state for the Axum API server.

use std::sync::Arc;

use beacon_common::config::AppConfig;
use beacon_engine::clock::Clock;
use beacon_engine::device_tokens::DeviceTokenService;
use beacon_engine::dispatcher::Dispatcher;
use beacon_engine::idempotency::IdempotencyStore;
use beacon_engine::notifications::NotificationService;
use beacon_engine::rate_limit::RateLimiter;
use beacon_engine::store::Store;
use beacon_notifier::PushGateway;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub notifications: Arc<NotificationService>,
    pub device_tokens: Arc<DeviceTokenService>,
    pub dispatcher: Arc<Dispatcher>,
    /// Per-user budget for test pushes.
    pub send_test_limiter: Arc<dyn RateLimiter>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PushGateway>,
        idempotency: Arc<dyn IdempotencyStore>,
        send_test_limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            gateway,
            clock.clone(),
            &config.dispatch,
        ));

        let mut notifications = NotificationService::new(store.clone(), idempotency, clock.clone());
        if config.dispatch.run_after_enqueue {
            notifications = notifications.with_dispatch_after_enqueue(dispatcher.clone());
        }

        Self {
            device_tokens: Arc::new(DeviceTokenService::new(store.clone(), clock.clone())),
            notifications: Arc::new(notifications),
            dispatcher,
            send_test_limiter,
            clock,
            store,
            config,
        }
    }
}

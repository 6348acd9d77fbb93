//! Push-notification delivery engine.
//!
//! Notifications are fanned out into one delivery job per device token
//! ([`enqueuer`]), and a bounded, concurrency-safe dispatch cycle
//! ([`dispatcher`]) claims, delivers, retries and dead-letters those jobs.

pub mod clock;
pub mod device_tokens;
pub mod dispatcher;
pub mod enqueuer;
pub mod idempotency;
pub mod notifications;
pub mod rate_limit;
pub mod retry;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

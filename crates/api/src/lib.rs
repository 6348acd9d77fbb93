//! HTTP surface of the notification pipeline.
//!
//! - `GET /health` liveness check
//! - `/api/notifications` list, create, test push, read state, delivery jobs
//! - `/api/device-tokens` push destination registration
//! - `/api/worker` cron-triggered dispatch cycle and dead-letter inspection

pub mod middleware;
pub mod routes;
pub mod state;

//! Scheduler-facing routes: trigger a dispatch cycle, inspect the dead-letter queue.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use beacon_common::error::AppError;
use beacon_common::types::DeliveryJob;
use beacon_engine::dispatcher::CycleReport;

use crate::middleware::cron::CronCaller;
use crate::state::AppState;

const DEFAULT_DEAD_LETTER_LIMIT: i64 = 50;
const MAX_DEAD_LETTER_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/worker/run", post(run_cycle))
        .route("/api/worker/dead-letters", get(dead_letters))
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<i64>,
}

/// POST /api/worker/run: Run one dispatch cycle and report what it did.
async fn run_cycle(State(state): State<AppState>, _cron: CronCaller) -> Json<CycleReport> {
    Json(state.dispatcher.run_cycle().await)
}

/// GET /api/worker/dead-letters: Most recently dead-lettered jobs.
async fn dead_letters(
    State(state): State<AppState>,
    _cron: CronCaller,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<DeliveryJob>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);
    let jobs = state.store.dead_letters(limit).await?;
    Ok(Json(jobs))
}

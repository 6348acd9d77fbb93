//! Beacon API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use beacon_common::config::AppConfig;
use beacon_common::db::{connect_redis, create_pool, run_migrations};
use beacon_engine::clock::SystemClock;
use beacon_engine::idempotency::{IdempotencyStore, MemoryIdempotencyStore, RedisIdempotencyStore};
use beacon_engine::rate_limit::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
use beacon_engine::store::PgStore;
use beacon_notifier::gateway_from_config;

use beacon_api::routes::create_router;
use beacon_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("beacon_api=debug,beacon_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Beacon API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let (idempotency, send_test_limiter): (Arc<dyn IdempotencyStore>, Arc<dyn RateLimiter>) =
        match &config.redis_url {
            Some(url) => {
                let redis = connect_redis(url).await?;
                (
                    Arc::new(RedisIdempotencyStore::new(redis.clone())),
                    Arc::new(RedisRateLimiter::new(redis, config.rate_limit.clone())),
                )
            }
            None => {
                tracing::info!(
                    "REDIS_URL not set, idempotency keys and rate limits are kept in process memory"
                );
                (
                    Arc::new(MemoryIdempotencyStore::new()),
                    Arc::new(MemoryRateLimiter::new(config.rate_limit.clone())),
                )
            }
        };

    let gateway = gateway_from_config(&config.fcm)?;
    let port = config.api_port;

    let state = AppState::new(
        config,
        Arc::new(PgStore::new(pool)),
        gateway,
        idempotency,
        send_test_limiter,
        Arc::new(SystemClock),
    );

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal");
        })
        .await?;

    Ok(())
}

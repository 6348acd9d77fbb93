use std::sync::Arc;

use beacon_common::config::AppConfig;
use beacon_common::db;
use beacon_engine::clock::SystemClock;
use beacon_engine::dispatcher::Dispatcher;
use beacon_engine::store::PgStore;
use beacon_notifier::gateway_from_config;
use beacon_worker::runner::DispatchLoop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_worker=info,beacon_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Beacon dispatch worker starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(PgStore::new(pool)),
        gateway_from_config(&config.fcm)?,
        Arc::new(SystemClock),
        &config.dispatch,
    ));

    tracing::info!(
        batch_size = config.dispatch.batch_size,
        max_retries = config.dispatch.max_retries,
        claim_lease_secs = config.dispatch.claim_lease_secs,
        "Dispatcher configured"
    );

    // Run until Ctrl+C; the cycle in flight finishes first
    DispatchLoop::new(dispatcher, config.dispatch.interval_ms)
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received shutdown signal, stopping gracefully...");
        })
        .await;

    tracing::info!("Beacon dispatch worker stopped.");
    Ok(())
}

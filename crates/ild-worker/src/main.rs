mod config;
mod monitor;

use std::sync::Arc;

use ild_db::{PgAdvisoryLocks, PgStore, ServerStore};
use ild_spawner::{Orchestrator, SpawnerSettings};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::monitor::spawn_monitor;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let db = ild_db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database");
    let store: Arc<dyn ServerStore> = Arc::new(PgStore::new(db));
    let lock_pool = ild_db::create_lock_pool(&config.database_url, config.lock_max_connections)
        .expect("invalid database url");
    let locks = Arc::new(PgAdvisoryLocks::new(lock_pool));

    let settings = Arc::new(SpawnerSettings::from_env().expect("invalid spawner settings"));
    let spawner = ild_spawner::build_spawner(config.spawner, settings.clone(), store.clone())
        .expect("failed to build spawner");
    tracing::info!(spawner = %config.spawner, "spawner ready");

    let orchestrator = Arc::new(Orchestrator::new(
        spawner,
        store.clone(),
        locks,
        settings.max_dependency_depth,
    ));

    let shutdown = CancellationToken::new();
    let monitor = spawn_monitor(
        store,
        orchestrator,
        config.monitor_interval_secs,
        shutdown.clone(),
    );
    tracing::info!(interval_secs = config.monitor_interval_secs, "status monitor started");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("shutting down");
    shutdown.cancel();
    let _ = monitor.await;
}

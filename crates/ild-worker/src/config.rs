use std::env;

use ild_spawner::SpawnerKind;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub monitor_interval_secs: u64,
    /// Upper bound on server locks held at once.
    pub lock_max_connections: u32,
    pub spawner: SpawnerKind,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            monitor_interval_secs: env::var("MONITOR_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .expect("MONITOR_INTERVAL_SECS must be a valid u64"),
            lock_max_connections: env::var("LOCK_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "32".into())
                .parse()
                .expect("LOCK_MAX_CONNECTIONS must be a valid u32"),
            spawner: env::var("ILD_SPAWNER")
                .unwrap_or_else(|_| "docker".into())
                .parse()
                .expect("ILD_SPAWNER must be one of docker, ecs, scheduler, batch"),
        }
    }
}

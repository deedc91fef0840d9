pub mod lock;
pub mod models;
pub mod store;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

pub use lock::{LocalLocks, LockGuard, PgAdvisoryLocks, ServerLocks};
pub use models::*;
pub use store::{PgStore, ServerStore};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid server status: {0}")]
    InvalidStatus(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Create a connection pool to the web application's PostgreSQL database.
///
/// The schema belongs to the web layer; this crate never migrates it.
pub async fn create_pool(database_url: &str) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Create the pool backing [`PgAdvisoryLocks`].
///
/// Every held lock pins one connection for its whole lifetime, so
/// `max_connections` caps how many server locks can be held at once. Keep
/// it apart from the store pool or held locks starve the writes made
/// while holding them. Connections are opened on first use.
pub fn create_lock_pool(
    database_url: &str,
    max_connections: u32,
) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_lazy(database_url)
}

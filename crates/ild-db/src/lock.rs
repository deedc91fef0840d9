use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::Result;

/// Held for as long as the caller owns a server's lifecycle slot.
///
/// Dropping the guard releases the lock.
pub struct LockGuard {
    _inner: Box<dyn Send>,
}

impl LockGuard {
    pub fn new<T: Send + 'static>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

/// At-most-one lifecycle operation in flight per server.
#[async_trait]
pub trait ServerLocks: Send + Sync + 'static {
    /// Wait until the lock for `key` is free and take it.
    async fn acquire(&self, key: Uuid) -> Result<LockGuard>;
}

/// In-process locks; only serializes callers sharing this value.
#[derive(Clone, Default)]
pub struct LocalLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerLocks for LocalLocks {
    async fn acquire(&self, key: Uuid) -> Result<LockGuard> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries nobody holds or waits on.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(key).or_default().clone()
        };

        Ok(LockGuard::new(lock.lock_owned().await))
    }
}

/// Cross-process locks using PostgreSQL transaction-scoped advisory locks.
///
/// The guard owns the open transaction; dropping it rolls back and frees
/// the lock. Each guard pins a connection of `pool`, so give it a pool of
/// its own (see [`crate::create_lock_pool`]).
#[derive(Clone)]
pub struct PgAdvisoryLocks {
    pool: PgPool,
}

impl PgAdvisoryLocks {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn lock_key(id: Uuid) -> i64 {
    let v = id.as_u128();
    ((v >> 64) as u64 ^ v as u64) as i64
}

#[async_trait]
impl ServerLocks for PgAdvisoryLocks {
    async fn acquire(&self, key: Uuid) -> Result<LockGuard> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(lock_key(key))
            .execute(&mut *tx)
            .await?;
        Ok(LockGuard::new(tx))
    }
}

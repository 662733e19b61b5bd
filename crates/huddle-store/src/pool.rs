//! Bounded bridge from async tasks to blocking `SQLite` work.
//!
//! At most `pool_size` closures run at once, each on tokio's blocking
//! thread pool with a checked-out connection. Callers beyond that bound wait
//! for a permit instead of piling up blocking threads.

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Semaphore;
use tokio::task;

use crate::errors::{Result, StoreError};
use crate::sqlite::ConnectionPool;

/// Runs store closures off the async scheduler.
#[derive(Clone)]
pub struct BlockingPool {
    pool: ConnectionPool,
    permits: Arc<Semaphore>,
}

impl BlockingPool {
    /// Wrap a connection pool. Concurrency is bounded by the pool size.
    pub fn new(pool: ConnectionPool) -> Self {
        let permits = Arc::new(Semaphore::new(pool.max_size() as usize));
        Self { pool, permits }
    }

    /// The underlying connection pool.
    pub fn connections(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run `f` with a pooled connection on a blocking thread.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| StoreError::WorkerPool(format!("blocking pool closed: {e}")))?;
        let pool = self.pool.clone();

        task::spawn_blocking(move || {
            let _permit = permit;
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::WorkerPool(format!("blocking task failed: {e}")))?
    }

    /// Stop accepting work. Pending and later calls fail with
    /// [`StoreError::WorkerPool`].
    pub fn close(&self) {
        self.permits.close();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Connection pooling on top of bb8.
//!
//! bb8 owns checkout, return and the health check on each checkout. This
//! wrapper adds shutdown, which bb8 leaves to dropping the last handle, and
//! maps pool failures onto [`DbError`]. A checkout is a
//! [`PooledConnection`] that goes back to the pool when dropped, so release
//! happens on every exit path.

use std::time::Duration;

use bb8::{ErrorSink, ManageConnection, RunError};
use parking_lot::RwLock;

use crate::db::error::{DbError, DbResult};

/// A leased connection; owns a handle to its pool so it may outlive `close`.
pub type PooledConnection<M> = bb8::PooledConnection<'static, M>;

/// Pool sizing and wait limits.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections opened eagerly when the pool is built.
    pub min_connections: u32,
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// How long a checkout waits for a free slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> DbResult<()> {
        if self.max_connections == 0 {
            return Err(DbError::invalid_input(
                "max_connections must be at least 1",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(DbError::invalid_input(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

pub struct Pool<M: ManageConnection<Error = DbError>> {
    inner: RwLock<Option<bb8::Pool<M>>>,
    max_connections: u32,
    acquire_timeout: Duration,
}

/// Logs failures bb8 hits in the background, such as replenishing idle
/// connections.
#[derive(Debug, Clone, Copy)]
struct LogErrors;

impl ErrorSink<DbError> for LogErrors {
    fn sink(&self, error: DbError) {
        tracing::warn!(error = %error, "Pooled connection error");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<DbError>> {
        Box::new(*self)
    }
}

impl<M: ManageConnection<Error = DbError>> Pool<M> {
    /// Build the pool and open `min_connections` right away.
    ///
    /// Fails if the configuration is invalid or any warm-up connection
    /// cannot be opened. Connects are not retried here; callers own retry.
    pub async fn new(manager: M, config: PoolConfig) -> DbResult<Self> {
        config.validate()?;

        let pool = bb8::Pool::builder()
            .max_size(config.max_connections)
            .min_idle((config.min_connections > 0).then_some(config.min_connections))
            .connection_timeout(config.acquire_timeout)
            .retry_connection(false)
            .error_sink(Box::new(LogErrors))
            .build(manager)
            .await?;

        tracing::info!(
            min = config.min_connections,
            max = config.max_connections,
            "connection pool created"
        );

        Ok(Self {
            inner: RwLock::new(Some(pool)),
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout,
        })
    }

    /// Check a connection out of the pool.
    ///
    /// Waits up to `acquire_timeout` when every slot is leased or no healthy
    /// connection can be produced.
    pub async fn get(&self) -> DbResult<PooledConnection<M>> {
        let pool = self.inner.read().clone().ok_or(DbError::PoolClosed)?;
        tracing::trace!("acquiring connection from pool");
        pool.get_owned().await.map_err(|e| match e {
            RunError::User(e) => e,
            RunError::TimedOut => DbError::PoolTimedOut {
                elapsed_secs: self.acquire_timeout.as_secs(),
            },
        })
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let max = self.max_connections;
        match self.inner.read().as_ref() {
            Some(pool) => {
                let state = pool.state();
                PoolStatus {
                    idle: state.idle_connections,
                    in_use: state.connections.saturating_sub(state.idle_connections),
                    max,
                }
            }
            None => PoolStatus {
                idle: 0,
                in_use: 0,
                max,
            },
        }
    }

    /// Lifetime counters; all zero once the pool is closed.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let Some(pool) = self.inner.read().clone() else {
            return PoolMetrics::default();
        };
        let stats = pool.state().statistics;
        PoolMetrics {
            connections_created: stats.connections_created,
            connections_closed: stats.connections_closed_broken
                + stats.connections_closed_invalid
                + stats.connections_closed_max_lifetime
                + stats.connections_closed_idle_timeout,
            checkouts_successful: stats.get_direct + stats.get_waited,
            checkouts_failed: stats.get_timed_out,
        }
    }

    /// Close the pool. Safe to call repeatedly.
    ///
    /// Idle connections are dropped with the last pool handle; leased ones
    /// are dropped instead of reused once released.
    pub fn close(&self) {
        if self.inner.write().take().is_some() {
            tracing::info!("connection pool closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.read().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections waiting to be leased.
    pub idle: u32,
    /// Connections currently leased.
    pub in_use: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    pub fn available(&self) -> u32 {
        self.max.saturating_sub(self.in_use)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub checkouts_successful: u64,
    pub checkouts_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct MockManager {
        created: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    struct MockConnection {
        id: usize,
        broken: bool,
    }

    impl ManageConnection for MockManager {
        type Connection = MockConnection;
        type Error = DbError;

        fn connect(&self) -> impl Future<Output = DbResult<MockConnection>> + Send {
            let created = Arc::clone(&self.created);
            let fail = self.fail.load(Ordering::SeqCst);
            async move {
                if fail {
                    return Err(DbError::transient("connection refused"));
                }
                let id = created.fetch_add(1, Ordering::SeqCst);
                Ok(MockConnection { id, broken: false })
            }
        }

        fn is_valid(&self, _conn: &mut MockConnection) -> impl Future<Output = DbResult<()>> + Send {
            async { Ok(()) }
        }

        fn has_broken(&self, conn: &mut MockConnection) -> bool {
            conn.broken
        }
    }

    fn config(min: u32, max: u32) -> PoolConfig {
        PoolConfig {
            min_connections: min,
            max_connections: max,
            acquire_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_warm_up_opens_min_connections() {
        let manager = MockManager::default();
        let pool = Pool::new(manager.clone(), config(2, 5)).await.unwrap();
        assert_eq!(manager.created.load(Ordering::SeqCst), 2);
        assert_eq!(
            pool.status(),
            PoolStatus {
                idle: 2,
                in_use: 0,
                max: 5
            }
        );
        assert_eq!(pool.metrics().connections_created, 2);
    }

    #[tokio::test]
    async fn test_warm_up_failure_fails_construction() {
        let manager = MockManager::default();
        manager.fail.store(true, Ordering::SeqCst);
        let result = Pool::new(manager, config(1, 5)).await;
        assert!(matches!(result, Err(DbError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = Pool::new(MockManager::default(), config(3, 2)).await;
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
        let result = Pool::new(MockManager::default(), config(0, 0)).await;
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let manager = MockManager::default();
        let pool = Pool::new(manager.clone(), config(0, 5)).await.unwrap();

        let first_id = pool.get().await.unwrap().id;
        let second_id = pool.get().await.unwrap().id;

        assert_eq!(first_id, second_id);
        assert_eq!(manager.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_checkout_beyond_max_times_out() {
        let pool = Pool::new(MockManager::default(), config(0, 2)).await.unwrap();

        let a = pool.get().await.unwrap();
        let _b = pool.get().await.unwrap();
        assert_eq!(pool.status().available(), 0);

        let third = pool.get().await;
        assert!(matches!(third, Err(DbError::PoolTimedOut { .. })));
        assert_eq!(pool.metrics().checkouts_failed, 1);

        drop(a);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_status_returns_to_baseline_after_leases() {
        let pool = Pool::new(MockManager::default(), config(1, 3)).await.unwrap();
        let before = pool.status().available();

        {
            let _a = pool.get().await.unwrap();
            let _b = pool.get().await.unwrap();
            assert_eq!(pool.status().available(), before - 2);
        }

        assert_eq!(pool.status().available(), before);
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_failed_connect_releases_slot() {
        let manager = MockManager::default();
        let pool = Pool::new(manager.clone(), config(0, 1)).await.unwrap();

        manager.fail.store(true, Ordering::SeqCst);
        assert!(pool.get().await.is_err());
        assert_eq!(pool.status().in_use, 0);

        manager.fail.store(false, Ordering::SeqCst);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_broken_connection_is_not_returned() {
        let manager = MockManager::default();
        let pool = Pool::new(manager.clone(), config(0, 2)).await.unwrap();

        let mut conn = pool.get().await.unwrap();
        conn.broken = true;
        drop(conn);

        assert_eq!(pool.status().idle, 0);

        let fresh = pool.get().await.unwrap();
        assert_eq!(fresh.id, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let pool = Pool::new(MockManager::default(), config(2, 2)).await.unwrap();

        pool.close();
        pool.close();

        assert!(pool.is_closed());
        assert_eq!(pool.status().idle, 0);
        assert!(matches!(pool.get().await, Err(DbError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_lease_outliving_close_is_dropped() {
        let pool = Pool::new(MockManager::default(), config(1, 2)).await.unwrap();
        let conn = pool.get().await.unwrap();
        pool.close();
        drop(conn);
        assert_eq!(pool.status().idle, 0);
        assert!(matches!(pool.get().await, Err(DbError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_stay_bounded() {
        let manager = MockManager::default();
        let mut cfg = config(0, 3);
        cfg.acquire_timeout = Duration::from_secs(5);
        let pool = Arc::new(Pool::new(manager.clone(), cfg).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let _conn = pool.get().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(manager.created.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.status().in_use, 0);
    }
}

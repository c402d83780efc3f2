//! Bounded connection pool
//!
//! Hands out at most `max_connections` connections at a time. Acquisition
//! waits up to `acquire_timeout` for a slot and fails with
//! [`PoolError::Exhausted`] when none frees up. Connections return to the
//! idle set when their guard is dropped, unless they were marked broken.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("no connection available within {timeout:?}")]
    Exhausted { timeout: Duration },

    #[error("pool is closed")]
    Closed,

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to open connection: {0}")]
    Connect(String),
}

/// Creates and health-checks the connections a pool manages.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    async fn is_valid(&self, conn: &mut Self::Connection) -> bool;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::InvalidConfig(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub max: usize,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    idle: Mutex<VecDeque<F::Connection>>,
    permits: Arc<Semaphore>,
    /// Connections currently alive, idle or checked out.
    open: AtomicUsize,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<F::Connection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn discard(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_connections as usize));

        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                idle: Mutex::new(VecDeque::new()),
                permits,
                open: AtomicUsize::new(0),
            }),
        })
    }

    /// Open `min_connections` connections up front.
    pub async fn init(&self) -> Result<(), PoolError> {
        let min = self.inner.config.min_connections as usize;
        while self.inner.open.load(Ordering::SeqCst) < min {
            let conn = self.inner.factory.connect().await?;
            self.inner.open.fetch_add(1, Ordering::SeqCst);
            self.inner.idle().push_back(conn);
        }
        info!(
            "Connection pool ready: min={}, max={}, acquire_timeout={:?}",
            self.inner.config.min_connections,
            self.inner.config.max_connections,
            self.inner.config.acquire_timeout
        );
        Ok(())
    }

    /// Check out a connection. The whole checkout, including the health
    /// check and opening a new connection, is bounded by `acquire_timeout`.
    pub async fn acquire(&self) -> Result<PooledConnection<F>, PoolError> {
        let timeout = self.inner.config.acquire_timeout;
        match tokio::time::timeout(timeout, self.checkout()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Connection pool exhausted after waiting {:?}", timeout);
                Err(PoolError::Exhausted { timeout })
            }
        }
    }

    async fn checkout(&self) -> Result<PooledConnection<F>, PoolError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        // The guard owns the permit and any popped connection, so a
        // cancelled checkout still returns both.
        let mut guard = PooledConnection {
            conn: None,
            pool: Arc::clone(&self.inner),
            permit: Some(permit),
            broken: false,
        };

        loop {
            let candidate = self.inner.idle().pop_front();
            let Some(conn) = candidate else { break };
            let conn = guard.conn.insert(conn);
            if self.inner.factory.is_valid(conn).await {
                return Ok(guard);
            }
            debug!("Discarding broken idle connection");
            guard.conn = None;
            self.inner.discard();
        }

        let conn = self.inner.factory.connect().await?;
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        guard.conn = Some(conn);
        Ok(guard)
    }

    pub fn status(&self) -> PoolStatus {
        let max = self.inner.config.max_connections as usize;
        PoolStatus {
            idle: self.inner.idle().len(),
            in_use: max - self.inner.permits.available_permits(),
            max,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Refuse further acquisitions and drop idle connections. Checked out
    /// connections are dropped when released.
    pub fn close(&self) {
        self.inner.permits.close();
        let drained: Vec<_> = self.inner.idle().drain(..).collect();
        for _ in &drained {
            self.inner.discard();
        }
        info!("Connection pool closed, {} idle connections dropped", drained.len());
    }
}

/// A checked out connection. Dropping it releases the connection.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    pool: Arc<PoolInner<F>>,
    permit: Option<OwnedSemaphorePermit>,
    broken: bool,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Discard the connection on release instead of returning it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn release(self) {}
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken || self.pool.permits.is_closed() {
                debug!("Dropping released connection");
                drop(conn);
                self.pool.discard();
            } else {
                self.pool.idle().push_back(conn);
            }
        }
        // Returning the permit wakes one waiter.
        drop(self.permit.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct TestFactory {
        created: AtomicUsize,
        reject_idle: AtomicBool,
        slow_connect: AtomicBool,
        slow_check: AtomicBool,
    }

    #[async_trait]
    impl ConnectionFactory for Arc<TestFactory> {
        type Connection = usize;

        async fn connect(&self) -> Result<usize, PoolError> {
            if self.slow_connect.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        async fn is_valid(&self, _conn: &mut usize) -> bool {
            if self.slow_check.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            !self.reject_idle.load(Ordering::SeqCst)
        }
    }

    fn pool(min: u32, max: u32, timeout_ms: u64) -> (ConnectionPool<Arc<TestFactory>>, Arc<TestFactory>) {
        let factory = Arc::new(TestFactory::default());
        let pool = ConnectionPool::new(
            Arc::clone(&factory),
            PoolConfig {
                min_connections: min,
                max_connections: max,
                acquire_timeout: Duration::from_millis(timeout_ms),
            },
        )
        .unwrap();
        (pool, factory)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let factory = Arc::new(TestFactory::default());
        let config = PoolConfig {
            min_connections: 3,
            max_connections: 2,
            acquire_timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            ConnectionPool::new(Arc::clone(&factory), config),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_init_opens_min_connections() {
        let (pool, factory) = pool(2, 4, 100);
        pool.init().await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status(), PoolStatus { idle: 2, in_use: 0, max: 4 });
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let (pool, factory) = pool(0, 2, 100);

        let first = pool.acquire().await.unwrap();
        let id = *first;
        assert_eq!(pool.status().in_use, 1);
        first.release();

        let second = pool.acquire().await.unwrap();
        assert_eq!(*second, id);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_times_out() {
        let (pool, _) = pool(0, 1, 50);
        let _held = pool.acquire().await.unwrap();

        let result = pool.acquire().await;
        assert!(matches!(result, Err(PoolError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn test_slow_connect_counts_against_timeout() {
        let (pool, factory) = pool(0, 1, 100);
        factory.slow_connect.store(true, Ordering::SeqCst);

        let started = std::time::Instant::now();
        let result = pool.acquire().await;

        assert!(matches!(result, Err(PoolError::Exhausted { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.status().in_use, 0);
        assert_eq!(pool.inner.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timed_out_health_check_keeps_connection() {
        let (pool, factory) = pool(1, 1, 100);
        pool.init().await.unwrap();
        factory.slow_check.store(true, Ordering::SeqCst);

        let result = pool.acquire().await;
        assert!(matches!(result, Err(PoolError::Exhausted { .. })));
        assert_eq!(pool.status(), PoolStatus { idle: 1, in_use: 0, max: 1 });
        assert_eq!(pool.inner.open.load(Ordering::SeqCst), 1);

        factory.slow_check.store(false, Ordering::SeqCst);
        let conn = pool.acquire().await.unwrap();
        assert_eq!(*conn, 0);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_wakes_waiter() {
        let (pool, _) = pool(0, 1, 1_000);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|conn| *conn) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        let id = waiter.await.unwrap().unwrap();
        assert_eq!(id, 0);
    }

    #[tokio::test]
    async fn test_broken_connection_is_replaced() {
        let (pool, factory) = pool(0, 1, 100);

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);
        assert_eq!(pool.status().idle, 0);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_idle_connection_is_discarded() {
        let (pool, factory) = pool(1, 1, 100);
        pool.init().await.unwrap();
        factory.reject_idle.store(true, Ordering::SeqCst);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_acquire() {
        let (pool, _) = pool(1, 2, 100);
        pool.init().await.unwrap();
        pool.close();

        assert!(pool.is_closed());
        assert_eq!(pool.status().idle, 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_never_exceeds_max() {
        let (pool, factory) = pool(0, 3, 500);
        let mut handles = Vec::new();

        for _ in 0..12 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let conn = pool.acquire().await.unwrap();
                assert!(pool.status().in_use <= 3);
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(conn);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(factory.created.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.status().in_use, 0);
    }
}

//! Bounded connection pool per peer node
//!
//! A semaphore bounds the connections that exist at once (`max_total`);
//! returned connections are kept idle up to `max_idle` and destroyed beyond
//! that. Borrowing waits for a free slot up to `borrow_timeout`.

use crate::client::{ClientError, PeerClient, PeerClientConfig};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

/// Pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool exhausted")]
    Exhausted,

    #[error("connection pool closed")]
    Closed,

    #[error("connect failed: {0}")]
    Connect(#[from] ClientError),
}

/// Creates, checks and disposes of pooled connections
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    fn make(&self) -> impl Future<Output = Result<Self::Connection, ClientError>> + Send;

    /// Checked on every borrow of an idle connection
    fn validate(&self, conn: &Self::Connection) -> bool;

    fn destroy(&self, conn: Self::Connection) -> impl Future<Output = ()> + Send;
}

/// Pool limits
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_total: usize,
    pub max_idle: usize,
    pub borrow_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_total: 8,
            max_idle: 4,
            borrow_timeout: Duration::from_secs(3),
        }
    }
}

/// Connection pool for one peer
pub struct PeerPool<F: ConnectionFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    idle: Mutex<VecDeque<F::Connection>>,
    permits: Semaphore,
    closed: AtomicBool,
}

impl<F: ConnectionFactory> PeerPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        PeerPool {
            factory: Arc::new(factory),
            permits: Semaphore::new(config.max_total.max(1)),
            config,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn idle_queue(&self) -> MutexGuard<'_, VecDeque<F::Connection>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn idle_count(&self) -> usize {
        self.idle_queue().len()
    }

    /// Borrow a connection, reusing an idle one when it validates
    pub async fn borrow(&self) -> Result<PooledConnection<'_, F>, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let permit = tokio::time::timeout(self.config.borrow_timeout, self.permits.acquire())
            .await
            .map_err(|_| PoolError::Exhausted)?
            .map_err(|_| PoolError::Closed)?;

        loop {
            let candidate = self.idle_queue().pop_front();
            match candidate {
                Some(conn) if self.factory.validate(&conn) => {
                    return Ok(PooledConnection::new(self, conn, permit));
                }
                Some(conn) => {
                    debug!("Discarding invalid pooled connection");
                    self.factory.destroy(conn).await;
                }
                None => break,
            }
        }

        let conn = self.factory.make().await?;
        Ok(PooledConnection::new(self, conn, permit))
    }

    /// Return a connection; kept idle if there is room, destroyed otherwise
    fn give_back(&self, conn: F::Connection) {
        if !self.closed.load(Ordering::Acquire) && self.factory.validate(&conn) {
            let mut idle = self.idle_queue();
            if idle.len() < self.config.max_idle {
                idle.push_back(conn);
                return;
            }
        }
        self.destroy_later(conn);
    }

    fn destroy_later(&self, conn: F::Connection) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let factory = Arc::clone(&self.factory);
                handle.spawn(async move { factory.destroy(conn).await });
            }
            Err(_) => drop(conn),
        }
    }

    /// Refuse further borrows and destroy idle connections
    ///
    /// Connections still borrowed are destroyed when they come back.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();

        let idle: Vec<F::Connection> = self.idle_queue().drain(..).collect();
        for conn in idle {
            self.factory.destroy(conn).await;
        }
    }
}

/// A borrowed connection, returned to its pool on drop
pub struct PooledConnection<'a, F: ConnectionFactory> {
    pool: &'a PeerPool<F>,
    conn: Option<F::Connection>,
    _permit: SemaphorePermit<'a>,
}

impl<'a, F: ConnectionFactory> PooledConnection<'a, F> {
    fn new(pool: &'a PeerPool<F>, conn: F::Connection, permit: SemaphorePermit<'a>) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            _permit: permit,
        }
    }

    /// Destroy instead of returning to the pool
    pub fn invalidate(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.destroy_later(conn);
        }
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<'_, F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        // only None after invalidate or drop, which consume the guard
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<'_, F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}

/// Dials [`PeerClient`]s to one address
pub struct PeerConnectionFactory {
    addr: String,
    client_config: PeerClientConfig,
}

impl PeerConnectionFactory {
    pub fn new(addr: impl Into<String>, client_config: PeerClientConfig) -> Self {
        PeerConnectionFactory {
            addr: addr.into(),
            client_config,
        }
    }
}

impl ConnectionFactory for PeerConnectionFactory {
    type Connection = PeerClient;

    async fn make(&self) -> Result<PeerClient, ClientError> {
        PeerClient::connect(self.addr.clone(), self.client_config.clone()).await
    }

    fn validate(&self, conn: &PeerClient) -> bool {
        !conn.is_closed()
    }

    async fn destroy(&self, conn: PeerClient) {
        conn.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        made: AtomicUsize,
        destroyed: AtomicUsize,
    }

    struct CountingFactory {
        counters: Arc<Counters>,
        fail: bool,
    }

    struct TestConn {
        id: usize,
        valid: AtomicBool,
    }

    impl ConnectionFactory for CountingFactory {
        type Connection = TestConn;

        async fn make(&self) -> Result<TestConn, ClientError> {
            if self.fail {
                return Err(ClientError::ConnectionLost);
            }
            let id = self.counters.made.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TestConn {
                id,
                valid: AtomicBool::new(true),
            })
        }

        fn validate(&self, conn: &TestConn) -> bool {
            conn.valid.load(Ordering::SeqCst)
        }

        async fn destroy(&self, _conn: TestConn) {
            self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(max_total: usize, max_idle: usize) -> (PeerPool<CountingFactory>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let factory = CountingFactory {
            counters: Arc::clone(&counters),
            fail: false,
        };
        let config = PoolConfig {
            max_total,
            max_idle,
            borrow_timeout: Duration::from_millis(50),
        };
        (PeerPool::new(factory, config), counters)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_idle_connection_is_reused() {
        let (pool, counters) = pool(2, 2);

        let first = pool.borrow().await.unwrap();
        let id = first.id;
        drop(first);
        assert_eq!(pool.idle_count(), 1);

        let second = pool.borrow().await.unwrap();
        assert_eq!(second.id, id);
        assert_eq!(counters.made.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_total_is_enforced() {
        let (pool, _) = pool(2, 2);

        let a = pool.borrow().await.unwrap();
        let _b = pool.borrow().await.unwrap();
        assert!(matches!(pool.borrow().await, Err(PoolError::Exhausted)));

        drop(a);
        assert!(pool.borrow().await.is_ok());
    }

    #[tokio::test]
    async fn test_excess_idle_connections_are_destroyed() {
        let (pool, counters) = pool(3, 1);

        let conns = vec![
            pool.borrow().await.unwrap(),
            pool.borrow().await.unwrap(),
            pool.borrow().await.unwrap(),
        ];
        drop(conns);
        settle().await;

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_idle_connection_is_replaced() {
        let (pool, counters) = pool(2, 2);

        let conn = pool.borrow().await.unwrap();
        let first_id = conn.id;
        drop(conn);

        // goes invalid while idle
        pool.idle_queue()[0].valid.store(false, Ordering::SeqCst);

        let conn = pool.borrow().await.unwrap();
        assert_ne!(conn.id, first_id);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_destroys() {
        let (pool, counters) = pool(2, 2);

        pool.borrow().await.unwrap().invalidate();
        settle().await;

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close() {
        let (pool, counters) = pool(2, 2);

        let idle = pool.borrow().await.unwrap();
        let borrowed = pool.borrow().await.unwrap();
        drop(idle);

        pool.close().await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert!(matches!(pool.borrow().await, Err(PoolError::Closed)));

        drop(borrowed);
        settle().await;
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let factory = CountingFactory {
            counters: Arc::new(Counters::default()),
            fail: true,
        };
        let pool = PeerPool::new(factory, PoolConfig::default());
        assert!(matches!(pool.borrow().await, Err(PoolError::Connect(_))));
    }
}

//! Connection pooling.
//!
//! Pools are registered process-wide, keyed by data-source name, and hand
//! out connections produced by the consumer-supplied factory. Transaction
//! scoping lives in [`tx`]: a thread-local current-transaction handle that
//! every operation on the same data source transparently joins.

pub mod tx;

use datamap_core::{Connection, ConnectionFactory, Dialect, Error, Result};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections allowed.
    pub max_connections: usize,
    /// Maximum time to wait for a connection in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Ping idle connections before handing them out.
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_ms: 30_000,
            test_on_checkout: true,
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with the given max connections.
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Default::default()
        }
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }

    /// Enable/disable the checkout ping.
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Connections currently open (leased + idle).
    pub total_connections: usize,
    /// Connections sitting idle in the pool.
    pub idle_connections: usize,
}

struct PoolInner {
    idle: Vec<Box<dyn Connection>>,
    total: usize,
}

/// A connection pool for one data source.
pub struct Pool {
    name: String,
    factory: Box<dyn ConnectionFactory>,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    available: Condvar,
}

impl Pool {
    /// Create a pool over a connection factory.
    pub fn new(
        name: impl Into<String>,
        factory: Box<dyn ConnectionFactory>,
        config: PoolConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            factory,
            config,
            inner: Mutex::new(PoolInner {
                idle: Vec::new(),
                total: 0,
            }),
            available: Condvar::new(),
        })
    }

    /// The data-source name this pool serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dialect of pooled connections.
    pub fn dialect(&self) -> Dialect {
        self.factory.dialect()
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current statistics.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        PoolStats {
            total_connections: inner.total,
            idle_connections: inner.idle.len(),
        }
    }

    /// Lease a connection, waiting up to the acquire timeout.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        let deadline = Instant::now() + Duration::from_millis(self.config.acquire_timeout_ms);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(mut conn) = inner.idle.pop() {
                drop(inner);
                if self.config.test_on_checkout && conn.ping().is_err() {
                    tracing::debug!(pool = %self.name, "discarding dead pooled connection");
                    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner.total -= 1;
                    drop(inner);
                    return self.acquire();
                }
                return Ok(PooledConnection {
                    conn: Some(conn),
                    pool: Arc::clone(self),
                });
            }
            if inner.total < self.config.max_connections {
                inner.total += 1;
                drop(inner);
                match self.factory.connect() {
                    Ok(conn) => {
                        return Ok(PooledConnection {
                            conn: Some(conn),
                            pool: Arc::clone(self),
                        });
                    }
                    Err(e) => {
                        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                        inner.total -= 1;
                        self.available.notify_one();
                        return Err(e);
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Pool(format!(
                    "data source '{}': no connection available within {} ms",
                    self.name, self.config.acquire_timeout_ms
                )));
            }
            let (guard, timeout) = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            if timeout.timed_out() && inner.idle.is_empty() {
                return Err(Error::Pool(format!(
                    "data source '{}': no connection available within {} ms",
                    self.name, self.config.acquire_timeout_ms
                )));
            }
        }
    }

    fn release(&self, conn: Box<dyn Connection>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.idle.push(conn);
        drop(inner);
        self.available.notify_one();
    }

    fn forget(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total -= 1;
        drop(inner);
        self.available.notify_one();
    }
}

/// A leased connection; returns to its pool on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<Pool>,
}

impl PooledConnection {
    /// Discard this connection instead of returning it to the pool.
    pub fn discard(mut self) {
        self.conn.take();
        self.pool.forget();
        std::mem::forget(self);
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().expect("pooled connection present")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().expect("pooled connection present")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<Pool>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Pool>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get the pool registered under `name`, creating it from `factory` on
/// first use.
pub fn register(
    name: &str,
    config: PoolConfig,
    factory: impl FnOnce() -> Result<Box<dyn ConnectionFactory>>,
) -> Result<Arc<Pool>> {
    let mut pools = registry().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(pool) = pools.get(name) {
        return Ok(Arc::clone(pool));
    }
    let pool = Pool::new(name, factory()?, config);
    pools.insert(name.to_string(), Arc::clone(&pool));
    Ok(pool)
}

/// Look up an already-registered pool.
pub fn get(name: &str) -> Option<Arc<Pool>> {
    registry()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(name)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamap_core::{Row, SqlEnv, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeConn;

    impl datamap_core::Executor for FakeConn {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<u64> {
            Ok(0)
        }

        fn insert_returning_key(&mut self, _sql: &str, _params: &[Value]) -> Result<i64> {
            Ok(0)
        }
    }

    impl Connection for FakeConn {
        fn begin(&mut self) -> Result<()> {
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }

        fn ping(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeFactory {
        created: AtomicUsize,
    }

    impl ConnectionFactory for FakeFactory {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn connect(&self) -> Result<Box<dyn Connection>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeConn))
        }
    }

    fn pool(max: usize) -> Arc<Pool> {
        Pool::new(
            "test",
            Box::new(FakeFactory {
                created: AtomicUsize::new(0),
            }),
            PoolConfig::new(max).acquire_timeout(50).test_on_checkout(false),
        )
    }

    #[test]
    fn leases_and_returns() {
        let pool = pool(2);
        let conn = pool.acquire().unwrap();
        assert_eq!(pool.stats().total_connections, 1);
        assert_eq!(pool.stats().idle_connections, 0);
        drop(conn);
        assert_eq!(pool.stats().idle_connections, 1);
    }

    #[test]
    fn reuses_idle_connections() {
        let pool = pool(1);
        drop(pool.acquire().unwrap());
        drop(pool.acquire().unwrap());
        assert_eq!(pool.stats().total_connections, 1);
    }

    #[test]
    fn exhaustion_times_out() {
        let pool = pool(1);
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, Error::Pool(_)));
    }

    #[test]
    fn sql_env_from_pool_dialect() {
        let pool = pool(1);
        let env = SqlEnv::new(pool.dialect());
        assert_eq!(env.dialect, Dialect::Sqlite);
    }
}

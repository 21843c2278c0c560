//! Thread-scoped transaction propagation.
//!
//! The current-transaction handle is a thread-local slot holding the
//! leased connection of the innermost-active `transaction { .. }`. Only
//! outermost entry and exit mutate the slot; nested blocks reuse the
//! connection without commit/rollback authority, and any plain operation
//! on the same data source joins the slot transparently.

use crate::{Pool, PooledConnection};
use datamap_core::{Connection, Error, Result};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

/// The published transaction handle of the calling thread.
#[derive(Clone)]
pub struct TxHandle {
    pool_name: String,
    conn: Rc<RefCell<PooledConnection>>,
    live: Rc<Cell<bool>>,
}

impl TxHandle {
    /// Whether this transaction is still open.
    ///
    /// A cursor holding the handle past the end of its block sees `false`.
    pub fn is_live(&self) -> bool {
        self.live.get()
    }

    /// Run a closure against the transaction's connection.
    pub fn with_conn<R>(&self, f: impl FnOnce(&mut dyn Connection) -> Result<R>) -> Result<R> {
        if !self.live.get() {
            return Err(Error::Transaction(
                "transaction already completed".to_string(),
            ));
        }
        let mut conn = self.conn.borrow_mut();
        f(&mut **conn)
    }
}

thread_local! {
    static CURRENT: RefCell<Option<TxHandle>> = const { RefCell::new(None) };
}

/// The current-transaction handle for `pool` on this thread, if any.
pub fn current(pool: &Pool) -> Option<TxHandle> {
    CURRENT.with(|slot| {
        slot.borrow()
            .as_ref()
            .filter(|h| h.pool_name == pool.name())
            .cloned()
    })
}

/// Whether this thread has an open transaction on `pool`.
pub fn in_transaction(pool: &Pool) -> bool {
    current(pool).is_some()
}

/// Run a closure with a connection: the thread's transaction connection
/// when one is open on this data source, a short-lived pool lease
/// otherwise.
///
/// The closure must not re-enter the mapper while holding rows by
/// reference; user callbacks run after the lease is released.
pub fn with_connection<R>(
    pool: &Arc<Pool>,
    f: impl FnOnce(&mut dyn Connection) -> Result<R>,
) -> Result<R> {
    if let Some(handle) = current(pool) {
        return handle.with_conn(f);
    }
    let mut conn = pool.acquire()?;
    f(&mut *conn)
}

/// Execute `f` inside a transaction on `pool`.
///
/// Outermost entry acquires a connection, disables autocommit, publishes
/// the thread slot, and commits on `Ok` / rolls back on `Err`. A nested
/// call on the same data source reuses the connection and returns its own
/// result; commit/rollback authority stays with the outermost scope. A
/// nested call on a *different* data source is refused.
pub fn run_in_transaction<R>(pool: &Arc<Pool>, f: impl FnOnce() -> Result<R>) -> Result<R> {
    let existing = CURRENT.with(|slot| slot.borrow().clone());
    if let Some(handle) = existing {
        if handle.pool_name == pool.name() {
            // Nested scope: inlined into the enclosing transaction.
            return f();
        }
        return Err(Error::Transaction(format!(
            "nested transaction on data source '{}' while '{}' is active",
            pool.name(),
            handle.pool_name
        )));
    }

    let mut conn = pool.acquire()?;
    conn.begin()?;
    let handle = TxHandle {
        pool_name: pool.name().to_string(),
        conn: Rc::new(RefCell::new(conn)),
        live: Rc::new(Cell::new(true)),
    };
    CURRENT.with(|slot| *slot.borrow_mut() = Some(handle.clone()));

    // The slot is cleared on every exit path, panics included; a panicked
    // block also rolls back before its connection returns to the pool.
    struct SlotReset(TxHandle);
    impl Drop for SlotReset {
        fn drop(&mut self) {
            CURRENT.with(|slot| *slot.borrow_mut() = None);
            self.0.live.set(false);
            if std::thread::panicking() {
                let _ = self.0.conn.borrow_mut().rollback();
            }
        }
    }
    let reset = SlotReset(handle.clone());

    let outcome = f();

    drop(reset);
    let finish = {
        let mut conn = handle.conn.borrow_mut();
        match &outcome {
            Ok(_) => conn.commit(),
            Err(_) => conn.rollback(),
        }
    };
    match (outcome, finish) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), _) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolConfig;
    use datamap_core::{Dialect, Executor, Row, Value};

    struct CountingConn {
        begun: u32,
        committed: u32,
        rolled_back: u32,
    }

    impl Executor for CountingConn {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<u64> {
            Ok(1)
        }

        fn insert_returning_key(&mut self, _sql: &str, _params: &[Value]) -> Result<i64> {
            Ok(1)
        }
    }

    impl Connection for CountingConn {
        fn begin(&mut self) -> Result<()> {
            self.begun += 1;
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.committed += 1;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.rolled_back += 1;
            Ok(())
        }

        fn ping(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct CountingFactory;

    impl datamap_core::ConnectionFactory for CountingFactory {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn connect(&self) -> Result<Box<dyn Connection>> {
            Ok(Box::new(CountingConn {
                begun: 0,
                committed: 0,
                rolled_back: 0,
            }))
        }
    }

    fn pool(name: &str) -> Arc<Pool> {
        Pool::new(
            name,
            Box::new(CountingFactory),
            PoolConfig::new(2).test_on_checkout(false),
        )
    }

    #[test]
    fn nested_blocks_share_the_slot() {
        let pool = pool("tx-a");
        let result = run_in_transaction(&pool, || {
            assert!(in_transaction(&pool));
            let inner: Result<u32> = run_in_transaction(&pool, || Ok(7));
            assert_eq!(inner.unwrap(), 7);
            // Still inside the outer transaction
            assert!(in_transaction(&pool));
            Ok(1)
        });
        assert_eq!(result.unwrap(), 1);
        assert!(!in_transaction(&pool));
    }

    #[test]
    fn slot_cleared_after_failure() {
        let pool = pool("tx-b");
        let result: Result<()> =
            run_in_transaction(&pool, || Err(Error::Custom("boom".to_string())));
        assert!(result.is_err());
        assert!(!in_transaction(&pool));
    }

    #[test]
    fn cross_source_nesting_is_refused() {
        let a = pool("tx-c");
        let b = pool("tx-d");
        let result = run_in_transaction(&a, || {
            let nested: Result<()> = run_in_transaction(&b, || Ok(()));
            assert!(matches!(nested, Err(Error::Transaction(_))));
            Ok(())
        });
        assert!(result.is_ok());
    }

    #[test]
    fn panicking_block_clears_the_slot() {
        let pool = pool("tx-panic");
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<()> = run_in_transaction(&pool, || panic!("boom"));
        }));
        assert!(caught.is_err());
        assert!(!in_transaction(&pool));
        // The next transaction on this thread starts fresh
        let result = run_in_transaction(&pool, || Ok(1));
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn plain_ops_join_the_transaction() {
        let pool = pool("tx-e");
        run_in_transaction(&pool, || {
            with_connection(&pool, |conn| conn.execute("UPDATE t", &[]))?;
            // No second lease was taken: the pool created exactly one conn
            assert_eq!(pool.stats().total_connections, 1);
            Ok(())
        })
        .unwrap();
    }
}

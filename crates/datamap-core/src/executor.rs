//! Execution abstractions.
//!
//! The library does not own a connection factory; it consumes one through
//! these traits. Backends (SQLite, MySQL, PostgreSQL) provide the concrete
//! types in their own crates.

use crate::dialect::Dialect;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Something that can run SQL: a raw connection or an enlisted
/// transaction handle.
pub trait Executor {
    /// The dialect this executor speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement and return the affected-row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return the generated key.
    ///
    /// The SQL is dialect-prepared by the caller: on PostgreSQL it carries a
    /// `RETURNING` clause, elsewhere the backend reports the last insert id.
    fn insert_returning_key(&mut self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Execute a query and return the first row, if any.
    fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }
}

/// A database connection with transaction control.
pub trait Connection: Executor + Send {
    /// Begin a transaction (autocommit off).
    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Check that the connection is alive.
    fn ping(&mut self) -> Result<()>;
}

/// Creates connections for one data source.
///
/// The pool calls `connect` as demand requires; the factory is the only
/// place that knows the concrete driver.
pub trait ConnectionFactory: Send + Sync {
    /// The dialect of connections produced by this factory.
    fn dialect(&self) -> Dialect;

    /// Open a new connection.
    fn connect(&self) -> Result<Box<dyn Connection>>;
}

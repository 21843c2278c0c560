//! SQLite backend over `rusqlite`.
//!
//! File-backed databases open one handle per pooled connection; in-memory
//! databases use a named shared-cache URI so every pooled connection sees
//! the same data.

use datamap_core::{
    ColumnInfo, Connection, ConnectionFactory, Dialect, Error, Executor, Result, Row, Value,
};
use rusqlite::OpenFlags;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a SQLite database lives.
#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    Memory { name: String },
}

/// Factory producing SQLite connections for the pool.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    target: Target,
}

impl SqliteFactory {
    /// A file-backed database.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::File(path.into()),
        }
    }

    /// A named in-memory database shared across the pool's connections.
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            target: Target::Memory { name: name.into() },
        }
    }
}

impl ConnectionFactory for SqliteFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = match &self.target {
            Target::File(path) => {
                if let Some(dir) = path.parent() {
                    if !dir.as_os_str().is_empty() && !dir.exists() {
                        std::fs::create_dir_all(dir).map_err(|e| {
                            Error::Connection(format!(
                                "cannot create data directory {}: {e}",
                                dir.display()
                            ))
                        })?;
                    }
                }
                rusqlite::Connection::open(path).map_err(map_error)?
            }
            Target::Memory { name } => rusqlite::Connection::open_with_flags(
                format!("file:{name}?mode=memory&cache=shared"),
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )
            .map_err(map_error)?,
        };
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(map_error)?;
        Ok(Box::new(SqliteConnection { conn }))
    }
}

/// One SQLite connection.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

fn map_error(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Constraint(e.to_string())
        }
        _ => Error::query(e.to_string()),
    }
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(v) => rusqlite::types::Value::Integer(i64::from(*v)),
        Value::Int(v) => rusqlite::types::Value::Integer(i64::from(*v)),
        Value::BigInt(v) => rusqlite::types::Value::Integer(*v),
        Value::Double(v) => rusqlite::types::Value::Real(*v),
        Value::Text(v) => rusqlite::types::Value::Text(v.clone()),
        Value::Bytes(v) => rusqlite::types::Value::Blob(v.clone()),
        Value::Json(v) => rusqlite::types::Value::Text(v.to_string()),
    }
}

fn from_sql_value(value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(v) => Value::BigInt(v),
        rusqlite::types::Value::Real(v) => Value::Double(v),
        rusqlite::types::Value::Text(v) => Value::Text(v),
        rusqlite::types::Value::Blob(v) => Value::Bytes(v),
    }
}

impl Executor for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql, params = params.len(), "sqlite query");
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| Error::query_sql(e.to_string(), sql))?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));
        let count = columns.len();

        let bound = params.iter().map(to_sql_value);
        let mut rows = stmt
            .query(rusqlite::params_from_iter(bound))
            .map_err(|e| Error::query_sql(e.to_string(), sql))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::query_sql(e.to_string(), sql))? {
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                let value: rusqlite::types::Value = row
                    .get(i)
                    .map_err(|e| Error::query_sql(e.to_string(), sql))?;
                values.push(from_sql_value(value));
            }
            out.push(Row::with_columns(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql, params = params.len(), "sqlite execute");
        let bound = params.iter().map(to_sql_value);
        self.conn
            .execute(sql, rusqlite::params_from_iter(bound))
            .map(|n| n as u64)
            .map_err(map_error)
    }

    fn insert_returning_key(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        self.execute(sql, params)?;
        Ok(self.conn.last_insert_rowid())
    }
}

impl Connection for SqliteConnection {
    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN").map_err(map_error)
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(map_error)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(map_error)
    }

    fn ping(&mut self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(map_error)
    }
}

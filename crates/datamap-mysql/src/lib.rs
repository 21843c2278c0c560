//! MySQL backend over the `mysql` crate.

use datamap_core::{
    ColumnInfo, Connection, ConnectionFactory, Dialect, Error, Executor, Result, Row, Value,
};
use mysql::prelude::Queryable;
use mysql::{Opts, OptsBuilder, Params};
use std::sync::Arc;

/// Connection coordinates for a MySQL data source.
#[derive(Debug, Clone)]
pub struct MysqlFactory {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl MysqlFactory {
    /// Build a factory from connection coordinates.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    fn opts(&self) -> Opts {
        OptsBuilder::new()
            .ip_or_hostname(Some(self.host.clone()))
            .tcp_port(self.port)
            .user(Some(self.user.clone()))
            .pass(Some(self.password.clone()))
            .db_name(Some(self.database.clone()))
            .into()
    }
}

impl ConnectionFactory for MysqlFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = mysql::Conn::new(self.opts())
            .map_err(|e| Error::Connection(format!("mysql connect failed: {e}")))?;
        Ok(Box::new(MysqlConnection { conn }))
    }
}

/// One MySQL connection.
pub struct MysqlConnection {
    conn: mysql::Conn,
}

// Duplicate entry (1062), FK violations (1216/1217/1451/1452), and the
// CHECK violation added in 8.0 (3819).
const CONSTRAINT_CODES: &[u16] = &[1062, 1216, 1217, 1451, 1452, 3819];

fn map_error(e: mysql::Error) -> Error {
    if let mysql::Error::MySqlError(ref server) = e {
        if CONSTRAINT_CODES.contains(&server.code) {
            return Error::Constraint(server.message.clone());
        }
    }
    Error::query(e.to_string())
}

fn to_mysql_value(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Bool(v) => mysql::Value::Int(i64::from(*v)),
        Value::Int(v) => mysql::Value::Int(i64::from(*v)),
        Value::BigInt(v) => mysql::Value::Int(*v),
        Value::Double(v) => mysql::Value::Double(*v),
        Value::Text(v) => mysql::Value::Bytes(v.clone().into_bytes()),
        Value::Bytes(v) => mysql::Value::Bytes(v.clone()),
        Value::Json(v) => mysql::Value::Bytes(v.to_string().into_bytes()),
    }
}

fn from_mysql_value(value: mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Int(v) => Value::BigInt(v),
        mysql::Value::UInt(v) => Value::BigInt(v as i64),
        mysql::Value::Float(v) => Value::Double(f64::from(v)),
        mysql::Value::Double(v) => Value::Double(v),
        mysql::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        other @ (mysql::Value::Date(..) | mysql::Value::Time(..)) => {
            Value::Text(other.as_sql(false))
        }
    }
}

fn params_for(values: &[Value]) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(to_mysql_value).collect())
    }
}

impl Executor for MysqlConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql, params = params.len(), "mysql query");
        let result = self
            .conn
            .exec_iter(sql, params_for(params))
            .map_err(|e| Error::query_sql(e.to_string(), sql))?;
        let names: Vec<String> = result
            .columns()
            .as_ref()
            .iter()
            .map(|c| c.name_str().to_string())
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));
        let mut out = Vec::new();
        for row in result {
            let row = row.map_err(|e| Error::query_sql(e.to_string(), sql))?;
            let values = row.unwrap().into_iter().map(from_mysql_value).collect();
            out.push(Row::with_columns(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql, params = params.len(), "mysql execute");
        self.conn
            .exec_drop(sql, params_for(params))
            .map_err(map_error)?;
        Ok(self.conn.affected_rows())
    }

    fn insert_returning_key(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        self.execute(sql, params)?;
        Ok(self.conn.last_insert_id() as i64)
    }
}

impl Connection for MysqlConnection {
    fn begin(&mut self) -> Result<()> {
        self.conn.query_drop("START TRANSACTION").map_err(map_error)
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").map_err(map_error)
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.query_drop("ROLLBACK").map_err(map_error)
    }

    fn ping(&mut self) -> Result<()> {
        self.conn
            .ping()
            .map_err(|e| Error::Connection(format!("mysql ping failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_mapping_to_mysql() {
        assert!(matches!(to_mysql_value(&Value::Null), mysql::Value::NULL));
        assert!(matches!(
            to_mysql_value(&Value::Bool(true)),
            mysql::Value::Int(1)
        ));
        assert!(matches!(
            to_mysql_value(&Value::Text("x".into())),
            mysql::Value::Bytes(_)
        ));
    }

    #[test]
    fn value_mapping_from_mysql() {
        assert_eq!(
            from_mysql_value(mysql::Value::Bytes(b"hi".to_vec())),
            Value::Text("hi".to_string())
        );
        assert_eq!(from_mysql_value(mysql::Value::Int(3)), Value::BigInt(3));
        assert_eq!(from_mysql_value(mysql::Value::NULL), Value::Null);
    }
}

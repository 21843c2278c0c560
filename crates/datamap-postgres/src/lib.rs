//! PostgreSQL backend over the `postgres` crate.

use datamap_core::{
    ColumnInfo, Connection, ConnectionFactory, Dialect, Error, Executor, Result, Row, Value,
};
use postgres::types::{IsNull, ToSql, Type};
use postgres::NoTls;
use std::sync::Arc;

/// Connection coordinates for a PostgreSQL data source.
#[derive(Debug, Clone)]
pub struct PostgresFactory {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl PostgresFactory {
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
}

impl ConnectionFactory for PostgresFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn connect(&self) -> Result<Box<dyn Connection>> {
        let client = postgres::Config::new()
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.database)
            .connect(NoTls)
            .map_err(|e| Error::Connection(format!("postgres connect failed: {e}")))?;
        Ok(Box::new(PostgresConnection { client }))
    }
}

/// One PostgreSQL connection.
pub struct PostgresConnection {
    client: postgres::Client,
}

fn map_error(e: postgres::Error) -> Error {
    if let Some(state) = e.code() {
        // Class 23: integrity constraint violations.
        if state.code().starts_with("23") {
            return Error::Constraint(e.to_string());
        }
    }
    Error::query(e.to_string())
}

/// An untyped NULL parameter.
///
/// `Option::<T>::None` only binds where the column's type matches `T`; this
/// wrapper is accepted for any target column and always writes NULL.
#[derive(Debug)]
struct NullParam;

impl ToSql for NullParam {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut bytes::BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    postgres::types::to_sql_checked!();
}

fn bind_params(values: &[Value]) -> Vec<Box<dyn ToSql + Sync>> {
    values
        .iter()
        .map(|value| -> Box<dyn ToSql + Sync> {
            match value {
                Value::Null => Box::new(NullParam),
                Value::Bool(v) => Box::new(*v),
                Value::Int(v) => Box::new(*v),
                Value::BigInt(v) => Box::new(*v),
                Value::Double(v) => Box::new(*v),
                Value::Text(v) => Box::new(v.clone()),
                Value::Bytes(v) => Box::new(v.clone()),
                Value::Json(v) => Box::new(v.to_string()),
            }
        })
        .collect()
}

fn from_pg_row(row: &postgres::Row, columns: &Arc<ColumnInfo>) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i).map(|v| v.map(Value::Bool))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)
                .map(|v| v.map(|v| Value::Int(i32::from(v))))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i).map(|v| v.map(Value::Int))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i).map(|v| v.map(Value::BigInt))
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)
                .map(|v| v.map(|v| Value::Double(f64::from(v))))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i).map(|v| v.map(Value::Double))
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i).map(|v| v.map(Value::Bytes))
        } else {
            row.try_get::<_, Option<String>>(i).map(|v| v.map(Value::Text))
        }
        .map_err(|e| Error::Type {
            expected: "decodable postgres value",
            actual: e.to_string(),
            column: Some(column.name().to_string()),
        })?;
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(Row::with_columns(Arc::clone(columns), values))
}

impl Executor for PostgresConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql, params = params.len(), "postgres query");
        let boxed = bind_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(Box::as_ref).collect();
        let rows = self
            .client
            .query(sql, &refs)
            .map_err(|e| Error::query_sql(e.to_string(), sql))?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let names: Vec<String> = first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));
        rows.iter().map(|row| from_pg_row(row, &columns)).collect()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql, params = params.len(), "postgres execute");
        let boxed = bind_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(Box::as_ref).collect();
        self.client.execute(sql, &refs).map_err(map_error)
    }

    fn insert_returning_key(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        // The statement carries RETURNING <pk> under this dialect.
        let rows = self.query(sql, params)?;
        rows.first()
            .and_then(|r| r.get(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::query_sql("INSERT returned no generated key", sql))
    }
}

impl Connection for PostgresConnection {
    fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").map_err(map_error)
    }

    fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").map_err(map_error)
    }

    fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").map_err(map_error)
    }

    fn ping(&mut self) -> Result<()> {
        self.client
            .batch_execute("SELECT 1")
            .map_err(|e| Error::Connection(format!("postgres ping failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_params_bind_for_any_column_type() {
        assert!(<NullParam as ToSql>::accepts(&Type::TEXT));
        assert!(<NullParam as ToSql>::accepts(&Type::INT4));
        assert!(<NullParam as ToSql>::accepts(&Type::FLOAT8));
        assert!(<NullParam as ToSql>::accepts(&Type::BOOL));

        let mut buf = bytes::BytesMut::new();
        assert!(matches!(
            NullParam.to_sql(&Type::TEXT, &mut buf).unwrap(),
            IsNull::Yes
        ));
        assert!(buf.is_empty());
    }
}

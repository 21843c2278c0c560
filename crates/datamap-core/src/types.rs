//! Logical column types.

use crate::dialect::Dialect;

/// Built-in logical SQL types recognized by the schema inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// Character data; rendered with a length on MySQL/PostgreSQL.
    Text,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// Double-precision float.
    Double,
    /// Boolean, stored as 0/1 where the backend has no boolean type.
    Bool,
    /// Indexed enum, stored as its declared integer index.
    IndexedEnum,
    /// Raw bytes.
    Bytes,
}

/// The column type recorded in a descriptor: a built-in logical type or an
/// explicit override carrying a server-side and a SQLite type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Inferred from the field's Rust type.
    Builtin(SqlType),
    /// `#[datamap(column_type(sql = ..., sqlite = ...))]` or a custom codec.
    Custom {
        sql: &'static str,
        sqlite: &'static str,
    },
}

impl ColumnType {
    /// Render the column type for DDL under the given dialect.
    ///
    /// An explicit override always wins; built-ins follow the per-dialect
    /// type table, with `length` applied to character columns.
    pub fn render(&self, dialect: Dialect, length: u32) -> String {
        match self {
            ColumnType::Custom { sql, sqlite } => match dialect {
                Dialect::Sqlite => (*sqlite).to_string(),
                Dialect::Mysql | Dialect::Postgres => (*sql).to_string(),
            },
            ColumnType::Builtin(ty) => dialect.column_type(*ty, length),
        }
    }
}

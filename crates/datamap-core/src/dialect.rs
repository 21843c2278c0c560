//! Backend dialects.
//!
//! Everything that differs between SQLite, MySQL and PostgreSQL at the SQL
//! text level is concentrated here: identifier quoting, placeholders, the
//! column-type table, LIMIT/OFFSET, upsert syntax, auto-increment keys and
//! schema creation.

use crate::types::SqlType;

/// Default `VARCHAR` length when no `#[datamap(length = ..)]` is given.
pub const DEFAULT_TEXT_LENGTH: u32 = 64;

/// SQL dialect for generating backend-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// SQLite (backtick quoting, `?` placeholders)
    #[default]
    Sqlite,
    /// MySQL (backtick quoting, `?` placeholders)
    Mysql,
    /// PostgreSQL (double-quote quoting, `$n` placeholders)
    Postgres,
}

impl Dialect {
    /// Quote a single identifier.
    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::Sqlite | Dialect::Mysql => format!("`{ident}`"),
            Dialect::Postgres => format!("\"{ident}\""),
        }
    }

    /// Quote a possibly schema-qualified identifier (`schema.table`).
    pub fn quote_qualified(self, ident: &str) -> String {
        ident
            .split('.')
            .map(|part| self.quote(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Generate a placeholder for the given 1-based parameter index.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
            Dialect::Postgres => format!("${index}"),
        }
    }

    /// Column type name for a built-in logical type.
    pub fn column_type(self, ty: SqlType, length: u32) -> String {
        let length = if length == 0 { DEFAULT_TEXT_LENGTH } else { length };
        match (self, ty) {
            (Dialect::Mysql, SqlType::Text) => format!("VARCHAR({length})"),
            (Dialect::Sqlite, SqlType::Text) => "TEXT".to_string(),
            (Dialect::Postgres, SqlType::Text) => format!("VARCHAR({length})"),

            (Dialect::Mysql, SqlType::Int) => "INT".to_string(),
            (Dialect::Sqlite, SqlType::Int) => "INTEGER".to_string(),
            (Dialect::Postgres, SqlType::Int) => "INTEGER".to_string(),

            (Dialect::Mysql, SqlType::BigInt) => "BIGINT".to_string(),
            (Dialect::Sqlite, SqlType::BigInt) => "INTEGER".to_string(),
            (Dialect::Postgres, SqlType::BigInt) => "BIGINT".to_string(),

            (Dialect::Mysql, SqlType::Double) => "DOUBLE".to_string(),
            (Dialect::Sqlite, SqlType::Double) => "REAL".to_string(),
            (Dialect::Postgres, SqlType::Double) => "DOUBLE PRECISION".to_string(),

            (Dialect::Mysql, SqlType::Bool) => "TINYINT(1)".to_string(),
            (Dialect::Sqlite, SqlType::Bool) => "INTEGER".to_string(),
            (Dialect::Postgres, SqlType::Bool) => "BOOLEAN".to_string(),

            (Dialect::Mysql, SqlType::IndexedEnum) => "BIGINT".to_string(),
            (Dialect::Sqlite, SqlType::IndexedEnum) => "INTEGER".to_string(),
            (Dialect::Postgres, SqlType::IndexedEnum) => "BIGINT".to_string(),

            (Dialect::Mysql, SqlType::Bytes) => "BLOB".to_string(),
            (Dialect::Sqlite, SqlType::Bytes) => "BLOB".to_string(),
            (Dialect::Postgres, SqlType::Bytes) => "BYTEA".to_string(),
        }
    }

    /// The full column definition of an auto-increment primary key.
    pub fn auto_increment_pk(self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Mysql => "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    /// Render a LIMIT/OFFSET tail (leading space included when non-empty).
    ///
    /// MySQL and SQLite require a LIMIT clause before OFFSET; when only an
    /// offset is requested, an effectively unbounded limit is emitted.
    pub fn limit_offset(self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!(" LIMIT {l}"),
            (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
            (None, Some(o)) => match self {
                Dialect::Postgres => format!(" OFFSET {o}"),
                Dialect::Mysql => format!(" LIMIT 18446744073709551615 OFFSET {o}"),
                Dialect::Sqlite => format!(" LIMIT -1 OFFSET {o}"),
            },
        }
    }

    /// Render the upsert tail for an INSERT.
    ///
    /// `conflict_cols` are the locator columns; `update_cols` the columns to
    /// overwrite on conflict. Column names come in unquoted.
    pub fn upsert_clause(self, conflict_cols: &[&str], update_cols: &[&str]) -> String {
        match self {
            Dialect::Sqlite | Dialect::Postgres => {
                let conflict = conflict_cols
                    .iter()
                    .map(|c| self.quote(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let updates = update_cols
                    .iter()
                    .map(|c| format!("{} = excluded.{}", self.quote(c), self.quote(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" ON CONFLICT ({conflict}) DO UPDATE SET {updates}")
            }
            Dialect::Mysql => {
                let updates = update_cols
                    .iter()
                    .map(|c| format!("{} = VALUES({})", self.quote(c), self.quote(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" ON DUPLICATE KEY UPDATE {updates}")
            }
        }
    }

    /// `CREATE SCHEMA IF NOT EXISTS` where the backend supports schemas.
    pub fn create_schema(self, name: &str) -> Option<String> {
        match self {
            Dialect::Postgres => Some(format!("CREATE SCHEMA IF NOT EXISTS {}", self.quote(name))),
            Dialect::Sqlite | Dialect::Mysql => None,
        }
    }

    /// Whether batch inserts report every generated key.
    ///
    /// SQLite only reports the last generated rowid of a multi-row insert;
    /// this is a documented limit, not a bug to work around.
    pub fn returns_all_batch_keys(self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }
}

/// Running placeholder generator, so PostgreSQL `$n` indices stay sequential
/// across the FROM / ON / WHERE sections of a statement.
#[derive(Debug)]
pub struct Placeholders {
    dialect: Dialect,
    next: usize,
}

impl Placeholders {
    /// Start numbering at `$1`.
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect, next: 0 }
    }

    /// Continue numbering after `already_bound` parameters.
    pub fn starting_after(dialect: Dialect, already_bound: usize) -> Self {
        Self {
            dialect,
            next: already_bound,
        }
    }

    /// Emit the next placeholder.
    pub fn next(&mut self) -> String {
        self.next += 1;
        self.dialect.placeholder(self.next)
    }
}

/// Dialect plus the default schema of the data source.
///
/// Tables without an explicit schema qualifier are rendered under the
/// default schema (PostgreSQL only; other backends ignore it).
#[derive(Debug, Clone)]
pub struct SqlEnv {
    pub dialect: Dialect,
    pub default_schema: Option<String>,
}

impl SqlEnv {
    /// Environment without a default schema.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            default_schema: None,
        }
    }

    /// Environment with a default schema.
    pub fn with_schema(dialect: Dialect, schema: impl Into<String>) -> Self {
        Self {
            dialect,
            default_schema: Some(schema.into()),
        }
    }

    /// Quote a single identifier.
    pub fn quote(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    /// Render a table name under the effective schema.
    pub fn table(&self, schema: Option<&str>, table: &str) -> String {
        let effective = schema.or(match self.dialect {
            Dialect::Postgres => self.default_schema.as_deref(),
            _ => None,
        });
        match effective {
            Some(s) => format!("{}.{}", self.dialect.quote(s), self.dialect.quote(table)),
            None => self.dialect.quote(table),
        }
    }
}

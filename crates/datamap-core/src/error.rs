//! Error types for datamap operations.

use thiserror::Error;

/// Result alias used across the crate family.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for all datamap operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is invalid (bad data-source options, disabled backend).
    #[error("configuration error: {0}")]
    Config(String),

    /// A connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// The pool could not hand out a connection in time.
    #[error("pool error: {0}")]
    Pool(String),

    /// A statement failed at the database.
    #[error("query failed: {message}")]
    Query {
        message: String,
        sql: Option<String>,
    },

    /// A unique / foreign-key / check constraint was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A result value could not be converted to the requested Rust type.
    #[error("type error in column '{}': expected {expected}, found {actual}", .column.as_deref().unwrap_or("?"))]
    Type {
        expected: &'static str,
        actual: String,
        column: Option<String>,
    },

    /// The entity descriptor or generated DDL is invalid.
    #[error("schema error: {0}")]
    Schema(String),

    /// A migration step failed; the table stays at its pre-step version.
    #[error("migration of table '{table}' failed at version {version}: {message}")]
    Migration {
        table: String,
        version: u32,
        message: String,
    },

    /// The table saw a migration failure earlier in this process and refuses
    /// all further operations.
    #[error("table '{0}' is not admitted after a failed migration")]
    Poisoned(String),

    /// A cursor API was invoked outside `transaction { .. }`.
    #[error("cursor operations require an active transaction")]
    CursorWithoutTransaction,

    /// Transaction bookkeeping failed (nested scope mismatch, double commit).
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Serialization / deserialization failed.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Free-form error, mostly from user closures.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Build a query error without captured SQL.
    pub fn query(message: impl Into<String>) -> Self {
        Error::Query {
            message: message.into(),
            sql: None,
        }
    }

    /// Build a query error with the offending SQL attached.
    pub fn query_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Error::Query {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Is this a constraint violation?
    pub fn is_constraint(&self) -> bool {
        matches!(self, Error::Constraint(_))
    }

    /// Does retrying the operation have a chance of succeeding?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Pool(_) | Error::Connection(_))
    }

    /// Get the SQL that caused this error, if captured.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_error_carries_sql() {
        let e = Error::query_sql("boom", "SELECT 1");
        assert_eq!(e.sql(), Some("SELECT 1"));
        assert_eq!(Error::query("boom").sql(), None);
    }

    #[test]
    fn type_error_display_mentions_column() {
        let e = Error::Type {
            expected: "i64",
            actual: "TEXT".to_string(),
            column: Some("age".to_string()),
        };
        let msg = e.to_string();
        assert!(msg.contains("age"), "{msg}");
        assert!(msg.contains("i64"), "{msg}");
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::Pool("exhausted".into()).is_retryable());
        assert!(!Error::query("nope").is_retryable());
    }
}

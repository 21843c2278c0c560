//! Database row representation.

use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows of a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// All column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
///
/// Provides index-based and name-based access; column metadata is shared
/// via `Arc` so large result sets carry it once.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a row owning its column names.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            values,
            columns: Arc::new(ColumnInfo::new(column_names)),
        }
    }

    /// Create a row sharing column metadata with its result set.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// The shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if this row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// The value under `prefix + name`, erroring on a missing column.
    ///
    /// Link hydration addresses nested columns through their namespace
    /// prefix (`__link__<fk>__...`); the root row uses an empty prefix.
    pub fn value_at(&self, prefix: &str, name: &str) -> Result<&Value> {
        let full;
        let key = if prefix.is_empty() {
            name
        } else {
            full = format!("{prefix}{name}");
            &full
        };
        self.get_by_name(key).ok_or_else(|| Error::Type {
            expected: "column",
            actual: format!("no column '{key}' in result"),
            column: Some(key.to_string()),
        })
    }

    /// Typed value under `prefix + name`.
    pub fn get_at<T>(&self, prefix: &str, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.value_at(prefix, name)?.clone();
        T::try_from(value).map_err(|e| match e {
            Error::Type {
                expected, actual, ..
            } => Error::Type {
                expected,
                actual,
                column: Some(format!("{prefix}{name}")),
            },
            e => e,
        })
    }

    /// Typed value by bare column name.
    pub fn get_named<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        self.get_at("", name)
    }

    /// All column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    /// Iterate over (column name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Consume the row into its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec![
                "id".to_string(),
                "world".to_string(),
                "__link__loc_id__id".to_string(),
            ],
            vec![Value::BigInt(1), Value::Text("w".into()), Value::Null],
        )
    }

    #[test]
    fn access_by_name_and_index() {
        let row = sample();
        assert_eq!(row.get(0), Some(&Value::BigInt(1)));
        assert_eq!(row.get_by_name("world"), Some(&Value::Text("w".into())));
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn typed_access() {
        let row = sample();
        let id: i64 = row.get_named("id").unwrap();
        assert_eq!(id, 1);
        let world: String = row.get_named("world").unwrap();
        assert_eq!(world, "w");
        assert!(row.get_named::<i64>("world").is_err());
    }

    #[test]
    fn prefixed_access() {
        let row = sample();
        let v: Option<i64> = row.get_at("__link__loc_id__", "id").unwrap();
        assert_eq!(v, None);
        assert!(row.value_at("__link__loc_id__", "name").is_err());
    }

    #[test]
    fn missing_column_error_names_the_column() {
        let row = sample();
        let err = row.get_named::<i64>("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}

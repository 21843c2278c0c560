//! Untyped join results.

use datamap_core::{Error, Result, Row, Value};
use std::collections::HashMap;

/// An untyped row keyed by the aliases declared with `select_as`.
///
/// Arbitrary joins don't map onto one entity type; a `BundleMap` carries
/// whatever shape the query declared.
#[derive(Debug, Clone, Default)]
pub struct BundleMap {
    values: HashMap<String, Value>,
}

impl BundleMap {
    /// Build from a result row, keyed by its column names.
    pub fn from_row(row: &Row) -> Self {
        let values = row
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        Self { values }
    }

    /// Raw value under an alias.
    pub fn get(&self, alias: &str) -> Option<&Value> {
        self.values.get(alias)
    }

    /// Typed value under an alias.
    pub fn get_as<T>(&self, alias: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.values.get(alias).ok_or_else(|| Error::Type {
            expected: "aliased column",
            actual: format!("no alias '{alias}' in bundle"),
            column: Some(alias.to_string()),
        })?;
        T::try_from(value.clone())
    }

    /// Whether an alias is present.
    pub fn contains(&self, alias: &str) -> bool {
        self.values.contains_key(alias)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check for emptiness.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over (alias, value) pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_row_and_typed_access() {
        let row = Row::new(
            vec!["left_name".into(), "n".into()],
            vec![Value::Text("a".into()), Value::BigInt(3)],
        );
        let bundle = BundleMap::from_row(&row);
        assert_eq!(bundle.get_as::<String>("left_name").unwrap(), "a");
        assert_eq!(bundle.get_as::<i64>("n").unwrap(), 3);
        assert!(bundle.get_as::<i64>("missing").is_err());
        assert_eq!(bundle.len(), 2);
    }
}

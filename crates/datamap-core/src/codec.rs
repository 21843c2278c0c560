//! Custom column codecs and indexed enums.
//!
//! The original scheme of runtime codec registration is expressed here as
//! traits wired up at compile time: a field marked `#[datamap(custom)]`
//! stores through its type's `CustomColumn` impl, and implementing
//! `CustomColumn` for a collection type (e.g. `Vec<Waypoint>`) flattens
//! that collection into a single column instead of a child table.

use crate::error::{Error, Result};
use crate::value::Value;

/// A codec mapping one Rust type onto one stored column.
pub trait CustomColumn: Sized {
    /// Server-side column type (MySQL/PostgreSQL).
    const SQL_TYPE: &'static str;

    /// SQLite column type.
    const SQLITE_TYPE: &'static str;

    /// Serialize into a storable value.
    fn encode(&self) -> Value;

    /// Deserialize from the stored value.
    fn decode(value: Value) -> Result<Self>;
}

/// An enum stored as its declared integer index.
///
/// Implemented by `#[derive(IndexedEnum)]`; `from_index` scans the declared
/// variants for the matching index.
pub trait IndexedEnum: Sized + Copy + 'static {
    /// All variants in declaration order.
    const VARIANTS: &'static [Self];

    /// The declared index of this variant.
    fn index(&self) -> i64;

    /// Rebuild a variant from its stored index.
    fn from_index(index: i64) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|v| v.index() == index)
    }
}

/// Encode an indexed enum for storage.
pub fn encode_enum<T: IndexedEnum>(value: &T) -> Value {
    Value::BigInt(value.index())
}

/// Decode an indexed enum from its stored integer.
pub fn decode_enum<T: IndexedEnum>(value: Value) -> Result<T> {
    let index = value.as_i64().ok_or_else(|| Error::Type {
        expected: "indexed enum (integer)",
        actual: value.type_name().to_string(),
        column: None,
    })?;
    T::from_index(index).ok_or_else(|| Error::Type {
        expected: "declared enum index",
        actual: format!("index {index} matches no variant"),
        column: None,
    })
}

//! Core types and traits for the datamap ORM.
//!
//! This crate provides the foundational abstractions shared by every other
//! crate in the family:
//!
//! - `Value` for dynamically-typed SQL parameters and results
//! - `Row` for query results
//! - `Dialect` for backend-specific SQL rendering
//! - `EntityDescriptor` / `Entity` for record-type metadata
//! - `Executor` / `Connection` / `ConnectionFactory` for execution
//! - descriptor-driven statement emission, link cascades and child-table
//!   collection plumbing

pub mod codec;
pub mod collections;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod executor;
pub mod link;
pub mod row;
pub mod statements;
pub mod types;
pub mod value;

pub use codec::{CustomColumn, IndexedEnum};
pub use dialect::{Dialect, Placeholders, SqlEnv};
pub use entity::{
    CollectionDescriptor, CollectionKind, CollectionValue, ColumnDescriptor, Entity,
    EntityDescriptor, LinkDescriptor, MigrationStep,
};
pub use error::{Error, Result};
pub use executor::{Connection, ConnectionFactory, Executor};
pub use row::{ColumnInfo, Row};
pub use types::{ColumnType, SqlType};
pub use value::Value;

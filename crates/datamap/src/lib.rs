//! datamap: an object-relational mapper core.
//!
//! Declarative record types become durable storage on SQLite, MySQL or
//! PostgreSQL without user-authored SQL for common operations:
//!
//! ```ignore
//! use datamap::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, Entity)]
//! struct PlayerHome {
//!     #[datamap(id)]
//!     username: String,
//!     #[datamap(key)]
//!     server_name: String,
//!     world: String,
//!     x: f64,
//!     y: f64,
//!     z: f64,
//!     active: bool,
//! }
//!
//! let source = DataSource::file("homes.db");
//! let homes: DataMapper<PlayerHome> =
//!     DataMapper::open(&source, MapperConfig::default())?;
//! homes.insert(&home)?;
//! let found = homes.find_by_id("u")?;
//! ```
//!
//! Schema inference, DDL and migrations, a builder-style condition
//! language, cascade reads/writes for link fields, child-table-backed
//! collections with live accessors, thread-scoped transactions and an
//! optional two-layer cache are covered; see the module docs of the
//! sibling crates for each layer.

pub mod accessor;
mod cache;
pub mod config;
mod cursor;
mod mapper;

pub use accessor::{ListAccessor, MapAccessor, SetAccessor};
pub use cache::CacheConfig;
pub use config::{BackendKind, DataSource, DataSourceConfig};
pub use cursor::Cursor;
pub use mapper::{DataMapper, EntityQuery, MapperConfig, Page};

pub use datamap_core::{
    codec, CollectionKind, CollectionValue, ColumnType, CustomColumn, Dialect, Entity,
    EntityDescriptor, Error, IndexedEnum, Result, Row, SqlType, Value,
};
pub use datamap_macros::{Entity, IndexedEnum};
pub use datamap_pool::PoolConfig;
pub use datamap_query::{col, pre, BundleMap, Expr, Join, OrderBy, Query};

/// The common imports.
pub mod prelude {
    pub use crate::config::{BackendKind, DataSource, DataSourceConfig};
    pub use crate::{CacheConfig, DataMapper, MapperConfig, Page};
    pub use datamap_core::{CustomColumn, Entity, Error, IndexedEnum, Result, Value};
    pub use datamap_macros::{Entity, IndexedEnum};
    pub use datamap_query::{col, pre, Expr, Join, OrderBy, Query};
}

//! DDL generation and schema migration.
//!
//! On first use of an entity the mapper creates its main table, its child
//! tables and its link targets in one idempotent step, then brings the
//! table to the newest declared migration version through the `_ptc_meta`
//! registry.

pub mod ddl;
pub mod migrate;

pub use ddl::{create_children, create_entity, create_graph, create_link_targets};
pub use migrate::{ensure_meta, is_poisoned, run_migrations, stored_version, META_TABLE};

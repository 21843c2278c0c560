//! Entity metadata and the `Entity` trait.
//!
//! An `EntityDescriptor` is the frozen, process-wide description of one
//! record type: its columns, keys, link fields, collection fields and
//! migrations. It is built once (typically by `#[derive(Entity)]`) and
//! never mutated afterwards.

use crate::dialect::SqlEnv;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::row::Row;
use crate::types::{ColumnType, SqlType};
use crate::value::Value;

/// The collection shape of a child-table-backed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    List,
    Set,
    Map,
}

/// A collection field's contents in transit between an entity and its
/// child table.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionValue {
    /// Ordered elements; positions become `sort_order`.
    List(Vec<Value>),
    /// Unordered unique elements; uniqueness is enforced on write.
    Set(Vec<Value>),
    /// Key/value pairs; later keys win on write.
    Map(Vec<(String, Value)>),
}

impl CollectionValue {
    /// The kind of this value.
    pub fn kind(&self) -> CollectionKind {
        match self {
            CollectionValue::List(_) => CollectionKind::List,
            CollectionValue::Set(_) => CollectionKind::Set,
            CollectionValue::Map(_) => CollectionKind::Map,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match self {
            CollectionValue::List(v) | CollectionValue::Set(v) => v.len(),
            CollectionValue::Map(v) => v.len(),
        }
    }

    /// Check for emptiness.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata for one stored column.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    /// Rust field name (or the link field owning a foreign-key column).
    pub field_name: &'static str,
    /// Database column name.
    pub column_name: &'static str,
    /// Column type (built-in or explicit override).
    pub ty: ColumnType,
    /// `VARCHAR` length; 0 means the default.
    pub length: u32,
    /// Whether NULL is storable.
    pub nullable: bool,
    /// `#[datamap(id)]`.
    pub primary_key: bool,
    /// `#[datamap(key)]`; participates in the keyed locator.
    pub secondary_key: bool,
    /// Auto-increment column (synthetic `id` or an explicit one).
    pub auto_key: bool,
    /// Foreign-key column backing a link field.
    pub link_fk: bool,
}

impl ColumnDescriptor {
    /// Create a column descriptor with defaults.
    pub const fn new(field_name: &'static str, column_name: &'static str, ty: ColumnType) -> Self {
        Self {
            field_name,
            column_name,
            ty,
            length: 0,
            nullable: false,
            primary_key: false,
            secondary_key: false,
            auto_key: false,
            link_fk: false,
        }
    }

    /// Set the `VARCHAR` length.
    pub const fn length(mut self, value: u32) -> Self {
        self.length = value;
        self
    }

    /// Set nullability.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Mark as primary key.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Mark as secondary key.
    pub const fn secondary_key(mut self, value: bool) -> Self {
        self.secondary_key = value;
        self
    }

    /// Mark as auto-increment.
    pub const fn auto_key(mut self, value: bool) -> Self {
        self.auto_key = value;
        self
    }

    /// Mark as a link foreign-key column.
    pub const fn link_fk(mut self, value: bool) -> Self {
        self.link_fk = value;
        self
    }

    /// Only mutable columns participate in `UPDATE ... SET`; key columns
    /// are used exclusively in the locator.
    pub fn is_mutable(&self) -> bool {
        !self.primary_key && !self.secondary_key && !self.auto_key
    }
}

/// A one-to-one link to another entity, persisted through a foreign-key
/// column in the owning table.
pub struct LinkDescriptor {
    /// Rust field name holding `Option<Target>`.
    pub field_name: &'static str,
    /// Foreign-key column in the owning table.
    pub fk_column: &'static str,
    /// Descriptor accessor of the target entity.
    pub target: fn() -> &'static EntityDescriptor,
}

impl std::fmt::Debug for LinkDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkDescriptor")
            .field("field_name", &self.field_name)
            .field("fk_column", &self.fk_column)
            .finish()
    }
}

/// A child-table-backed collection field.
#[derive(Debug, Clone)]
pub struct CollectionDescriptor {
    /// Rust field name.
    pub field_name: &'static str,
    /// List / Set / Map.
    pub kind: CollectionKind,
    /// Element (or map value) column type.
    pub element: ColumnType,
    /// Element `VARCHAR` length; 0 means the default.
    pub element_length: u32,
}

impl CollectionDescriptor {
    /// Child table name: `<parent_table>_<field_name>`.
    pub fn child_table(&self, parent: &EntityDescriptor) -> String {
        format!("{}_{}", parent.table_name, self.field_name)
    }
}

/// One migration step: all statements of a version run in one transaction.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    pub version: u32,
    pub statements: Vec<String>,
}

impl MigrationStep {
    /// Create a migration step.
    pub fn new<S: Into<String>>(version: u32, statements: impl IntoIterator<Item = S>) -> Self {
        Self {
            version,
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }
}

/// Frozen metadata for one record type.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Rust type name, for diagnostics.
    pub entity_name: &'static str,
    /// Table name (snake_case of the type name unless overridden).
    pub table_name: &'static str,
    /// Explicit schema qualifier, if any.
    pub schema: Option<&'static str>,
    /// Ordered stored columns, foreign keys included, ignored fields
    /// excluded.
    pub columns: Vec<ColumnDescriptor>,
    /// Link fields in declaration order.
    pub links: Vec<LinkDescriptor>,
    /// Child-table-backed collection fields in declaration order.
    pub collections: Vec<CollectionDescriptor>,
    /// `#[datamap(ignore)]` fields, materialized with their defaults.
    pub defaulted_fields: Vec<&'static str>,
    /// Ordered migration steps declared on the type.
    pub migrations: Vec<MigrationStep>,
    /// Whether the primary key is the injected auto-increment `id`.
    pub synthetic_pk: bool,
}

impl EntityDescriptor {
    /// The primary-key column.
    pub fn primary_key(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Secondary-key columns in declaration order.
    pub fn secondary_keys(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.secondary_key)
    }

    /// The auto-increment column, if any.
    pub fn auto_key(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.auto_key)
    }

    /// Locator columns: primary key followed by secondary keys.
    pub fn locator_columns(&self) -> Vec<&ColumnDescriptor> {
        let mut out = Vec::new();
        if let Some(pk) = self.primary_key() {
            out.push(pk);
        }
        out.extend(self.secondary_keys());
        out
    }

    /// Columns participating in INSERT (everything but the auto key).
    pub fn insert_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.auto_key).collect()
    }

    /// Columns participating in `UPDATE ... SET`.
    pub fn mutable_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_mutable()).collect()
    }

    /// Look up a column by its database name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.column_name == name)
    }

    /// The qualified, quoted table name under `env`.
    pub fn qualified_table(&self, env: &SqlEnv) -> String {
        env.table(self.schema, self.table_name)
    }

    /// The qualified, quoted child table for a collection field.
    pub fn qualified_child_table(&self, coll: &CollectionDescriptor, env: &SqlEnv) -> String {
        let name = coll.child_table(self);
        env.table(self.schema, &name)
    }

    /// The effective column type of a link foreign key: the type of the
    /// target's primary key.
    pub fn link_fk_type(&self, fk_column: &str) -> Option<(ColumnType, u32)> {
        let link = self.links.iter().find(|l| l.fk_column == fk_column)?;
        let target = (link.target)();
        let pk = target.primary_key()?;
        Some((pk.ty, pk.length))
    }

    /// Validate the §3 invariants. Called once at handle construction; a
    /// descriptor that fails here refuses all operations.
    pub fn validate(&self) -> Result<()> {
        let pk_count = self.columns.iter().filter(|c| c.primary_key).count();
        if pk_count != 1 {
            return Err(Error::Schema(format!(
                "entity {} must have exactly one primary key column, found {}",
                self.entity_name, pk_count
            )));
        }
        if self
            .columns
            .iter()
            .any(|c| c.primary_key && c.secondary_key)
        {
            return Err(Error::Schema(format!(
                "entity {}: a column cannot be both primary and secondary key",
                self.entity_name
            )));
        }
        for link in &self.links {
            if self.column(link.fk_column).is_none() {
                return Err(Error::Schema(format!(
                    "entity {}: link field '{}' names unknown foreign-key column '{}'",
                    self.entity_name, link.field_name, link.fk_column
                )));
            }
        }
        let mut versions: Vec<u32> = self.migrations.iter().map(|m| m.version).collect();
        versions.sort_unstable();
        versions.dedup();
        if versions.len() != self.migrations.len() {
            return Err(Error::Schema(format!(
                "entity {}: duplicate migration versions",
                self.entity_name
            )));
        }
        Ok(())
    }
}

/// A record type storable through a `DataMapper`.
///
/// Implementations are generated by `#[derive(Entity)]`; the methods mirror
/// what the descriptor declares. Collection fields travel separately from
/// `to_row`/`from_row` because they live in child tables.
pub trait Entity: Sized + Clone + Send + Sync + 'static {
    /// The frozen metadata for this type.
    fn descriptor() -> &'static EntityDescriptor;

    /// Stored column values in descriptor order, foreign keys included
    /// (taken from the in-memory link target's primary key, NULL when the
    /// link is absent). Auto-key and child-table columns are excluded.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Rebuild an instance from a result row. `prefix` namespaces the
    /// columns when this entity arrives through a link join; the root row
    /// passes `""`. Collection fields start empty; ignored fields get
    /// their default.
    fn from_row(row: &Row, prefix: &str) -> Result<Self>;

    /// The primary-key value, `Value::Null` when unknown (synthetic key
    /// before insert).
    fn primary_key_value(&self) -> Value;

    /// Locator values: primary key plus secondary keys, in column order.
    fn locator(&self) -> Vec<(&'static str, Value)>;

    /// Depth-first persist all link targets and return the foreign-key
    /// assignments for this row.
    fn save_links(
        &self,
        env: &SqlEnv,
        ex: &mut dyn Executor,
    ) -> Result<Vec<(&'static str, Value)>>;

    /// Current contents of every child-table collection field.
    fn collections(&self) -> Vec<(&'static str, CollectionValue)>;

    /// Replace a collection field's contents after child-table hydration.
    fn set_collection(&mut self, field: &str, value: CollectionValue) -> Result<()>;
}

/// A synthetic auto-increment `id` column, injected when a type declares no
/// `#[datamap(id)]`.
pub fn synthetic_id_column() -> ColumnDescriptor {
    ColumnDescriptor::new("id", "id", ColumnType::Builtin(SqlType::BigInt))
        .primary_key(true)
        .auto_key(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player_home() -> EntityDescriptor {
        EntityDescriptor {
            entity_name: "PlayerHome",
            table_name: "player_home",
            schema: None,
            columns: vec![
                ColumnDescriptor::new("username", "username", ColumnType::Builtin(SqlType::Text))
                    .primary_key(true),
                ColumnDescriptor::new(
                    "server_name",
                    "server_name",
                    ColumnType::Builtin(SqlType::Text),
                )
                .secondary_key(true),
                ColumnDescriptor::new("world", "world", ColumnType::Builtin(SqlType::Text)),
                ColumnDescriptor::new("x", "x", ColumnType::Builtin(SqlType::Double)),
            ],
            links: vec![],
            collections: vec![],
            defaulted_fields: vec![],
            migrations: vec![],
            synthetic_pk: false,
        }
    }

    #[test]
    fn locator_is_primary_then_secondary() {
        let desc = player_home();
        let locator: Vec<_> = desc
            .locator_columns()
            .iter()
            .map(|c| c.column_name)
            .collect();
        assert_eq!(locator, vec!["username", "server_name"]);
    }

    #[test]
    fn mutable_excludes_keys() {
        let desc = player_home();
        let mutable: Vec<_> = desc
            .mutable_columns()
            .iter()
            .map(|c| c.column_name)
            .collect();
        assert_eq!(mutable, vec!["world", "x"]);
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert!(player_home().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_primary_key() {
        let mut desc = player_home();
        desc.columns[0].primary_key = false;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn validate_rejects_dangling_link_fk() {
        let mut desc = player_home();
        desc.links.push(LinkDescriptor {
            field_name: "home",
            fk_column: "missing_col",
            target: || unreachable!(),
        });
        assert!(desc.validate().is_err());
    }

    #[test]
    fn child_table_naming() {
        let desc = player_home();
        let coll = CollectionDescriptor {
            field_name: "tags",
            kind: CollectionKind::Set,
            element: ColumnType::Builtin(SqlType::Text),
            element_length: 0,
        };
        assert_eq!(coll.child_table(&desc), "player_home_tags");
    }

    #[test]
    fn synthetic_id_shape() {
        let col = synthetic_id_column();
        assert!(col.primary_key && col.auto_key);
        assert_eq!(col.column_name, "id");
    }
}

//! CREATE TABLE generation from entity descriptors.

use datamap_core::collections::parent_column;
use datamap_core::{
    CollectionDescriptor, CollectionKind, ColumnDescriptor, Dialect, EntityDescriptor, Result,
    SqlEnv,
};
use std::collections::HashSet;

fn column_ddl(desc: &EntityDescriptor, col: &ColumnDescriptor, env: &SqlEnv) -> String {
    if col.auto_key {
        return format!(
            "{} {}",
            env.quote(col.column_name),
            env.dialect.auto_increment_pk()
        );
    }
    // A link foreign key takes the type of the target's primary key.
    let (ty, length) = match desc.link_fk_type(col.column_name) {
        Some(resolved) if col.link_fk => resolved,
        _ => (col.ty, col.length),
    };
    let mut sql = format!("{} {}", env.quote(col.column_name), ty.render(env.dialect, length));
    if !col.nullable {
        sql.push_str(" NOT NULL");
    }
    sql
}

/// `CREATE TABLE IF NOT EXISTS` statements for one entity: the main table
/// followed by one child table per collection field.
///
/// When the primary key has secondary keys beside it, the key constraint is
/// the composite locator; a lone non-auto primary key gets a plain
/// `PRIMARY KEY` clause.
pub fn create_entity(desc: &EntityDescriptor, env: &SqlEnv) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    if let Some(schema) = desc.schema.map(str::to_string).or_else(|| match env.dialect {
        Dialect::Postgres => env.default_schema.clone(),
        _ => None,
    }) {
        if let Some(sql) = env.dialect.create_schema(&schema) {
            statements.push(sql);
        }
    }

    let mut parts: Vec<String> = desc
        .columns
        .iter()
        .map(|c| column_ddl(desc, c, env))
        .collect();
    let locator: Vec<&ColumnDescriptor> = desc.locator_columns();
    let auto_pk = desc.primary_key().is_some_and(|c| c.auto_key);
    if !auto_pk && !locator.is_empty() {
        let cols = locator
            .iter()
            .map(|c| env.quote(c.column_name))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("PRIMARY KEY ({cols})"));
    }
    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        desc.qualified_table(env),
        parts.join(", ")
    ));

    for coll in &desc.collections {
        statements.push(child_table_ddl(desc, coll, env)?);
    }
    Ok(statements)
}

fn child_table_ddl(
    desc: &EntityDescriptor,
    coll: &CollectionDescriptor,
    env: &SqlEnv,
) -> Result<String> {
    let pk = desc.primary_key().ok_or_else(|| {
        datamap_core::Error::Schema(format!("entity {} has no primary key", desc.entity_name))
    })?;
    let parent_col = parent_column(desc)?;
    let mut parts = vec![
        format!("{} {}", env.quote("id"), env.dialect.auto_increment_pk()),
        format!(
            "{} {} NOT NULL",
            env.quote(&parent_col),
            pk.ty.render(env.dialect, pk.length)
        ),
    ];
    let element = coll.element.render(env.dialect, coll.element_length);
    match coll.kind {
        CollectionKind::List => {
            parts.push(format!("{} {element} NOT NULL", env.quote("value")));
            parts.push(format!(
                "{} {} NOT NULL",
                env.quote("sort_order"),
                env.dialect
                    .column_type(datamap_core::SqlType::BigInt, 0)
            ));
        }
        CollectionKind::Set => {
            parts.push(format!("{} {element} NOT NULL", env.quote("value")));
        }
        CollectionKind::Map => {
            parts.push(format!(
                "{} {} NOT NULL",
                env.quote("map_key"),
                env.dialect.column_type(datamap_core::SqlType::Text, 0)
            ));
            parts.push(format!("{} {element} NOT NULL", env.quote("map_value")));
        }
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        desc.qualified_child_table(coll, env),
        parts.join(", ")
    ))
}

/// Child-table DDL only, for use beside a manual main-table override.
pub fn create_children(desc: &EntityDescriptor, env: &SqlEnv) -> Result<Vec<String>> {
    desc.collections
        .iter()
        .map(|coll| child_table_ddl(desc, coll, env))
        .collect()
}

/// DDL for the link targets of an entity (not the entity itself).
pub fn create_link_targets(desc: &EntityDescriptor, env: &SqlEnv) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    seen.insert(desc.table_name);
    let mut statements = Vec::new();
    for link in &desc.links {
        collect((link.target)(), env, &mut seen, &mut statements)?;
    }
    Ok(statements)
}

/// DDL for an entity and all its link targets, depth-first, each table
/// once.
pub fn create_graph(desc: &EntityDescriptor, env: &SqlEnv) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut statements = Vec::new();
    collect(desc, env, &mut seen, &mut statements)?;
    Ok(statements)
}

fn collect(
    desc: &EntityDescriptor,
    env: &SqlEnv,
    seen: &mut HashSet<&'static str>,
    statements: &mut Vec<String>,
) -> Result<()> {
    if !seen.insert(desc.table_name) {
        return Ok(());
    }
    // Targets first so foreign keys point at existing tables.
    for link in &desc.links {
        collect((link.target)(), env, seen, statements)?;
    }
    statements.extend(create_entity(desc, env)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamap_core::{ColumnType, SqlType};

    fn desc() -> EntityDescriptor {
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
                ColumnDescriptor::new("active", "active", ColumnType::Builtin(SqlType::Bool)),
            ],
            links: vec![],
            collections: vec![CollectionDescriptor {
                field_name: "tags",
                kind: CollectionKind::Set,
                element: ColumnType::Builtin(SqlType::Text),
                element_length: 0,
            }],
            defaulted_fields: vec![],
            migrations: vec![],
            synthetic_pk: false,
        }
    }

    #[test]
    fn main_table_uses_composite_locator_key() {
        let stmts = create_entity(&desc(), &SqlEnv::new(Dialect::Sqlite)).unwrap();
        assert_eq!(
            stmts[0],
            "CREATE TABLE IF NOT EXISTS `player_home` (`username` TEXT NOT NULL, \
             `server_name` TEXT NOT NULL, `active` INTEGER NOT NULL, \
             PRIMARY KEY (`username`, `server_name`))"
        );
    }

    #[test]
    fn child_table_shape() {
        let stmts = create_entity(&desc(), &SqlEnv::new(Dialect::Sqlite)).unwrap();
        assert_eq!(
            stmts[1],
            "CREATE TABLE IF NOT EXISTS `player_home_tags` (\
             `id` INTEGER PRIMARY KEY AUTOINCREMENT, \
             `parent_username` TEXT NOT NULL, `value` TEXT NOT NULL)"
        );
    }

    #[test]
    fn postgres_schema_statement_comes_first() {
        let env = SqlEnv::with_schema(Dialect::Postgres, "app");
        let stmts = create_entity(&desc(), &env).unwrap();
        assert_eq!(stmts[0], "CREATE SCHEMA IF NOT EXISTS \"app\"");
        assert!(stmts[1].starts_with("CREATE TABLE IF NOT EXISTS \"app\".\"player_home\""));
    }

    #[test]
    fn mysql_types_in_ddl() {
        let stmts = create_entity(&desc(), &SqlEnv::new(Dialect::Mysql)).unwrap();
        assert!(stmts[0].contains("`username` VARCHAR(64) NOT NULL"));
        assert!(stmts[0].contains("`active` TINYINT(1) NOT NULL"));
    }
}

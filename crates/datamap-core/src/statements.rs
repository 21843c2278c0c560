//! Descriptor-driven statement emission.
//!
//! The fixed SQL shapes of the mapper (INSERT, UPDATE-by-locator, keyed
//! DELETE, existence probes, upserts) are generated here so that the link
//! cascade and the mapper share one source of truth. Predicate-driven
//! shapes live in `datamap-query`.

use crate::dialect::{Placeholders, SqlEnv};
use crate::entity::EntityDescriptor;

/// An INSERT over all non-auto columns.
///
/// Returns the SQL and the column order values must be bound in.
pub fn insert(desc: &EntityDescriptor, env: &SqlEnv) -> (String, Vec<&'static str>) {
    insert_many(desc, env, 1)
}

/// A multi-row INSERT with `rows` VALUES tuples.
pub fn insert_many(
    desc: &EntityDescriptor,
    env: &SqlEnv,
    rows: usize,
) -> (String, Vec<&'static str>) {
    let cols = desc.insert_columns();
    let col_list = cols
        .iter()
        .map(|c| env.quote(c.column_name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut ph = Placeholders::new(env.dialect);
    let tuples = (0..rows)
        .map(|_| {
            let inner = cols.iter().map(|_| ph.next()).collect::<Vec<_>>().join(", ");
            format!("({inner})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({col_list}) VALUES {tuples}",
        desc.qualified_table(env)
    );
    (sql, cols.iter().map(|c| c.column_name).collect())
}

/// An INSERT that yields the generated key.
///
/// PostgreSQL gets a `RETURNING` clause; the other backends report the key
/// through the driver after a plain INSERT.
pub fn insert_returning(desc: &EntityDescriptor, env: &SqlEnv) -> (String, Vec<&'static str>) {
    let (mut sql, cols) = insert_many(desc, env, 1);
    if env.dialect == crate::dialect::Dialect::Postgres {
        if let Some(pk) = desc.primary_key() {
            sql.push_str(&format!(" RETURNING {}", env.quote(pk.column_name)));
        }
    }
    (sql, cols)
}

/// A multi-row INSERT returning all generated keys where the backend can.
pub fn insert_many_returning(
    desc: &EntityDescriptor,
    env: &SqlEnv,
    rows: usize,
) -> (String, Vec<&'static str>) {
    let (mut sql, cols) = insert_many(desc, env, rows);
    if env.dialect == crate::dialect::Dialect::Postgres {
        if let Some(pk) = desc.primary_key() {
            sql.push_str(&format!(" RETURNING {}", env.quote(pk.column_name)));
        }
    }
    (sql, cols)
}

/// An upsert keyed on the locator columns, overwriting mutable columns.
pub fn upsert(desc: &EntityDescriptor, env: &SqlEnv) -> (String, Vec<&'static str>) {
    let (mut sql, cols) = insert_many(desc, env, 1);
    let conflict: Vec<&str> = desc
        .locator_columns()
        .iter()
        .map(|c| c.column_name)
        .collect();
    let update: Vec<&str> = desc
        .mutable_columns()
        .iter()
        .map(|c| c.column_name)
        .collect();
    sql.push_str(&env.dialect.upsert_clause(&conflict, &update));
    (sql, cols)
}

/// An UPDATE of all mutable columns, located by primary + secondary keys.
///
/// Returns the SQL, the SET column order, then the WHERE column order.
pub fn update_by_locator(
    desc: &EntityDescriptor,
    env: &SqlEnv,
) -> (String, Vec<&'static str>, Vec<&'static str>) {
    let set_cols = desc.mutable_columns();
    let where_cols = desc.locator_columns();
    let mut ph = Placeholders::new(env.dialect);
    let set_list = set_cols
        .iter()
        .map(|c| format!("{} = {}", env.quote(c.column_name), ph.next()))
        .collect::<Vec<_>>()
        .join(", ");
    let where_list = where_cols
        .iter()
        .map(|c| format!("{} = {}", env.quote(c.column_name), ph.next()))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "UPDATE {} SET {set_list} WHERE {where_list}",
        desc.qualified_table(env)
    );
    (
        sql,
        set_cols.iter().map(|c| c.column_name).collect(),
        where_cols.iter().map(|c| c.column_name).collect(),
    )
}

/// A DELETE located by the given columns (equality, AND-combined).
pub fn delete_by(desc: &EntityDescriptor, env: &SqlEnv, columns: &[&str]) -> String {
    let mut ph = Placeholders::new(env.dialect);
    let where_list = columns
        .iter()
        .map(|c| format!("{} = {}", env.quote(c), ph.next()))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "DELETE FROM {} WHERE {where_list}",
        desc.qualified_table(env)
    )
}

/// The existence probe used before cascade writes: one parameter, the
/// primary key.
pub fn exists_by_pk(desc: &EntityDescriptor, env: &SqlEnv) -> Option<String> {
    let pk = desc.primary_key()?;
    let mut ph = Placeholders::new(env.dialect);
    Some(format!(
        "SELECT COUNT(1) FROM {} WHERE {} = {} LIMIT 1",
        desc.qualified_table(env),
        env.quote(pk.column_name),
        ph.next()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::entity::ColumnDescriptor;
    use crate::types::{ColumnType, SqlType};

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
                ColumnDescriptor::new("world", "world", ColumnType::Builtin(SqlType::Text)),
            ],
            links: vec![],
            collections: vec![],
            defaulted_fields: vec![],
            migrations: vec![],
            synthetic_pk: false,
        }
    }

    #[test]
    fn insert_shape_sqlite() {
        let (sql, cols) = insert(&desc(), &SqlEnv::new(Dialect::Sqlite));
        assert_eq!(
            sql,
            "INSERT INTO `player_home` (`username`, `server_name`, `world`) VALUES (?, ?, ?)"
        );
        assert_eq!(cols, vec!["username", "server_name", "world"]);
    }

    #[test]
    fn insert_shape_postgres_numbers_placeholders() {
        let (sql, _) = insert_many(&desc(), &SqlEnv::new(Dialect::Postgres), 2);
        assert_eq!(
            sql,
            "INSERT INTO \"player_home\" (\"username\", \"server_name\", \"world\") \
             VALUES ($1, $2, $3), ($4, $5, $6)"
        );
    }

    #[test]
    fn insert_returning_only_on_postgres() {
        let (pg, _) = insert_returning(&desc(), &SqlEnv::new(Dialect::Postgres));
        assert!(pg.ends_with("RETURNING \"username\""));
        let (sqlite, _) = insert_returning(&desc(), &SqlEnv::new(Dialect::Sqlite));
        assert!(!sqlite.contains("RETURNING"));
    }

    #[test]
    fn update_sets_mutable_and_locates_by_keys() {
        let (sql, set_cols, where_cols) =
            update_by_locator(&desc(), &SqlEnv::new(Dialect::Sqlite));
        assert_eq!(
            sql,
            "UPDATE `player_home` SET `world` = ? WHERE `username` = ? AND `server_name` = ?"
        );
        assert_eq!(set_cols, vec!["world"]);
        assert_eq!(where_cols, vec!["username", "server_name"]);
    }

    #[test]
    fn upsert_uses_locator_conflict_target() {
        let (sql, _) = upsert(&desc(), &SqlEnv::new(Dialect::Sqlite));
        assert!(sql.contains("ON CONFLICT (`username`, `server_name`) DO UPDATE SET"));
        let (sql, _) = upsert(&desc(), &SqlEnv::new(Dialect::Mysql));
        assert!(sql.contains("ON DUPLICATE KEY UPDATE"));
    }

    #[test]
    fn exists_probe_shape() {
        let sql = exists_by_pk(&desc(), &SqlEnv::new(Dialect::Postgres)).unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(1) FROM \"player_home\" WHERE \"username\" = $1 LIMIT 1"
        );
    }
}

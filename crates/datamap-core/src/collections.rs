//! Child-table plumbing for collection fields.
//!
//! Every `List`/`Set`/`Map` field without a flattening codec lives in a
//! child table `<parent_table>_<field>` keyed by `parent_<pk_column>`.
//! This module owns the statement shapes: replace-on-write, batched
//! rehydration and cascade delete. The live accessor views in the façade
//! crate reuse the same tables.

use std::collections::HashMap;

use crate::dialect::{Placeholders, SqlEnv};
use crate::entity::{CollectionDescriptor, CollectionKind, CollectionValue, EntityDescriptor};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::value::Value;

/// The foreign-key column of a child table: `parent_<pk_column>`.
pub fn parent_column(desc: &EntityDescriptor) -> Result<String> {
    let pk = desc
        .primary_key()
        .ok_or_else(|| Error::Schema(format!("entity {} has no primary key", desc.entity_name)))?;
    Ok(format!("parent_{}", pk.column_name))
}

fn in_list(ph: &mut Placeholders, count: usize) -> String {
    (0..count).map(|_| ph.next()).collect::<Vec<_>>().join(", ")
}

/// Replace all child rows of one parent with the given contents.
///
/// The parent's `update` contract is wholesale replacement: existing rows
/// are deleted, then the new contents inserted. Set values are de-duplicated
/// and map keys collapse to their last occurrence before writing.
pub fn write_collections(
    desc: &EntityDescriptor,
    parent_pk: &Value,
    values: &[(&'static str, CollectionValue)],
    env: &SqlEnv,
    ex: &mut dyn Executor,
) -> Result<()> {
    let parent_col = parent_column(desc)?;
    for coll in &desc.collections {
        let table = desc.qualified_child_table(coll, env);
        let mut ph = Placeholders::new(env.dialect);
        let delete = format!(
            "DELETE FROM {table} WHERE {} = {}",
            env.quote(&parent_col),
            ph.next()
        );
        ex.execute(&delete, std::slice::from_ref(parent_pk))?;

        let Some((_, value)) = values.iter().find(|(f, _)| *f == coll.field_name) else {
            continue;
        };
        insert_rows(coll, &table, &parent_col, parent_pk, value, env, ex)?;
    }
    Ok(())
}

fn insert_rows(
    coll: &CollectionDescriptor,
    table: &str,
    parent_col: &str,
    parent_pk: &Value,
    value: &CollectionValue,
    env: &SqlEnv,
    ex: &mut dyn Executor,
) -> Result<()> {
    match (coll.kind, value) {
        (CollectionKind::List, CollectionValue::List(items)) => {
            let mut ph = Placeholders::new(env.dialect);
            let sql = format!(
                "INSERT INTO {table} ({}, {}, {}) VALUES ({}, {}, {})",
                env.quote(parent_col),
                env.quote("value"),
                env.quote("sort_order"),
                ph.next(),
                ph.next(),
                ph.next()
            );
            for (i, item) in items.iter().enumerate() {
                ex.execute(
                    &sql,
                    &[parent_pk.clone(), item.clone(), Value::BigInt(i as i64)],
                )?;
            }
        }
        (CollectionKind::Set, CollectionValue::Set(items)) => {
            let mut ph = Placeholders::new(env.dialect);
            let sql = format!(
                "INSERT INTO {table} ({}, {}) VALUES ({}, {})",
                env.quote(parent_col),
                env.quote("value"),
                ph.next(),
                ph.next()
            );
            let mut seen: Vec<&Value> = Vec::new();
            for item in items {
                if seen.contains(&item) {
                    continue;
                }
                seen.push(item);
                ex.execute(&sql, &[parent_pk.clone(), item.clone()])?;
            }
        }
        (CollectionKind::Map, CollectionValue::Map(pairs)) => {
            let mut ph = Placeholders::new(env.dialect);
            let sql = format!(
                "INSERT INTO {table} ({}, {}, {}) VALUES ({}, {}, {})",
                env.quote(parent_col),
                env.quote("map_key"),
                env.quote("map_value"),
                ph.next(),
                ph.next(),
                ph.next()
            );
            let mut collapsed: Vec<(&String, &Value)> = Vec::new();
            for (key, value) in pairs {
                collapsed.retain(|(k, _)| *k != key);
                collapsed.push((key, value));
            }
            for (key, value) in collapsed {
                ex.execute(
                    &sql,
                    &[
                        parent_pk.clone(),
                        Value::Text(key.clone()),
                        value.clone(),
                    ],
                )?;
            }
        }
        (kind, value) => {
            return Err(Error::Schema(format!(
                "collection field '{}' declared {kind:?} but carried {:?}",
                coll.field_name,
                value.kind()
            )));
        }
    }
    Ok(())
}

/// Delete all child rows for the given parents.
pub fn delete_collections(
    desc: &EntityDescriptor,
    parent_pks: &[Value],
    env: &SqlEnv,
    ex: &mut dyn Executor,
) -> Result<()> {
    if parent_pks.is_empty() {
        return Ok(());
    }
    let parent_col = parent_column(desc)?;
    for coll in &desc.collections {
        let table = desc.qualified_child_table(coll, env);
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "DELETE FROM {table} WHERE {} IN ({})",
            env.quote(&parent_col),
            in_list(&mut ph, parent_pks.len())
        );
        ex.execute(&sql, parent_pks)?;
    }
    Ok(())
}

/// Load all collection contents for a set of parents in one round-trip per
/// child table.
///
/// The result maps each parent's `Value::lookup_key` to its per-field
/// contents; parents without child rows get empty collections.
pub fn load_collections(
    desc: &EntityDescriptor,
    parent_pks: &[Value],
    env: &SqlEnv,
    ex: &mut dyn Executor,
) -> Result<HashMap<String, Vec<(&'static str, CollectionValue)>>> {
    let mut out: HashMap<String, Vec<(&'static str, CollectionValue)>> = HashMap::new();
    if parent_pks.is_empty() || desc.collections.is_empty() {
        return Ok(out);
    }
    let parent_col = parent_column(desc)?;
    for pk in parent_pks {
        let entry = out.entry(pk.lookup_key()).or_default();
        for coll in &desc.collections {
            entry.push((coll.field_name, empty_value(coll.kind)));
        }
    }
    for (coll_idx, coll) in desc.collections.iter().enumerate() {
        let table = desc.qualified_child_table(coll, env);
        let mut ph = Placeholders::new(env.dialect);
        let in_clause = in_list(&mut ph, parent_pks.len());
        let sql = match coll.kind {
            CollectionKind::List => format!(
                "SELECT {p}, {v}, {s} FROM {table} WHERE {p} IN ({in_clause}) ORDER BY {s}",
                p = env.quote(&parent_col),
                v = env.quote("value"),
                s = env.quote("sort_order"),
            ),
            CollectionKind::Set => format!(
                "SELECT {p}, {v} FROM {table} WHERE {p} IN ({in_clause}) ORDER BY {id}",
                p = env.quote(&parent_col),
                v = env.quote("value"),
                id = env.quote("id"),
            ),
            CollectionKind::Map => format!(
                "SELECT {p}, {k}, {v} FROM {table} WHERE {p} IN ({in_clause}) ORDER BY {id}",
                p = env.quote(&parent_col),
                k = env.quote("map_key"),
                v = env.quote("map_value"),
                id = env.quote("id"),
            ),
        };
        for row in ex.query(&sql, parent_pks)? {
            let parent = row
                .get(0)
                .ok_or_else(|| Error::query("child row missing parent key"))?
                .lookup_key();
            let Some(fields) = out.get_mut(&parent) else {
                continue;
            };
            let slot = &mut fields[coll_idx].1;
            match (coll.kind, slot) {
                (CollectionKind::List, CollectionValue::List(items))
                | (CollectionKind::Set, CollectionValue::Set(items)) => {
                    items.push(
                        row.get(1)
                            .cloned()
                            .ok_or_else(|| Error::query("child row missing value"))?,
                    );
                }
                (CollectionKind::Map, CollectionValue::Map(pairs)) => {
                    let key: String = row.get_named("map_key")?;
                    let value = row
                        .get(2)
                        .cloned()
                        .ok_or_else(|| Error::query("child row missing map_value"))?;
                    pairs.push((key, value));
                }
                _ => unreachable!("slot kind matches descriptor kind"),
            }
        }
    }
    Ok(out)
}

fn empty_value(kind: CollectionKind) -> CollectionValue {
    match kind {
        CollectionKind::List => CollectionValue::List(Vec::new()),
        CollectionKind::Set => CollectionValue::Set(Vec::new()),
        CollectionKind::Map => CollectionValue::Map(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ColumnDescriptor;
    use crate::types::{ColumnType, SqlType};

    #[test]
    fn parent_column_follows_pk_name() {
        let desc = EntityDescriptor {
            entity_name: "Profile",
            table_name: "profile",
            schema: None,
            columns: vec![ColumnDescriptor::new(
                "uuid",
                "uuid",
                ColumnType::Builtin(SqlType::Text),
            )
            .primary_key(true)],
            links: vec![],
            collections: vec![],
            defaulted_fields: vec![],
            migrations: vec![],
            synthetic_pk: false,
        };
        assert_eq!(parent_column(&desc).unwrap(), "parent_uuid");
    }
}

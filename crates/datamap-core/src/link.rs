//! Link cascades.
//!
//! Link fields hold another entity, persisted through a foreign-key column
//! in the owning table. Writes cascade depth-first so downstream keys
//! resolve before the owning row; reads project the whole graph through
//! `LEFT JOIN`s with namespaced column aliases.

use crate::collections::write_collections;
use crate::dialect::SqlEnv;
use crate::entity::{Entity, EntityDescriptor};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::statements;
use crate::value::Value;

/// Persist one entity and its link graph, returning the primary-key value
/// of the written row.
///
/// Depth-first: link targets persist before the owning row so foreign keys
/// resolve. The target is inserted when its primary key is not yet present
/// in its table, updated otherwise. Child-table collections of the target
/// are replaced along the way.
pub fn persist_graph<E: Entity>(
    entity: &E,
    env: &SqlEnv,
    ex: &mut dyn Executor,
) -> Result<Value> {
    let desc = E::descriptor();
    let fk_values = entity.save_links(env, ex)?;
    let mut row = entity.to_row();
    apply_fk_overrides(&mut row, &fk_values);

    let pk = entity.primary_key_value();
    let exists = if pk.is_null() {
        false
    } else {
        let probe = statements::exists_by_pk(desc, env).ok_or_else(|| {
            Error::Schema(format!("entity {} has no primary key", desc.entity_name))
        })?;
        let row = ex.query_one(&probe, std::slice::from_ref(&pk))?;
        row.and_then(|r| r.get(0).and_then(Value::as_i64)).unwrap_or(0) > 0
    };

    let written_pk = if exists {
        let (sql, set_cols, where_cols) = statements::update_by_locator(desc, env);
        let mut params = Vec::with_capacity(set_cols.len() + where_cols.len());
        for col in &set_cols {
            params.push(row_value(&row, col));
        }
        let locator = entity.locator();
        for col in &where_cols {
            params.push(
                locator
                    .iter()
                    .find(|(c, _)| c == col)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null),
            );
        }
        ex.execute(&sql, &params)?;
        pk
    } else if pk.is_null() && desc.auto_key().is_some() {
        let (sql, cols) = statements::insert_returning(desc, env);
        let params: Vec<Value> = cols.iter().map(|c| row_value(&row, c)).collect();
        Value::BigInt(ex.insert_returning_key(&sql, &params)?)
    } else {
        let (sql, cols) = statements::insert(desc, env);
        let params: Vec<Value> = cols.iter().map(|c| row_value(&row, c)).collect();
        ex.execute(&sql, &params)?;
        pk
    };

    if !desc.collections.is_empty() && !written_pk.is_null() {
        write_collections(desc, &written_pk, &entity.collections(), env, ex)?;
    }
    Ok(written_pk)
}

/// Overwrite foreign-key slots of a `to_row` output with cascade results.
pub fn apply_fk_overrides(row: &mut [(&'static str, Value)], overrides: &[(&'static str, Value)]) {
    for (col, value) in overrides {
        if let Some(slot) = row.iter_mut().find(|(c, _)| c == col) {
            slot.1 = value.clone();
        }
    }
}

fn row_value(row: &[(&'static str, Value)], col: &str) -> Value {
    row.iter()
        .find(|(c, _)| *c == col)
        .map(|(_, v)| v.clone())
        .unwrap_or(Value::Null)
}

/// The read-side join plan for an entity's link graph.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    /// Alias of the root table in the FROM clause.
    pub root_alias: String,
    /// Select-list items, root columns first, link columns namespaced.
    pub select_items: Vec<String>,
    /// `LEFT JOIN` fragments in traversal order.
    pub joins: Vec<String>,
}

impl JoinPlan {
    /// The full select list, comma-joined.
    pub fn select_list(&self) -> String {
        self.select_items.join(", ")
    }

    /// The join fragments, space-joined (empty string when there are none).
    pub fn join_clause(&self) -> String {
        if self.joins.is_empty() {
            String::new()
        } else {
            format!(" {}", self.joins.join(" "))
        }
    }
}

/// Build the recursive `LEFT JOIN` plan for `desc`.
///
/// Every link gets a fresh alias `__t0, __t1, ...` in depth-first traversal
/// order; selected link columns are renamed `__link__<fk>__<col>` with
/// prefixes concatenated per nesting level. A link whose target is already
/// on the current path (a cycle) is not followed further; such a field
/// hydrates as absent.
pub fn join_plan(desc: &EntityDescriptor, env: &SqlEnv) -> JoinPlan {
    let root_alias = desc.table_name.to_string();
    let mut plan = JoinPlan {
        root_alias: root_alias.clone(),
        select_items: Vec::new(),
        joins: Vec::new(),
    };
    for col in &desc.columns {
        plan.select_items.push(format!(
            "{}.{} AS {}",
            env.quote(&root_alias),
            env.quote(col.column_name),
            env.quote(col.column_name)
        ));
    }
    let mut counter = 0usize;
    let mut path = vec![desc.table_name];
    descend(desc, &root_alias, "", env, &mut counter, &mut path, &mut plan);
    plan
}

fn descend(
    desc: &EntityDescriptor,
    parent_alias: &str,
    prefix: &str,
    env: &SqlEnv,
    counter: &mut usize,
    path: &mut Vec<&'static str>,
    plan: &mut JoinPlan,
) {
    for link in &desc.links {
        let target = (link.target)();
        if path.contains(&target.table_name) {
            tracing::warn!(
                entity = desc.entity_name,
                field = link.field_name,
                "link cycle detected, not joining deeper"
            );
            continue;
        }
        let Some(target_pk) = target.primary_key() else {
            continue;
        };
        let alias = format!("__t{counter}");
        *counter += 1;
        let child_prefix = format!("{prefix}__link__{}__", link.fk_column);
        plan.joins.push(format!(
            "LEFT JOIN {} AS {} ON {}.{} = {}.{}",
            target.qualified_table(env),
            env.quote(&alias),
            env.quote(parent_alias),
            env.quote(link.fk_column),
            env.quote(&alias),
            env.quote(target_pk.column_name)
        ));
        for col in &target.columns {
            plan.select_items.push(format!(
                "{}.{} AS {}",
                env.quote(&alias),
                env.quote(col.column_name),
                env.quote(&format!("{child_prefix}{}", col.column_name))
            ));
        }
        path.push(target.table_name);
        descend(target, &alias, &child_prefix, env, counter, path, plan);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::entity::{ColumnDescriptor, LinkDescriptor};
    use crate::types::{ColumnType, SqlType};
    use std::sync::OnceLock;

    fn location_desc() -> &'static EntityDescriptor {
        static DESC: OnceLock<EntityDescriptor> = OnceLock::new();
        DESC.get_or_init(|| EntityDescriptor {
            entity_name: "Location",
            table_name: "location",
            schema: None,
            columns: vec![
                ColumnDescriptor::new("id", "id", ColumnType::Builtin(SqlType::BigInt))
                    .primary_key(true),
                ColumnDescriptor::new("world", "world", ColumnType::Builtin(SqlType::Text)),
            ],
            links: vec![],
            collections: vec![],
            defaulted_fields: vec![],
            migrations: vec![],
            synthetic_pk: false,
        })
    }

    fn home_desc() -> EntityDescriptor {
        EntityDescriptor {
            entity_name: "Home",
            table_name: "home",
            schema: None,
            columns: vec![
                ColumnDescriptor::new("name", "name", ColumnType::Builtin(SqlType::Text))
                    .primary_key(true),
                ColumnDescriptor::new("spot", "location_id", ColumnType::Builtin(SqlType::BigInt))
                    .nullable(true)
                    .link_fk(true),
            ],
            links: vec![LinkDescriptor {
                field_name: "spot",
                fk_column: "location_id",
                target: location_desc,
            }],
            collections: vec![],
            defaulted_fields: vec![],
            migrations: vec![],
            synthetic_pk: false,
        }
    }

    #[test]
    fn plan_aliases_and_namespaces() {
        let env = SqlEnv::new(Dialect::Sqlite);
        let plan = join_plan(&home_desc(), &env);
        assert_eq!(
            plan.joins,
            vec!["LEFT JOIN `location` AS `__t0` ON `home`.`location_id` = `__t0`.`id`"]
        );
        assert!(plan
            .select_items
            .contains(&"`__t0`.`world` AS `__link__location_id__world`".to_string()));
        assert!(plan
            .select_items
            .contains(&"`home`.`name` AS `name`".to_string()));
    }

    #[test]
    fn fk_overrides_replace_slots() {
        let mut row = vec![("a", Value::Null), ("loc", Value::Null)];
        apply_fk_overrides(&mut row, &[("loc", Value::BigInt(7))]);
        assert_eq!(row[1].1, Value::BigInt(7));
        assert_eq!(row[0].1, Value::Null);
    }
}

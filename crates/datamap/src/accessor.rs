//! Live accessor views over child tables.
//!
//! An accessor addresses the collection field of one parent row. Every
//! read issues a `SELECT`, every mutation a direct `INSERT`/`UPDATE`/
//! `DELETE`, immediately visible to subsequent standard reads (and to the
//! transaction of the calling thread, which accessor operations join like
//! any other operation).

use crate::mapper::DataMapper;
use datamap_core::collections::parent_column;
use datamap_core::{
    CollectionDescriptor, Connection, Entity, Placeholders, Result, SqlEnv, Value,
};
use datamap_pool::tx;

struct AccessorBase<E: Entity> {
    mapper: DataMapper<E>,
    parent_pk: Value,
    table: String,
    parent_col: String,
}

impl<E: Entity> AccessorBase<E> {
    fn new(mapper: DataMapper<E>, parent_pk: Value, coll: &CollectionDescriptor) -> Result<Self> {
        let desc = E::descriptor();
        let env = mapper.env();
        let table = desc.qualified_child_table(coll, env);
        let parent_col = parent_column(desc)?;
        Ok(Self {
            mapper,
            parent_pk,
            table,
            parent_col,
        })
    }

    fn env(&self) -> &SqlEnv {
        self.mapper.env()
    }

    fn exec<R>(&self, f: impl FnOnce(&mut dyn Connection) -> Result<R>) -> Result<R> {
        tx::with_connection(&self.mapper.inner.pool, f)
    }

    fn invalidate(&self) {
        if let Some(cache) = &self.mapper.inner.cache {
            cache.on_single_write(&self.parent_pk);
        }
    }

    fn scalar(&self, sql: &str, params: &[Value]) -> Result<Option<Value>> {
        self.exec(|conn| Ok(conn.query_one(sql, params)?.and_then(|r| r.get(0).cloned())))
    }

    fn count(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self
            .scalar(sql, params)?
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as u64)
    }
}

/// Live view over a `Map` collection field.
pub struct MapAccessor<E: Entity> {
    base: AccessorBase<E>,
}

impl<E: Entity> MapAccessor<E> {
    pub(crate) fn new(
        mapper: DataMapper<E>,
        parent_pk: Value,
        coll: &CollectionDescriptor,
    ) -> Result<Self> {
        Ok(Self {
            base: AccessorBase::new(mapper, parent_pk, coll)?,
        })
    }

    /// The value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {} AND {} = {}",
            env.quote("map_value"),
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("map_key"),
            ph.next()
        );
        self.base
            .scalar(&sql, &[self.base.parent_pk.clone(), Value::Text(key.into())])
    }

    /// Store `value` under `key`, replacing any existing entry.
    pub fn put(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let env = self.base.env().clone();
        let value = value.into();
        let mut ph = Placeholders::new(env.dialect);
        let update = format!(
            "UPDATE {} SET {} = {} WHERE {} = {} AND {} = {}",
            self.base.table,
            env.quote("map_value"),
            ph.next(),
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("map_key"),
            ph.next()
        );
        let mut ph = Placeholders::new(env.dialect);
        let insert = format!(
            "INSERT INTO {} ({}, {}, {}) VALUES ({}, {}, {})",
            self.base.table,
            env.quote(&self.base.parent_col),
            env.quote("map_key"),
            env.quote("map_value"),
            ph.next(),
            ph.next(),
            ph.next()
        );
        let parent = self.base.parent_pk.clone();
        self.base.exec(|conn| {
            let affected = conn.execute(
                &update,
                &[value.clone(), parent.clone(), Value::Text(key.into())],
            )?;
            if affected == 0 {
                conn.execute(
                    &insert,
                    &[parent.clone(), Value::Text(key.into()), value.clone()],
                )?;
            }
            Ok(())
        })?;
        self.base.invalidate();
        Ok(())
    }

    /// Remove the entry under `key`; reports whether one existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("map_key"),
            ph.next()
        );
        let affected = self.base.exec(|conn| {
            conn.execute(&sql, &[self.base.parent_pk.clone(), Value::Text(key.into())])
        })?;
        self.base.invalidate();
        Ok(affected > 0)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Number of entries.
    pub fn len(&self) -> Result<u64> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "SELECT COUNT(1) FROM {} WHERE {} = {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next()
        );
        self.base.count(&sql, std::slice::from_ref(&self.base.parent_pk))
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All keys, in insertion order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {} ORDER BY {}",
            env.quote("map_key"),
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("id")
        );
        let rows = self
            .base
            .exec(|conn| conn.query(&sql, std::slice::from_ref(&self.base.parent_pk)))?;
        rows.iter().map(|r| r.get_named("map_key")).collect()
    }

    /// Delete every entry.
    pub fn clear(&self) -> Result<()> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next()
        );
        self.base
            .exec(|conn| conn.execute(&sql, std::slice::from_ref(&self.base.parent_pk)))?;
        self.base.invalidate();
        Ok(())
    }
}

/// Live view over a `List` collection field.
pub struct ListAccessor<E: Entity> {
    base: AccessorBase<E>,
}

impl<E: Entity> ListAccessor<E> {
    pub(crate) fn new(
        mapper: DataMapper<E>,
        parent_pk: Value,
        coll: &CollectionDescriptor,
    ) -> Result<Self> {
        Ok(Self {
            base: AccessorBase::new(mapper, parent_pk, coll)?,
        })
    }

    /// Number of elements.
    pub fn len(&self) -> Result<u64> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "SELECT COUNT(1) FROM {} WHERE {} = {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next()
        );
        self.base.count(&sql, std::slice::from_ref(&self.base.parent_pk))
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The element at `index`.
    pub fn get(&self, index: u64) -> Result<Option<Value>> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {} AND {} = {}",
            env.quote("value"),
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("sort_order"),
            ph.next()
        );
        self.base.scalar(
            &sql,
            &[self.base.parent_pk.clone(), Value::BigInt(index as i64)],
        )
    }

    /// Append to the end.
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let next = self.len()?;
        self.insert_at_end(next, value.into())
    }

    fn insert_at_end(&self, index: u64, value: Value) -> Result<()> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}) VALUES ({}, {}, {})",
            self.base.table,
            env.quote(&self.base.parent_col),
            env.quote("value"),
            env.quote("sort_order"),
            ph.next(),
            ph.next(),
            ph.next()
        );
        self.base.exec(|conn| {
            conn.execute(
                &sql,
                &[
                    self.base.parent_pk.clone(),
                    value.clone(),
                    Value::BigInt(index as i64),
                ],
            )
        })?;
        self.base.invalidate();
        Ok(())
    }

    /// Insert at `index`, shifting everything at or above it up by one.
    pub fn insert(&self, index: u64, value: impl Into<Value>) -> Result<()> {
        let env = self.base.env().clone();
        let value = value.into();
        let mut ph = Placeholders::new(env.dialect);
        let shift = format!(
            "UPDATE {} SET {so} = {so} + 1 WHERE {} = {} AND {so} >= {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            ph.next(),
            so = env.quote("sort_order"),
        );
        let mut ph = Placeholders::new(env.dialect);
        let insert = format!(
            "INSERT INTO {} ({}, {}, {}) VALUES ({}, {}, {})",
            self.base.table,
            env.quote(&self.base.parent_col),
            env.quote("value"),
            env.quote("sort_order"),
            ph.next(),
            ph.next(),
            ph.next()
        );
        let parent = self.base.parent_pk.clone();
        self.base.exec(|conn| {
            conn.execute(&shift, &[parent.clone(), Value::BigInt(index as i64)])?;
            conn.execute(
                &insert,
                &[parent.clone(), value.clone(), Value::BigInt(index as i64)],
            )?;
            Ok(())
        })?;
        self.base.invalidate();
        Ok(())
    }

    /// Remove the element at `index`, shifting everything above it down.
    pub fn remove(&self, index: u64) -> Result<bool> {
        let env = self.base.env().clone();
        let mut ph = Placeholders::new(env.dialect);
        let delete = format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("sort_order"),
            ph.next()
        );
        let mut ph = Placeholders::new(env.dialect);
        let shift = format!(
            "UPDATE {} SET {so} = {so} - 1 WHERE {} = {} AND {so} > {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            ph.next(),
            so = env.quote("sort_order"),
        );
        let parent = self.base.parent_pk.clone();
        let removed = self.base.exec(|conn| {
            let affected =
                conn.execute(&delete, &[parent.clone(), Value::BigInt(index as i64)])?;
            if affected > 0 {
                conn.execute(&shift, &[parent.clone(), Value::BigInt(index as i64)])?;
            }
            Ok(affected > 0)
        })?;
        self.base.invalidate();
        Ok(removed)
    }

    /// Overwrite the element at `index`.
    pub fn set(&self, index: u64, value: impl Into<Value>) -> Result<bool> {
        let env = self.base.env();
        let value = value.into();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "UPDATE {} SET {} = {} WHERE {} = {} AND {} = {}",
            self.base.table,
            env.quote("value"),
            ph.next(),
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("sort_order"),
            ph.next()
        );
        let affected = self.base.exec(|conn| {
            conn.execute(
                &sql,
                &[
                    value.clone(),
                    self.base.parent_pk.clone(),
                    Value::BigInt(index as i64),
                ],
            )
        })?;
        self.base.invalidate();
        Ok(affected > 0)
    }

    /// The whole list in order.
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {} ORDER BY {}",
            env.quote("value"),
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("sort_order")
        );
        let rows = self
            .base
            .exec(|conn| conn.query(&sql, std::slice::from_ref(&self.base.parent_pk)))?;
        Ok(rows.iter().filter_map(|r| r.get(0).cloned()).collect())
    }
}

/// Live view over a `Set` collection field.
pub struct SetAccessor<E: Entity> {
    base: AccessorBase<E>,
}

impl<E: Entity> SetAccessor<E> {
    pub(crate) fn new(
        mapper: DataMapper<E>,
        parent_pk: Value,
        coll: &CollectionDescriptor,
    ) -> Result<Self> {
        Ok(Self {
            base: AccessorBase::new(mapper, parent_pk, coll)?,
        })
    }

    /// Whether `value` is in the set.
    pub fn contains(&self, value: impl Into<Value>) -> Result<bool> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "SELECT COUNT(1) FROM {} WHERE {} = {} AND {} = {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("value"),
            ph.next()
        );
        Ok(self
            .base
            .count(&sql, &[self.base.parent_pk.clone(), value.into()])?
            > 0)
    }

    /// Add `value`; a no-op when already present. Reports whether the set
    /// changed.
    pub fn add(&self, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        if self.contains(value.clone())? {
            return Ok(false);
        }
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            self.base.table,
            env.quote(&self.base.parent_col),
            env.quote("value"),
            ph.next(),
            ph.next()
        );
        self.base
            .exec(|conn| conn.execute(&sql, &[self.base.parent_pk.clone(), value.clone()]))?;
        self.base.invalidate();
        Ok(true)
    }

    /// Remove `value`; reports whether it was present.
    pub fn remove(&self, value: impl Into<Value>) -> Result<bool> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("value"),
            ph.next()
        );
        let affected = self
            .base
            .exec(|conn| conn.execute(&sql, &[self.base.parent_pk.clone(), value.into()]))?;
        self.base.invalidate();
        Ok(affected > 0)
    }

    /// Number of elements.
    pub fn len(&self) -> Result<u64> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "SELECT COUNT(1) FROM {} WHERE {} = {}",
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next()
        );
        self.base.count(&sql, std::slice::from_ref(&self.base.parent_pk))
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All elements in insertion order.
    pub fn to_vec(&self) -> Result<Vec<Value>> {
        let env = self.base.env();
        let mut ph = Placeholders::new(env.dialect);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {} ORDER BY {}",
            env.quote("value"),
            self.base.table,
            env.quote(&self.base.parent_col),
            ph.next(),
            env.quote("id")
        );
        let rows = self
            .base
            .exec(|conn| conn.query(&sql, std::slice::from_ref(&self.base.parent_pk)))?;
        Ok(rows.iter().filter_map(|r| r.get(0).cloned()).collect())
    }
}

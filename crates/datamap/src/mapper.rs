//! The `DataMapper` handle.
//!
//! One handle per record type. Opening a handle bootstraps storage exactly
//! once per process (tables, child tables, link targets, migrations); the
//! operations then plan SQL through the query layer, execute through the
//! pool (joining any open transaction on the calling thread), and keep the
//! optional cache layer honest.

use crate::accessor::{ListAccessor, MapAccessor, SetAccessor};
use crate::cache::{fingerprint, CacheConfig, CacheLayer};
use crate::config::DataSource;
use crate::cursor::Cursor;
use datamap_core::{
    collections, link, statements, CollectionKind, Connection, Entity, Error, Executor, Result,
    Row, SqlEnv, Value,
};
use datamap_pool::{tx, Pool, PoolConfig};
use datamap_query::{BundleMap, Expr, OrderBy, Query};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// Per-handle configuration.
#[derive(Debug, Clone)]
pub struct MapperConfig {
    /// Enable the two-layer cache.
    pub cache: Option<CacheConfig>,
    /// Verbatim DDL replacing the generated main-table statement.
    pub manual_ddl: Option<Vec<String>>,
    /// Migration steps beside the ones declared on the type.
    pub migrations: Vec<(u32, Vec<String>)>,
    /// Rows fetched per cursor round-trip.
    pub cursor_batch_size: usize,
    /// Directory that relative SQLite paths resolve against.
    pub data_dir: PathBuf,
    /// Pool settings for this source (first open wins).
    pub pool: PoolConfig,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            cache: None,
            manual_ddl: None,
            migrations: Vec::new(),
            cursor_batch_size: 256,
            data_dir: PathBuf::from("data"),
            pool: PoolConfig::default(),
        }
    }
}

impl MapperConfig {
    /// Enable caching with the given settings.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Replace the generated main-table DDL.
    pub fn manual_ddl<S: Into<String>>(mut self, ddl: impl IntoIterator<Item = S>) -> Self {
        self.manual_ddl = Some(ddl.into_iter().map(Into::into).collect());
        self
    }

    /// Add a migration step.
    pub fn migration<S: Into<String>>(
        mut self,
        version: u32,
        statements: impl IntoIterator<Item = S>,
    ) -> Self {
        self.migrations
            .push((version, statements.into_iter().map(Into::into).collect()));
        self
    }

    /// Set the cursor batch size.
    pub fn cursor_batch_size(mut self, size: usize) -> Self {
        self.cursor_batch_size = size.max(1);
        self
    }

    /// Set the data directory for relative SQLite paths.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}

/// One page of results with the total row count.
#[derive(Debug, Clone)]
pub struct Page<E> {
    pub items: Vec<E>,
    pub total: u64,
    /// 1-based page number.
    pub page: u64,
    pub size: u64,
}

impl<E> Page<E> {
    /// Whether pages exist beyond this one.
    pub fn has_next(&self) -> bool {
        self.page * self.size < self.total
    }
}

pub(crate) struct MapperInner<E: Entity> {
    pub(crate) pool: Arc<Pool>,
    pub(crate) env: SqlEnv,
    pub(crate) cache: Option<CacheLayer<E>>,
    pub(crate) cursor_batch: usize,
    pub(crate) poison_key: String,
}

/// The per-entity handle: CRUD, batches, keyed and rowid access, counting,
/// sorting, paging, cursors, raw SQL, joins and transactions.
pub struct DataMapper<E: Entity> {
    pub(crate) inner: Arc<MapperInner<E>>,
}

impl<E: Entity> Clone for DataMapper<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> std::fmt::Debug for DataMapper<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMapper").finish_non_exhaustive()
    }
}

fn bootstrapped() -> &'static Mutex<HashSet<String>> {
    static DONE: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    DONE.get_or_init(|| Mutex::new(HashSet::new()))
}

impl<E: Entity> DataMapper<E> {
    /// Open the handle for `E` on a data source.
    ///
    /// The first open of an entity on a source creates its tables and runs
    /// pending migrations; configuration or DDL failures are fatal here and
    /// the handle is not produced.
    pub fn open(source: &DataSource, config: MapperConfig) -> Result<Self> {
        let desc = E::descriptor();
        desc.validate()?;
        let pool = source.pool(config.pool.clone(), &config.data_dir)?;
        let env = SqlEnv {
            dialect: pool.dialect(),
            default_schema: source.default_schema(),
        };
        let poison_key = format!("{}/{}", pool.name(), desc.table_name);
        if datamap_schema::is_poisoned(&poison_key) {
            return Err(Error::Poisoned(desc.table_name.to_string()));
        }

        {
            let mut done = bootstrapped().lock().unwrap_or_else(|e| e.into_inner());
            if !done.contains(&poison_key) {
                let mut conn = pool.acquire()?;
                Self::bootstrap(&env, &mut *conn, &config, &poison_key)?;
                done.insert(poison_key.clone());
            }
        }

        Ok(Self {
            inner: Arc::new(MapperInner {
                pool,
                env,
                cache: config.cache.as_ref().map(CacheLayer::new),
                cursor_batch: config.cursor_batch_size,
                poison_key,
            }),
        })
    }

    fn bootstrap(
        env: &SqlEnv,
        conn: &mut dyn Connection,
        config: &MapperConfig,
        poison_key: &str,
    ) -> Result<()> {
        let desc = E::descriptor();
        let mut ddl = Vec::new();
        if let Some(manual) = &config.manual_ddl {
            ddl.extend(manual.iter().cloned());
            ddl.extend(datamap_schema::create_children(desc, env)?);
            ddl.extend(datamap_schema::create_link_targets(desc, env)?);
        } else {
            ddl.extend(datamap_schema::create_graph(desc, env)?);
        }
        for sql in &ddl {
            tracing::debug!(sql, "bootstrap ddl");
            conn.execute(sql, &[])?;
        }

        datamap_schema::ensure_meta(env, conn)?;
        let mut steps: Vec<(u32, Vec<String>)> = desc
            .migrations
            .iter()
            .map(|m| (m.version, m.statements.clone()))
            .collect();
        steps.extend(config.migrations.iter().cloned());
        datamap_schema::run_migrations(env, conn, desc.table_name, poison_key, &steps)
    }

    fn guard(&self) -> Result<()> {
        if datamap_schema::is_poisoned(&self.inner.poison_key) {
            return Err(Error::Poisoned(E::descriptor().table_name.to_string()));
        }
        Ok(())
    }

    pub(crate) fn env(&self) -> &SqlEnv {
        &self.inner.env
    }

    fn exec<R>(&self, f: impl FnOnce(&mut dyn Connection) -> Result<R>) -> Result<R> {
        tx::with_connection(&self.inner.pool, f)
    }

    // ------------------------------------------------------------------
    // Read plumbing
    // ------------------------------------------------------------------

    fn base_select(&self) -> (link::JoinPlan, String) {
        let desc = E::descriptor();
        let env = self.env();
        let plan = link::join_plan(desc, env);
        let from = format!(
            "{} AS {}",
            desc.qualified_table(env),
            env.quote(&plan.root_alias)
        );
        (plan, from)
    }

    /// The root-alias-qualified name of a column, for unambiguous WHERE
    /// clauses beside link joins.
    fn root_col(&self, column: &str) -> String {
        let env = self.env();
        format!(
            "{}.{}",
            env.quote(E::descriptor().table_name),
            env.quote(column)
        )
    }

    pub(crate) fn hydrate(&self, conn: &mut dyn Connection, rows: Vec<Row>) -> Result<Vec<E>> {
        let desc = E::descriptor();
        let env = self.env();
        let mut entities: Vec<E> = rows
            .iter()
            .map(|row| E::from_row(row, ""))
            .collect::<Result<_>>()?;
        if desc.collections.is_empty() || entities.is_empty() {
            return Ok(entities);
        }
        let pk_col = desc
            .primary_key()
            .map(|c| c.column_name)
            .ok_or_else(|| Error::Schema(format!("{} has no primary key", desc.entity_name)))?;
        let mut pks = Vec::new();
        let mut seen = HashSet::new();
        for row in &rows {
            if let Some(pk) = row.get_by_name(pk_col) {
                if !pk.is_null() && seen.insert(pk.lookup_key()) {
                    pks.push(pk.clone());
                }
            }
        }
        let ex: &mut dyn Executor = conn;
        let loaded = collections::load_collections(desc, &pks, env, ex)?;
        for (entity, row) in entities.iter_mut().zip(rows.iter()) {
            let Some(pk) = row.get_by_name(pk_col) else {
                continue;
            };
            if let Some(fields) = loaded.get(&pk.lookup_key()) {
                for (field, value) in fields {
                    entity.set_collection(field, value.clone())?;
                }
            }
        }
        Ok(entities)
    }

    pub(crate) fn fetch_sql(
        &self,
        where_clause: Option<&str>,
        order: Option<&str>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        let (plan, from) = self.base_select();
        let mut sql = format!("SELECT {} FROM {from}{}", plan.select_list(), plan.join_clause());
        if let Some(clause) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        if let Some(order) = order {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        sql.push_str(&self.env().dialect.limit_offset(limit, offset));
        sql
    }

    fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<E>> {
        self.exec(|conn| {
            let rows = conn.query(sql, params)?;
            self.hydrate(conn, rows)
        })
    }

    /// Entity-list read through the query cache (when enabled and outside
    /// a transaction, where uncommitted state must stay private).
    fn cached_fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<E>> {
        let in_tx = tx::in_transaction(&self.inner.pool);
        if let (Some(cache), false) = (&self.inner.cache, in_tx) {
            let key = fingerprint(sql, params, "entity");
            if let Some(hit) = cache.get_query(key) {
                return Ok(hit);
            }
            let fresh = self.fetch(sql, params)?;
            cache.put_query(key, fresh.clone());
            return Ok(fresh);
        }
        self.fetch(sql, params)
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Persist all columns of `entity`, cascading link targets first and
    /// writing child-table rows for collection fields.
    pub fn insert(&self, entity: &E) -> Result<()> {
        self.guard()?;
        self.insert_inner(entity)?;
        if let Some(cache) = &self.inner.cache {
            cache.on_insert();
        }
        Ok(())
    }

    fn insert_inner(&self, entity: &E) -> Result<i64> {
        let desc = E::descriptor();
        let env = self.env().clone();
        self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            let fk = entity.save_links(&env, ex)?;
            let mut row = entity.to_row();
            link::apply_fk_overrides(&mut row, &fk);

            let mut pk = entity.primary_key_value();
            let key = if desc.auto_key().is_some() && pk.is_null() {
                let (sql, cols) = statements::insert_returning(desc, &env);
                let params = ordered_params(&row, &cols);
                let key = ex.insert_returning_key(&sql, &params)?;
                pk = Value::BigInt(key);
                key
            } else {
                let (sql, cols) = statements::insert(desc, &env);
                let params = ordered_params(&row, &cols);
                ex.execute(&sql, &params)?;
                pk.as_i64().unwrap_or(0)
            };
            if !desc.collections.is_empty() && !pk.is_null() {
                collections::write_collections(desc, &pk, &entity.collections(), &env, ex)?;
            }
            Ok(key)
        })
    }

    /// Insert and return the backend-generated primary key.
    pub fn insert_and_get_key(&self, entity: &E) -> Result<i64> {
        self.guard()?;
        let key = self.insert_inner(entity)?;
        if let Some(cache) = &self.inner.cache {
            cache.on_insert();
        }
        Ok(key)
    }

    /// Single row by primary key, link targets hydrated recursively.
    pub fn find_by_id(&self, pk: impl Into<Value>) -> Result<Option<E>> {
        self.guard()?;
        let pk = pk.into();
        if let Some(cache) = &self.inner.cache {
            if !tx::in_transaction(&self.inner.pool) {
                if let Some(hit) = cache.get_bean(&pk.lookup_key()) {
                    return Ok(Some(hit));
                }
            }
        }
        let desc = E::descriptor();
        let pk_col = desc
            .primary_key()
            .map(|c| c.column_name)
            .ok_or_else(|| Error::Schema(format!("{} has no primary key", desc.entity_name)))?;
        let clause = format!(
            "{} = {}",
            self.root_col(pk_col),
            self.env().dialect.placeholder(1)
        );
        let sql = self.fetch_sql(Some(&clause), None, Some(1), None);
        let found = self.fetch(&sql, std::slice::from_ref(&pk))?.into_iter().next();
        if let (Some(cache), Some(entity)) = (&self.inner.cache, &found) {
            if !tx::in_transaction(&self.inner.pool) {
                cache.put_bean(pk.lookup_key(), entity.clone());
            }
        }
        Ok(found)
    }

    /// Every row sharing a primary-key value (descriptors with secondary
    /// keys may hold several).
    pub fn find_all_by_id(&self, pk: impl Into<Value>) -> Result<Vec<E>> {
        self.guard()?;
        let pk = pk.into();
        let desc = E::descriptor();
        let pk_col = desc
            .primary_key()
            .map(|c| c.column_name)
            .ok_or_else(|| Error::Schema(format!("{} has no primary key", desc.entity_name)))?;
        let clause = format!(
            "{} = {}",
            self.root_col(pk_col),
            self.env().dialect.placeholder(1)
        );
        let sql = self.fetch_sql(Some(&clause), None, None, None);
        self.cached_fetch(&sql, std::slice::from_ref(&pk))
    }

    /// Full scan.
    pub fn find_all(&self) -> Result<Vec<E>> {
        self.guard()?;
        let sql = self.fetch_sql(None, None, None, None);
        self.cached_fetch(&sql, &[])
    }

    /// Predicate-filtered scan.
    pub fn find_where(&self, pred: Expr) -> Result<Vec<E>> {
        self.guard()?;
        let mut params = Vec::new();
        let clause = pred.render(self.env(), &mut params);
        let sql = self.fetch_sql(Some(&clause), None, None, None);
        self.cached_fetch(&sql, &params)
    }

    /// Locate by primary key (+ secondary keys), set only mutable columns,
    /// cascade-update links, replace child-table rows wholesale.
    pub fn update(&self, entity: &E) -> Result<u64> {
        self.guard()?;
        let desc = E::descriptor();
        let env = self.env().clone();
        let affected = self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            let fk = entity.save_links(&env, ex)?;
            let mut row = entity.to_row();
            link::apply_fk_overrides(&mut row, &fk);

            let (sql, set_cols, where_cols) = statements::update_by_locator(desc, &env);
            let mut params = ordered_params(&row, &set_cols);
            let locator = entity.locator();
            for col in &where_cols {
                params.push(lookup(&locator, col));
            }
            let affected = ex.execute(&sql, &params)?;

            let pk = entity.primary_key_value();
            if !desc.collections.is_empty() && !pk.is_null() {
                collections::write_collections(desc, &pk, &entity.collections(), &env, ex)?;
            }
            Ok(affected)
        })?;
        if let Some(cache) = &self.inner.cache {
            cache.on_single_write(&entity.primary_key_value());
        }
        Ok(affected)
    }

    /// `SELECT COUNT(1) .. LIMIT 1` existence probe by primary key.
    pub fn exists(&self, pk: impl Into<Value>) -> Result<bool> {
        self.guard()?;
        let desc = E::descriptor();
        let env = self.env();
        let sql = statements::exists_by_pk(desc, env)
            .ok_or_else(|| Error::Schema(format!("{} has no primary key", desc.entity_name)))?;
        let pk = pk.into();
        self.exec(|conn| {
            Ok(conn
                .query_one(&sql, std::slice::from_ref(&pk))?
                .and_then(|r| r.get(0).and_then(Value::as_i64))
                .unwrap_or(0)
                > 0)
        })
    }

    /// Predicate existence probe.
    pub fn exists_where(&self, pred: Expr) -> Result<bool> {
        Ok(self.count_where(pred)? > 0)
    }

    /// Delete one row by primary key; child rows cascade. Missing rows are
    /// a no-op.
    pub fn delete_by_id(&self, pk: impl Into<Value>) -> Result<u64> {
        self.guard()?;
        let desc = E::descriptor();
        let env = self.env().clone();
        let pk = pk.into();
        let affected = self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            collections::delete_collections(desc, std::slice::from_ref(&pk), &env, ex)?;
            let pk_col = desc
                .primary_key()
                .map(|c| c.column_name)
                .ok_or_else(|| Error::Schema(format!("{} has no primary key", desc.entity_name)))?;
            let sql = statements::delete_by(desc, &env, &[pk_col]);
            ex.execute(&sql, std::slice::from_ref(&pk))
        })?;
        if let Some(cache) = &self.inner.cache {
            cache.on_single_write(&pk);
        }
        Ok(affected)
    }

    /// Predicate-scoped delete; child rows of affected parents cascade.
    pub fn delete_where(&self, pred: Expr) -> Result<u64> {
        self.guard()?;
        let desc = E::descriptor();
        let env = self.env().clone();
        let affected = self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            let pk_col = desc
                .primary_key()
                .map(|c| c.column_name)
                .ok_or_else(|| Error::Schema(format!("{} has no primary key", desc.entity_name)))?;
            if !desc.collections.is_empty() {
                let mut params = Vec::new();
                let clause = pred.render(&env, &mut params);
                let sql = format!(
                    "SELECT {} FROM {} WHERE {clause}",
                    env.quote(pk_col),
                    desc.qualified_table(&env)
                );
                let pks: Vec<Value> = ex
                    .query(&sql, &params)?
                    .into_iter()
                    .filter_map(|row| row.get(0).cloned())
                    .collect();
                collections::delete_collections(desc, &pks, &env, ex)?;
            }
            let mut params = Vec::new();
            let clause = pred.render(&env, &mut params);
            let sql = format!("DELETE FROM {} WHERE {clause}", desc.qualified_table(&env));
            ex.execute(&sql, &params)
        })?;
        if let Some(cache) = &self.inner.cache {
            cache.on_bulk_write();
        }
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Keyed locator
    // ------------------------------------------------------------------

    fn locator_clause(&self, probe: &E) -> (String, Vec<Value>) {
        let env = self.env();
        let mut params = Vec::new();
        let clause = probe
            .locator()
            .iter()
            .map(|(col, value)| {
                params.push(value.clone());
                format!(
                    "{} = {}",
                    self.root_col(col),
                    env.dialect.placeholder(params.len())
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        (clause, params)
    }

    /// Find by the `(primary key, secondary keys)` values of `probe`; all
    /// other fields are ignored.
    pub fn find_by_key(&self, probe: &E) -> Result<Option<E>> {
        self.guard()?;
        let (clause, params) = self.locator_clause(probe);
        let sql = self.fetch_sql(Some(&clause), None, Some(1), None);
        Ok(self.fetch(&sql, &params)?.into_iter().next())
    }

    /// Keyed existence probe.
    pub fn exists_by_key(&self, probe: &E) -> Result<bool> {
        self.guard()?;
        let desc = E::descriptor();
        let env = self.env();
        let mut params = Vec::new();
        let clause = probe
            .locator()
            .iter()
            .map(|(col, value)| {
                params.push(value.clone());
                format!("{} = {}", env.quote(col), env.dialect.placeholder(params.len()))
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT COUNT(1) FROM {} WHERE {clause} LIMIT 1",
            desc.qualified_table(env)
        );
        self.exec(|conn| {
            Ok(conn
                .query_one(&sql, &params)?
                .and_then(|r| r.get(0).and_then(Value::as_i64))
                .unwrap_or(0)
                > 0)
        })
    }

    /// Delete exactly the row matching `probe`'s keys; other rows sharing
    /// the primary key stay, and child rows only cascade once the last
    /// row of that primary key is gone.
    pub fn delete_by_key(&self, probe: &E) -> Result<u64> {
        self.guard()?;
        let desc = E::descriptor();
        let env = self.env().clone();
        let pk = probe.primary_key_value();
        let affected = self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            let locator_cols: Vec<&str> =
                probe.locator().iter().map(|(col, _)| *col).collect();
            let sql = statements::delete_by(desc, &env, &locator_cols);
            let params: Vec<Value> =
                probe.locator().iter().map(|(_, v)| v.clone()).collect();
            let affected = ex.execute(&sql, &params)?;

            if affected > 0 && !desc.collections.is_empty() && !pk.is_null() {
                let probe_sql = statements::exists_by_pk(desc, &env).ok_or_else(|| {
                    Error::Schema(format!("{} has no primary key", desc.entity_name))
                })?;
                let remaining = ex
                    .query_one(&probe_sql, std::slice::from_ref(&pk))?
                    .and_then(|r| r.get(0).and_then(Value::as_i64))
                    .unwrap_or(0);
                if remaining == 0 {
                    collections::delete_collections(desc, std::slice::from_ref(&pk), &env, ex)?;
                }
            }
            Ok(affected)
        })?;
        if let Some(cache) = &self.inner.cache {
            cache.on_single_write(&pk);
        }
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Rowid access
    // ------------------------------------------------------------------

    fn rowid_column(&self) -> Result<&'static str> {
        E::descriptor()
            .auto_key()
            .map(|c| c.column_name)
            .ok_or_else(|| {
                Error::Schema(format!(
                    "{} has no auto-increment column for rowid access",
                    E::descriptor().entity_name
                ))
            })
    }

    /// Find by the synthetic or explicit auto-increment column.
    pub fn find_by_rowid(&self, rowid: i64) -> Result<Option<E>> {
        self.guard()?;
        let col = self.rowid_column()?;
        let clause = format!(
            "{} = {}",
            self.root_col(col),
            self.env().dialect.placeholder(1)
        );
        let sql = self.fetch_sql(Some(&clause), None, Some(1), None);
        Ok(self
            .fetch(&sql, &[Value::BigInt(rowid)])?
            .into_iter()
            .next())
    }

    /// Delete by the auto-increment column; child rows cascade.
    pub fn delete_by_rowid(&self, rowid: i64) -> Result<u64> {
        self.guard()?;
        let desc = E::descriptor();
        let env = self.env().clone();
        let col = self.rowid_column()?;
        let affected = self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            if !desc.collections.is_empty() {
                let pk_col = desc.primary_key().map(|c| c.column_name).unwrap_or(col);
                let mut ph = datamap_core::Placeholders::new(env.dialect);
                let sql = format!(
                    "SELECT {} FROM {} WHERE {} = {}",
                    env.quote(pk_col),
                    desc.qualified_table(&env),
                    env.quote(col),
                    ph.next()
                );
                let pks: Vec<Value> = ex
                    .query(&sql, &[Value::BigInt(rowid)])?
                    .into_iter()
                    .filter_map(|row| row.get(0).cloned())
                    .collect();
                collections::delete_collections(desc, &pks, &env, ex)?;
            }
            let sql = statements::delete_by(desc, &env, &[col]);
            ex.execute(&sql, &[Value::BigInt(rowid)])
        })?;
        if let Some(cache) = &self.inner.cache {
            cache.on_bulk_write();
        }
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Batch
    // ------------------------------------------------------------------

    /// Insert many rows in one statement.
    ///
    /// Returns the generated keys where the backend reports them:
    /// PostgreSQL and MySQL return all, SQLite returns only the last
    /// (a documented backend limit; do not depend on the cardinality).
    pub fn insert_batch(&self, entities: &[E]) -> Result<Vec<i64>> {
        self.guard()?;
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let desc = E::descriptor();
        let env = self.env().clone();
        let keys = self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            let mut all_params = Vec::new();
            let mut rows = Vec::with_capacity(entities.len());
            for entity in entities {
                let fk = entity.save_links(&env, ex)?;
                let mut row = entity.to_row();
                link::apply_fk_overrides(&mut row, &fk);
                rows.push(row);
            }
            let auto = desc.auto_key().is_some();
            let (sql, cols) = if auto {
                statements::insert_many_returning(desc, &env, entities.len())
            } else {
                statements::insert_many(desc, &env, entities.len())
            };
            for row in &rows {
                all_params.extend(ordered_params(row, &cols));
            }

            let keys = if auto {
                match env.dialect {
                    datamap_core::Dialect::Postgres => ex
                        .query(&sql, &all_params)?
                        .into_iter()
                        .filter_map(|row| row.get(0).and_then(Value::as_i64))
                        .collect(),
                    datamap_core::Dialect::Mysql => {
                        // MySQL reports the first key of a multi-row insert.
                        let first = ex.insert_returning_key(&sql, &all_params)?;
                        (first..first + entities.len() as i64).collect()
                    }
                    datamap_core::Dialect::Sqlite => {
                        let last = ex.insert_returning_key(&sql, &all_params)?;
                        tracing::warn!(
                            table = desc.table_name,
                            "sqlite reports only the last generated key of a batch"
                        );
                        vec![last]
                    }
                }
            } else {
                ex.execute(&sql, &all_params)?;
                Vec::new()
            };

            if !desc.collections.is_empty() {
                for entity in entities {
                    let pk = entity.primary_key_value();
                    if !pk.is_null() {
                        collections::write_collections(
                            desc,
                            &pk,
                            &entity.collections(),
                            &env,
                            ex,
                        )?;
                    }
                }
            }
            Ok(keys)
        })?;
        if let Some(cache) = &self.inner.cache {
            cache.on_insert();
        }
        Ok(keys)
    }

    /// Update many rows through one prepared shape.
    pub fn update_batch(&self, entities: &[E]) -> Result<u64> {
        self.guard()?;
        let desc = E::descriptor();
        let env = self.env().clone();
        let affected = self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            let (sql, set_cols, where_cols) = statements::update_by_locator(desc, &env);
            let mut total = 0u64;
            for entity in entities {
                let fk = entity.save_links(&env, ex)?;
                let mut row = entity.to_row();
                link::apply_fk_overrides(&mut row, &fk);
                let mut params = ordered_params(&row, &set_cols);
                let locator = entity.locator();
                for col in &where_cols {
                    params.push(lookup(&locator, col));
                }
                total += ex.execute(&sql, &params)?;
                let pk = entity.primary_key_value();
                if !desc.collections.is_empty() && !pk.is_null() {
                    collections::write_collections(desc, &pk, &entity.collections(), &env, ex)?;
                }
            }
            Ok(total)
        })?;
        if let Some(cache) = &self.inner.cache {
            cache.on_bulk_write();
        }
        Ok(affected)
    }

    /// Fetch all rows whose primary key is in `pks` (order not
    /// guaranteed).
    pub fn find_by_ids<I, T>(&self, pks: I) -> Result<Vec<E>>
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        self.guard()?;
        let pks: Vec<Value> = pks.into_iter().map(Into::into).collect();
        if pks.is_empty() {
            return Ok(Vec::new());
        }
        let desc = E::descriptor();
        let pk_col = desc
            .primary_key()
            .map(|c| c.column_name)
            .ok_or_else(|| Error::Schema(format!("{} has no primary key", desc.entity_name)))?;
        let env = self.env();
        let placeholders = (1..=pks.len())
            .map(|i| env.dialect.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        let clause = format!("{} IN ({placeholders})", self.root_col(pk_col));
        let sql = self.fetch_sql(Some(&clause), None, None, None);
        self.cached_fetch(&sql, &pks)
    }

    /// Delete all rows whose primary key is in `pks`; child rows cascade.
    pub fn delete_by_ids<I, T>(&self, pks: I) -> Result<u64>
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        self.guard()?;
        let pks: Vec<Value> = pks.into_iter().map(Into::into).collect();
        if pks.is_empty() {
            return Ok(0);
        }
        let desc = E::descriptor();
        let env = self.env().clone();
        let affected = self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            collections::delete_collections(desc, &pks, &env, ex)?;
            let pk_col = desc
                .primary_key()
                .map(|c| c.column_name)
                .ok_or_else(|| Error::Schema(format!("{} has no primary key", desc.entity_name)))?;
            let placeholders = (1..=pks.len())
                .map(|i| env.dialect.placeholder(i))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({placeholders})",
                desc.qualified_table(&env),
                env.quote(pk_col)
            );
            ex.execute(&sql, &pks)
        })?;
        if let Some(cache) = &self.inner.cache {
            cache.on_bulk_write();
        }
        Ok(affected)
    }

    /// Insert-or-update many rows through the dialect's upsert shape,
    /// keyed on the locator columns.
    pub fn upsert_batch(&self, entities: &[E]) -> Result<()> {
        self.guard()?;
        let desc = E::descriptor();
        let env = self.env().clone();
        self.exec(|conn| {
            let ex: &mut dyn Executor = conn;
            let (sql, cols) = statements::upsert(desc, &env);
            for entity in entities {
                let fk = entity.save_links(&env, ex)?;
                let mut row = entity.to_row();
                link::apply_fk_overrides(&mut row, &fk);
                ex.execute(&sql, &ordered_params(&row, &cols))?;
                let pk = entity.primary_key_value();
                if !desc.collections.is_empty() && !pk.is_null() {
                    collections::write_collections(desc, &pk, &entity.collections(), &env, ex)?;
                }
            }
            Ok(())
        })?;
        if let Some(cache) = &self.inner.cache {
            cache.on_bulk_write();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Count / sort / page / cursor
    // ------------------------------------------------------------------

    /// Total row count.
    pub fn count(&self) -> Result<u64> {
        self.guard()?;
        let sql = format!(
            "SELECT COUNT(1) FROM {}",
            E::descriptor().qualified_table(self.env())
        );
        self.count_query(&sql, &[])
    }

    /// Predicate-filtered row count.
    pub fn count_where(&self, pred: Expr) -> Result<u64> {
        self.guard()?;
        let env = self.env();
        let mut params = Vec::new();
        let clause = pred.render(env, &mut params);
        let sql = format!(
            "SELECT COUNT(1) FROM {} WHERE {clause}",
            E::descriptor().qualified_table(env)
        );
        self.count_query(&sql, &params)
    }

    fn count_query(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.exec(|conn| {
            Ok(conn
                .query_one(sql, params)?
                .and_then(|r| r.get(0).and_then(Value::as_i64))
                .unwrap_or(0) as u64)
        })
    }

    /// `ORDER BY column ASC LIMIT n`. Tie order is the backend's.
    pub fn sort(&self, column: &str, n: u64) -> Result<Vec<E>> {
        self.guard()?;
        let order = OrderBy::asc(self.root_col_raw(column)).render(self.env());
        let sql = self.fetch_sql(None, Some(&order), Some(n), None);
        self.cached_fetch(&sql, &[])
    }

    /// `ORDER BY column DESC LIMIT n`.
    pub fn sort_descending(&self, column: &str, n: u64) -> Result<Vec<E>> {
        self.guard()?;
        let order = OrderBy::desc(self.root_col_raw(column)).render(self.env());
        let sql = self.fetch_sql(None, Some(&order), Some(n), None);
        self.cached_fetch(&sql, &[])
    }

    fn root_col_raw(&self, column: &str) -> String {
        format!("{}.{column}", E::descriptor().table_name)
    }

    /// 1-based page of the full scan; a page past the end is empty with
    /// `total` still reflecting the full count.
    pub fn find_page(&self, page: u64, size: u64) -> Result<Page<E>> {
        self.guard()?;
        let page = page.max(1);
        let total = self.count()?;
        let sql = self.fetch_sql(None, None, Some(size), Some((page - 1) * size));
        let items = self.cached_fetch(&sql, &[])?;
        Ok(Page {
            items,
            total,
            page,
            size,
        })
    }

    /// 1-based page ordered by `column` ascending.
    pub fn sort_page(&self, column: &str, page: u64, size: u64) -> Result<Page<E>> {
        self.guard()?;
        let page = page.max(1);
        let total = self.count()?;
        let order = OrderBy::asc(self.root_col_raw(column)).render(self.env());
        let sql = self.fetch_sql(None, Some(&order), Some(size), Some((page - 1) * size));
        let items = self.cached_fetch(&sql, &[])?;
        Ok(Page {
            items,
            total,
            page,
            size,
        })
    }

    /// A cursor over the table ordered by `column`, fetching in batches
    /// over the calling thread's transaction connection.
    ///
    /// Fails with [`Error::CursorWithoutTransaction`] outside
    /// `transaction { .. }`.
    pub fn sort_cursor(&self, column: &str) -> Result<Cursor<E>> {
        self.guard()?;
        let handle =
            tx::current(&self.inner.pool).ok_or(Error::CursorWithoutTransaction)?;
        Ok(Cursor::new(
            self.clone(),
            handle,
            column.to_string(),
            self.inner.cursor_batch,
        ))
    }

    /// Scoped cursor access with guaranteed release on all exit paths.
    pub fn with_cursor<R>(
        &self,
        column: &str,
        f: impl FnOnce(&mut Cursor<E>) -> Result<R>,
    ) -> Result<R> {
        let mut cursor = self.sort_cursor(column)?;
        let outcome = f(&mut cursor);
        cursor.close();
        outcome
    }

    // ------------------------------------------------------------------
    // Custom SQL and joins
    // ------------------------------------------------------------------

    /// Predicate-driven entity read: `query(|q| q.filter(..).limit(..))`.
    pub fn query(&self, build: impl FnOnce(EntityQuery) -> EntityQuery) -> Result<Vec<E>> {
        self.guard()?;
        let shape = build(EntityQuery::default());
        let env = self.env();
        let mut params = Vec::new();
        let clause = shape.filter.map(|pred| pred.render(env, &mut params));
        let order = if shape.order.is_empty() {
            None
        } else {
            Some(
                shape.order
                    .iter()
                    .map(|o| o.render(env))
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };
        let sql = self.fetch_sql(clause.as_deref(), order.as_deref(), shape.limit, shape.offset);
        self.cached_fetch(&sql, &params)
    }

    /// Like [`query`](Self::query), returning the first row.
    pub fn query_one(
        &self,
        build: impl FnOnce(EntityQuery) -> EntityQuery,
    ) -> Result<Option<E>> {
        Ok(self.query(|q| build(q).limit(1))?.into_iter().next())
    }

    /// Raw SQL read; rows map through `f` after the connection is
    /// released.
    pub fn raw_query<T>(
        &self,
        sql: &str,
        params: &[Value],
        f: impl FnMut(&Row) -> Result<T>,
    ) -> Result<Vec<T>> {
        self.guard()?;
        let rows = self.exec(|conn| conn.query(sql, params))?;
        rows.iter().map(f).collect()
    }

    /// Raw SQL write. Clears both cache layers.
    pub fn raw_update(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.guard()?;
        let affected = self.exec(|conn| conn.execute(sql, params))?;
        if let Some(cache) = &self.inner.cache {
            cache.on_bulk_write();
        }
        Ok(affected)
    }

    /// Raw SQL delete. Clears both cache layers.
    pub fn raw_delete(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.raw_update(sql, params)
    }

    /// Start a join query from this entity's table.
    pub fn join(&self) -> Query {
        Query::new(E::descriptor().qualified_table(self.env()))
    }

    /// Start a join query with the root table aliased (self-joins).
    pub fn join_as(&self, alias: &str) -> Query {
        Query::new(format!(
            "{} AS {alias}",
            E::descriptor().qualified_table(self.env())
        ))
    }

    /// Execute a join query into untyped rows keyed by the selected
    /// aliases.
    pub fn execute_join(&self, query: Query) -> Result<Vec<BundleMap>> {
        self.guard()?;
        let (sql, params) = query.build(self.env());
        let rows = self.exec(|conn| conn.query(&sql, &params))?;
        Ok(rows.iter().map(BundleMap::from_row).collect())
    }

    // ------------------------------------------------------------------
    // Transactions and accessors
    // ------------------------------------------------------------------

    /// Run `f` inside a transaction (see the pool crate for nesting
    /// semantics).
    pub fn transaction<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.guard()?;
        tx::run_in_transaction(&self.inner.pool, f)
    }

    /// Live view over a `Vec` collection field of one parent row.
    pub fn list_of(&self, pk: impl Into<Value>, field: &str) -> Result<ListAccessor<E>> {
        let coll = self.collection_of(field, CollectionKind::List)?;
        ListAccessor::new(self.clone(), pk.into(), &coll)
    }

    /// Live view over a set collection field of one parent row.
    pub fn set_of(&self, pk: impl Into<Value>, field: &str) -> Result<SetAccessor<E>> {
        let coll = self.collection_of(field, CollectionKind::Set)?;
        SetAccessor::new(self.clone(), pk.into(), &coll)
    }

    /// Live view over a map collection field of one parent row.
    pub fn map_of(&self, pk: impl Into<Value>, field: &str) -> Result<MapAccessor<E>> {
        let coll = self.collection_of(field, CollectionKind::Map)?;
        MapAccessor::new(self.clone(), pk.into(), &coll)
    }

    fn collection_of(
        &self,
        field: &str,
        kind: CollectionKind,
    ) -> Result<datamap_core::CollectionDescriptor> {
        let desc = E::descriptor();
        let coll = desc
            .collections
            .iter()
            .find(|c| c.field_name == field)
            .ok_or_else(|| {
                Error::Schema(format!(
                    "{} has no collection field '{field}'",
                    desc.entity_name
                ))
            })?;
        if coll.kind != kind {
            return Err(Error::Schema(format!(
                "collection field '{field}' is {:?}, not {kind:?}",
                coll.kind
            )));
        }
        Ok(coll.clone())
    }
}

/// Builder passed to [`DataMapper::query`].
#[derive(Debug, Default)]
pub struct EntityQuery {
    filter: Option<Expr>,
    order: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl EntityQuery {
    /// AND-combine a predicate.
    pub fn filter(mut self, pred: Expr) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(pred),
            None => pred,
        });
        self
    }

    /// Order ascending by a column.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy::asc(column));
        self
    }

    /// Order descending by a column.
    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order.push(OrderBy::desc(column));
        self
    }

    /// LIMIT.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// OFFSET.
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }
}

fn ordered_params(row: &[(&'static str, Value)], cols: &[&'static str]) -> Vec<Value> {
    cols.iter()
        .map(|col| lookup(row, col))
        .collect()
}

fn lookup(row: &[(&'static str, Value)], col: &str) -> Value {
    row.iter()
        .find(|(c, _)| *c == col)
        .map(|(_, v)| v.clone())
        .unwrap_or(Value::Null)
}

//! Schema version migration through the `_ptc_meta` registry.
//!
//! `_ptc_meta(table_name, version)` holds one row per managed table; the
//! stored version equals the highest migration step successfully applied.
//! Steps run in ascending order, each version inside one transaction, and
//! exactly once per table per version across restarts. A failed step
//! poisons the table for the rest of the process.

use datamap_core::{Connection, Dialect, Error, Placeholders, Result, SqlEnv, Value};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

/// Name of the version registry table.
pub const META_TABLE: &str = "_ptc_meta";

fn poisoned() -> &'static Mutex<HashSet<String>> {
    static POISONED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    POISONED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Whether a table refused operations after a failed migration.
pub fn is_poisoned(key: &str) -> bool {
    poisoned()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .contains(key)
}

fn poison(key: &str) {
    poisoned()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(key.to_string());
}

fn meta_table(env: &SqlEnv) -> String {
    env.table(None, META_TABLE)
}

/// Create the `_ptc_meta` registry if absent.
pub fn ensure_meta(env: &SqlEnv, conn: &mut dyn Connection) -> Result<()> {
    // MySQL cannot key on TEXT; give the name column a bounded type there.
    let name_type = match env.dialect {
        Dialect::Mysql => "VARCHAR(255)",
        Dialect::Sqlite | Dialect::Postgres => "TEXT",
    };
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({} {} PRIMARY KEY, {} INTEGER NOT NULL)",
        meta_table(env),
        env.quote("table_name"),
        name_type,
        env.quote("version")
    );
    conn.execute(&sql, &[])?;
    Ok(())
}

/// The stored version for a table, defaulting to 0.
pub fn stored_version(env: &SqlEnv, conn: &mut dyn Connection, table: &str) -> Result<u32> {
    let mut ph = Placeholders::new(env.dialect);
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        env.quote("version"),
        meta_table(env),
        env.quote("table_name"),
        ph.next()
    );
    let row = conn.query_one(&sql, &[Value::Text(table.to_string())])?;
    Ok(row
        .and_then(|r| r.get(0).and_then(Value::as_i64))
        .unwrap_or(0) as u32)
}

fn write_version(
    env: &SqlEnv,
    conn: &mut dyn Connection,
    table: &str,
    version: u32,
) -> Result<()> {
    let mut ph = Placeholders::new(env.dialect);
    let update = format!(
        "UPDATE {} SET {} = {} WHERE {} = {}",
        meta_table(env),
        env.quote("version"),
        ph.next(),
        env.quote("table_name"),
        ph.next()
    );
    let affected = conn.execute(
        &update,
        &[
            Value::BigInt(i64::from(version)),
            Value::Text(table.to_string()),
        ],
    )?;
    if affected == 0 {
        let mut ph = Placeholders::new(env.dialect);
        let insert = format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            meta_table(env),
            env.quote("table_name"),
            env.quote("version"),
            ph.next(),
            ph.next()
        );
        conn.execute(
            &insert,
            &[
                Value::Text(table.to_string()),
                Value::BigInt(i64::from(version)),
            ],
        )?;
    }
    Ok(())
}

/// Run every migration step newer than the stored version, in ascending
/// order. All statements of one version and the version write-back share a
/// transaction; a failure rolls that version back, poisons `poison_key`
/// and surfaces as `Error::Migration`.
pub fn run_migrations(
    env: &SqlEnv,
    conn: &mut dyn Connection,
    table: &str,
    poison_key: &str,
    steps: &[(u32, Vec<String>)],
) -> Result<()> {
    if is_poisoned(poison_key) {
        return Err(Error::Poisoned(table.to_string()));
    }
    let current = stored_version(env, conn, table)?;
    let mut pending: Vec<&(u32, Vec<String>)> =
        steps.iter().filter(|(v, _)| *v > current).collect();
    pending.sort_by_key(|(v, _)| *v);

    for (version, statements) in pending {
        tracing::debug!(table, version = *version, "applying migration step");
        conn.begin()?;
        let applied = (|| -> Result<()> {
            for sql in statements {
                conn.execute(sql, &[])?;
            }
            write_version(env, conn, table, *version)
        })();
        match applied {
            Ok(()) => conn.commit()?,
            Err(e) => {
                let _ = conn.rollback();
                poison(poison_key);
                return Err(Error::Migration {
                    table: table.to_string(),
                    version: *version,
                    message: e.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poison_registry_is_sticky() {
        assert!(!is_poisoned("src/a"));
        poison("src/a");
        assert!(is_poisoned("src/a"));
        assert!(!is_poisoned("src/b"));
    }
}

//! Data-source descriptions and backend selection.
//!
//! A data source is either a SQLite file path (relative to a data
//! directory) or a named structured configuration. The library consumes a
//! connection factory; this module picks the right one and registers the
//! pool under the source's name.

use datamap_core::{ConnectionFactory, Error, Result};
use datamap_pool::{Pool, PoolConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Backend selector of a configured data source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Mysql,
    #[serde(alias = "postgres")]
    Postgresql,
}

fn default_enable() -> bool {
    true
}

/// Structured data-source configuration.
///
/// With `enable: false` the source falls back to a local SQLite file named
/// after it. `schema` applies to PostgreSQL only and becomes the default
/// schema of tables without an explicit one.
#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceConfig {
    #[serde(default = "default_enable")]
    pub enable: bool,
    #[serde(rename = "type", default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub schema: Option<String>,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            enable: true,
            kind: BackendKind::Sqlite,
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            schema: None,
        }
    }
}

impl DataSourceConfig {
    /// Configuration for a server backend.
    pub fn server(
        kind: BackendKind,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            enable: true,
            kind,
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            schema: None,
        }
    }

    /// Set the default schema (PostgreSQL).
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    fn effective_port(&self) -> u16 {
        if self.port != 0 {
            return self.port;
        }
        match self.kind {
            BackendKind::Sqlite => 0,
            BackendKind::Mysql => 3306,
            BackendKind::Postgresql => 5432,
        }
    }
}

/// A description of where records live.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// A SQLite file, relative paths resolved against the data directory.
    File(PathBuf),
    /// A named structured configuration.
    Named {
        name: String,
        config: DataSourceConfig,
    },
}

impl DataSource {
    /// A SQLite file source.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        DataSource::File(path.into())
    }

    /// A named configured source.
    pub fn named(name: impl Into<String>, config: DataSourceConfig) -> Self {
        DataSource::Named {
            name: name.into(),
            config,
        }
    }

    /// An in-memory SQLite source, for tests and throwaway data.
    pub fn memory(name: impl Into<String>) -> Self {
        DataSource::Named {
            name: name.into(),
            config: DataSourceConfig {
                database: ":memory:".to_string(),
                ..DataSourceConfig::default()
            },
        }
    }

    /// The pool registry key of this source.
    pub fn name(&self) -> String {
        match self {
            DataSource::File(path) => format!("file:{}", path.display()),
            DataSource::Named { name, .. } => name.clone(),
        }
    }

    /// The default schema this source imposes, if any.
    pub fn default_schema(&self) -> Option<String> {
        match self {
            DataSource::File(_) => None,
            DataSource::Named { config, .. } => config.schema.clone(),
        }
    }

    fn sqlite_path(data_dir: &Path, leaf: &Path) -> PathBuf {
        if leaf.is_absolute() {
            leaf.to_path_buf()
        } else {
            data_dir.join(leaf)
        }
    }

    fn factory(&self, data_dir: &Path) -> Result<Box<dyn ConnectionFactory>> {
        match self {
            DataSource::File(path) => Ok(Box::new(datamap_sqlite::SqliteFactory::file(
                Self::sqlite_path(data_dir, path),
            ))),
            DataSource::Named { name, config } => {
                if !config.enable {
                    let fallback = Self::sqlite_path(data_dir, Path::new(&format!("{name}.db")));
                    tracing::debug!(source = %name, path = %fallback.display(),
                        "data source disabled, using local sqlite file");
                    return Ok(Box::new(datamap_sqlite::SqliteFactory::file(fallback)));
                }
                match config.kind {
                    BackendKind::Sqlite => {
                        if config.database.is_empty() || config.database == ":memory:" {
                            Ok(Box::new(datamap_sqlite::SqliteFactory::memory(name.clone())))
                        } else {
                            Ok(Box::new(datamap_sqlite::SqliteFactory::file(
                                Self::sqlite_path(data_dir, Path::new(&config.database)),
                            )))
                        }
                    }
                    #[cfg(feature = "mysql")]
                    BackendKind::Mysql => Ok(Box::new(datamap_mysql::MysqlFactory::new(
                        config.host.clone(),
                        config.effective_port(),
                        config.user.clone(),
                        config.password.clone(),
                        config.database.clone(),
                    ))),
                    #[cfg(not(feature = "mysql"))]
                    BackendKind::Mysql => Err(Error::Config(format!(
                        "data source '{name}' wants mysql, but the `mysql` feature is disabled"
                    ))),
                    #[cfg(feature = "postgres")]
                    BackendKind::Postgresql => Ok(Box::new(datamap_postgres::PostgresFactory::new(
                        config.host.clone(),
                        config.effective_port(),
                        config.user.clone(),
                        config.password.clone(),
                        config.database.clone(),
                    ))),
                    #[cfg(not(feature = "postgres"))]
                    BackendKind::Postgresql => Err(Error::Config(format!(
                        "data source '{name}' wants postgresql, but the `postgres` feature is disabled"
                    ))),
                }
            }
        }
    }

    /// Get or create the pool backing this source.
    pub(crate) fn pool(&self, pool_config: PoolConfig, data_dir: &Path) -> Result<Arc<Pool>> {
        datamap_pool::register(&self.name(), pool_config, || self.factory(data_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes_all_options() {
        let json = r#"{
            "enable": true,
            "type": "postgresql",
            "host": "db.local",
            "port": 5433,
            "user": "app",
            "password": "secret",
            "database": "prod",
            "schema": "game"
        }"#;
        let config: DataSourceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind, BackendKind::Postgresql);
        assert_eq!(config.effective_port(), 5433);
        assert_eq!(config.schema.as_deref(), Some("game"));
    }

    #[test]
    fn defaults_are_sqlite_and_enabled() {
        let config: DataSourceConfig = serde_json::from_str("{}").unwrap();
        assert!(config.enable);
        assert_eq!(config.kind, BackendKind::Sqlite);
    }

    #[test]
    fn default_ports_per_backend() {
        let mut config = DataSourceConfig::default();
        config.kind = BackendKind::Mysql;
        assert_eq!(config.effective_port(), 3306);
        config.kind = BackendKind::Postgresql;
        assert_eq!(config.effective_port(), 5432);
    }

    #[test]
    fn file_sources_resolve_against_data_dir() {
        let path = DataSource::sqlite_path(Path::new("data"), Path::new("homes.db"));
        assert_eq!(path, PathBuf::from("data/homes.db"));
        let absolute = DataSource::sqlite_path(Path::new("data"), Path::new("/tmp/x.db"));
        assert_eq!(absolute, PathBuf::from("/tmp/x.db"));
    }
}

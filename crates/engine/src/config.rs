//! Store configuration via `tessera.toml`
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Values are validated when loaded; invalid settings surface as
//! `Error::Config`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_core::{Error, Result};
use tessera_sql::DialectKind;

use crate::policy::CachePolicy;

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Store configuration loaded from `tessera.toml`.
///
/// # Example
///
/// ```toml
/// default_policy = "cache_first"
/// dialect = "sqlite"
/// create_tables = true
/// insert_batch_size = 500
/// refresh_workers = 4
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Policy callers get from `EntityStore::default_policy`.
    #[serde(default)]
    pub default_policy: CachePolicy,
    /// SQL dialect for generated statements.
    #[serde(default)]
    pub dialect: DialectKind,
    /// Issue CREATE TABLE (and index DDL) when a type is registered.
    #[serde(default = "default_create_tables")]
    pub create_tables: bool,
    /// Maximum rows per multi-row INSERT.
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
    /// Worker threads for parallel refresh.
    #[serde(default = "default_refresh_workers")]
    pub refresh_workers: usize,
}

fn default_create_tables() -> bool {
    true
}

fn default_insert_batch_size() -> usize {
    500
}

fn default_refresh_workers() -> usize {
    4
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_policy: CachePolicy::default(),
            dialect: DialectKind::default(),
            create_tables: default_create_tables(),
            insert_batch_size: default_insert_batch_size(),
            refresh_workers: default_refresh_workers(),
        }
    }
}

impl StoreConfig {
    /// Default config for one dialect.
    pub fn for_dialect(dialect: DialectKind) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.insert_batch_size == 0 {
            return Err(Error::Config(
                "insert_batch_size must be at least 1".to_string(),
            ));
        }
        if self.refresh_workers == 0 {
            return Err(Error::Config(
                "refresh_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera store configuration
#
# Cache policy used when callers pass store.default_policy():
#   "cache_only"    = never touch the backend
#   "cache_first"   = serve cached instances, fetch misses (default)
#   "force_refresh" = always re-read from the backend
default_policy = "cache_first"

# SQL dialect: "ansi" (default), "postgres", "mysql", "sqlite", "sqlserver"
dialect = "ansi"

# Create tables and indexes when an entity type is registered (default: true)
create_tables = true

# Maximum rows per multi-row INSERT (default: 500)
insert_batch_size = 500

# Worker threads for parallel refresh (default: 4)
refresh_workers = 4
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and `Error::Config`
    /// if it cannot be parsed or holds invalid values.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

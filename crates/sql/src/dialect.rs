//! Dialect descriptors
//!
//! A dialect supplies the backend-specific parts of SQL text: identifier
//! quoting, placeholder syntax, the scalar-type mapping table, generated-key
//! column DDL and index DDL. Everything else is shared by [`SqlGenerator`].
//!
//! [`SqlGenerator`]: crate::generator::SqlGenerator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tessera_core::{ColumnDescriptor, Error, IndexDef, Result, ScalarType};

use crate::dialects::{Ansi, MySql, Postgres, SqlServer, Sqlite};

/// Rendered in DDL for a scalar type the dialect cannot map
pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";

/// Backend-specific SQL rules
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short dialect name, used in errors and logs
    fn name(&self) -> &'static str;

    /// Quote an identifier, escaping embedded quote characters
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Placeholder for the 1-based parameter `position`
    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    /// Native column type for a scalar type, `None` if unmapped
    fn native_type(&self, scalar_type: &ScalarType) -> Option<String>;

    /// Full column definition of a backend-generated primary key
    fn generated_key_column(&self, column: &ColumnDescriptor) -> String;

    /// Clause appended to an INSERT so it yields the generated key as a row
    fn returning_key_clause(&self, _quoted_key: &str) -> Option<String> {
        None
    }

    /// Opening of a CREATE TABLE that tolerates an existing table
    fn create_table_prefix(&self, quoted_table: &str) -> String {
        format!("CREATE TABLE IF NOT EXISTS {}", quoted_table)
    }

    /// Whether `INSERT ... VALUES (..), (..)` is accepted
    fn supports_multi_row_insert(&self) -> bool {
        true
    }

    /// Most bind parameters one statement may carry
    fn max_bind_params(&self) -> usize {
        32_766
    }

    /// Most rows one multi-row `INSERT` may carry
    fn max_insert_rows(&self) -> usize {
        usize::MAX
    }

    /// `INSERT` of a row made entirely of column defaults
    fn insert_defaults(&self, quoted_table: &str) -> String {
        format!("INSERT INTO {} DEFAULT VALUES", quoted_table)
    }

    /// DDL for one secondary index
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedDialectFeature` when the index cannot be expressed,
    /// which for most dialects means a clustered index.
    fn create_index(
        &self,
        quoted_table: &str,
        index: &IndexDef,
        quoted_columns: &[String],
    ) -> Result<String> {
        if index.clustered {
            return Err(Error::UnsupportedDialectFeature {
                dialect: self.name(),
                feature: format!("clustered index '{}'", index.name),
            });
        }
        Ok(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            quoted_table,
            quoted_columns.join(", ")
        ))
    }
}

/// Selectable dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// ANSI SQL
    #[default]
    Ansi,
    /// PostgreSQL
    Postgres,
    /// MySQL / MariaDB
    MySql,
    /// SQLite
    Sqlite,
    /// Microsoft SQL Server
    SqlServer,
}

impl DialectKind {
    /// Instantiate the dialect
    pub fn dialect(self) -> Arc<dyn Dialect> {
        match self {
            DialectKind::Ansi => Arc::new(Ansi),
            DialectKind::Postgres => Arc::new(Postgres),
            DialectKind::MySql => Arc::new(MySql),
            DialectKind::Sqlite => Arc::new(Sqlite),
            DialectKind::SqlServer => Arc::new(SqlServer),
        }
    }
}

impl FromStr for DialectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ansi" => Ok(DialectKind::Ansi),
            "postgres" | "postgresql" => Ok(DialectKind::Postgres),
            "mysql" | "mariadb" => Ok(DialectKind::MySql),
            "sqlite" => Ok(DialectKind::Sqlite),
            "sqlserver" | "mssql" => Ok(DialectKind::SqlServer),
            other => Err(Error::Config(format!("unknown dialect '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dialect_names() {
        assert_eq!("postgresql".parse::<DialectKind>().unwrap(), DialectKind::Postgres);
        assert_eq!("MSSQL".parse::<DialectKind>().unwrap(), DialectKind::SqlServer);
        assert!("oracle".parse::<DialectKind>().is_err());
    }

    #[test]
    fn test_kind_instantiates_named_dialect() {
        for (kind, name) in [
            (DialectKind::Ansi, "ansi"),
            (DialectKind::Postgres, "postgres"),
            (DialectKind::MySql, "mysql"),
            (DialectKind::Sqlite, "sqlite"),
            (DialectKind::SqlServer, "sqlserver"),
        ] {
            assert_eq!(kind.dialect().name(), name);
        }
    }

    #[test]
    fn test_default_index_rejects_clustered() {
        let dialect = Ansi;
        let index = IndexDef::new("idx_name", ["name"]).clustered();
        let err = dialect
            .create_index("\"person\"", &index, &["\"name\"".to_string()])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedDialectFeature { dialect: "ansi", .. }
        ));
    }
}

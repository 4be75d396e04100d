//! Built-in dialects

use crate::dialect::Dialect;
use tessera_core::{ColumnDescriptor, IndexDef, Result, ScalarType};

fn sized(base: &str, len: Option<u32>, unbounded: &str) -> String {
    match len {
        Some(n) => format!("{}({})", base, n),
        None => unbounded.to_string(),
    }
}

/// ANSI SQL
#[derive(Debug, Clone, Copy, Default)]
pub struct Ansi;

impl Dialect for Ansi {
    fn name(&self) -> &'static str {
        "ansi"
    }

    fn native_type(&self, scalar_type: &ScalarType) -> Option<String> {
        let native = match scalar_type {
            ScalarType::Boolean => "BOOLEAN".to_string(),
            ScalarType::TinyInt | ScalarType::SmallInt => "SMALLINT".to_string(),
            ScalarType::Integer => "INTEGER".to_string(),
            ScalarType::BigInt => "BIGINT".to_string(),
            ScalarType::Float => "REAL".to_string(),
            ScalarType::Double => "DOUBLE PRECISION".to_string(),
            ScalarType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
            ScalarType::String { max_len } => sized("VARCHAR", *max_len, "CLOB"),
            ScalarType::Binary { max_len } => sized("VARBINARY", *max_len, "BLOB"),
            ScalarType::Date => "DATE".to_string(),
            ScalarType::Time => "TIME".to_string(),
            ScalarType::DateTime => "TIMESTAMP".to_string(),
            ScalarType::Other(_) => return None,
        };
        Some(native)
    }

    fn generated_key_column(&self, column: &ColumnDescriptor) -> String {
        format!(
            "{} {} GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
            self.quote_identifier(&column.name),
            self.native_type(&column.scalar_type)
                .unwrap_or_else(|| "INTEGER".to_string())
        )
    }
}

/// PostgreSQL
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${}", position)
    }

    fn native_type(&self, scalar_type: &ScalarType) -> Option<String> {
        let native = match scalar_type {
            ScalarType::Boolean => "BOOLEAN".to_string(),
            ScalarType::TinyInt | ScalarType::SmallInt => "SMALLINT".to_string(),
            ScalarType::Integer => "INTEGER".to_string(),
            ScalarType::BigInt => "BIGINT".to_string(),
            ScalarType::Float => "REAL".to_string(),
            ScalarType::Double => "DOUBLE PRECISION".to_string(),
            ScalarType::Decimal { precision, scale } => format!("NUMERIC({},{})", precision, scale),
            ScalarType::String { max_len } => sized("VARCHAR", *max_len, "TEXT"),
            ScalarType::Binary { .. } => "BYTEA".to_string(),
            ScalarType::Date => "DATE".to_string(),
            ScalarType::Time => "TIME".to_string(),
            ScalarType::DateTime => "TIMESTAMP".to_string(),
            ScalarType::Other(_) => return None,
        };
        Some(native)
    }

    fn generated_key_column(&self, column: &ColumnDescriptor) -> String {
        let serial = match column.scalar_type {
            ScalarType::BigInt => "BIGSERIAL",
            ScalarType::TinyInt | ScalarType::SmallInt => "SMALLSERIAL",
            _ => "SERIAL",
        };
        format!("{} {} PRIMARY KEY", self.quote_identifier(&column.name), serial)
    }

    fn returning_key_clause(&self, quoted_key: &str) -> Option<String> {
        Some(format!(" RETURNING {}", quoted_key))
    }

    fn max_bind_params(&self) -> usize {
        65_535
    }
}

/// MySQL / MariaDB
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn native_type(&self, scalar_type: &ScalarType) -> Option<String> {
        let native = match scalar_type {
            ScalarType::Boolean => "TINYINT(1)".to_string(),
            ScalarType::TinyInt => "TINYINT".to_string(),
            ScalarType::SmallInt => "SMALLINT".to_string(),
            ScalarType::Integer => "INT".to_string(),
            ScalarType::BigInt => "BIGINT".to_string(),
            ScalarType::Float => "FLOAT".to_string(),
            ScalarType::Double => "DOUBLE".to_string(),
            ScalarType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
            ScalarType::String { max_len } => sized("VARCHAR", *max_len, "TEXT"),
            ScalarType::Binary { max_len } => sized("VARBINARY", *max_len, "BLOB"),
            ScalarType::Date => "DATE".to_string(),
            ScalarType::Time => "TIME".to_string(),
            ScalarType::DateTime => "DATETIME".to_string(),
            ScalarType::Other(_) => return None,
        };
        Some(native)
    }

    fn generated_key_column(&self, column: &ColumnDescriptor) -> String {
        format!(
            "{} {} NOT NULL AUTO_INCREMENT PRIMARY KEY",
            self.quote_identifier(&column.name),
            self.native_type(&column.scalar_type)
                .unwrap_or_else(|| "INT".to_string())
        )
    }

    fn max_bind_params(&self) -> usize {
        65_535
    }

    fn insert_defaults(&self, quoted_table: &str) -> String {
        format!("INSERT INTO {} () VALUES ()", quoted_table)
    }
}

/// SQLite
///
/// Dates, times and decimals are stored as text; booleans as 0/1 integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn native_type(&self, scalar_type: &ScalarType) -> Option<String> {
        let native = match scalar_type {
            ScalarType::Boolean
            | ScalarType::TinyInt
            | ScalarType::SmallInt
            | ScalarType::Integer
            | ScalarType::BigInt => "INTEGER",
            ScalarType::Float | ScalarType::Double => "REAL",
            ScalarType::Decimal { .. } | ScalarType::String { .. } => "TEXT",
            ScalarType::Binary { .. } => "BLOB",
            ScalarType::Date | ScalarType::Time | ScalarType::DateTime => "TEXT",
            ScalarType::Other(_) => return None,
        };
        Some(native.to_string())
    }

    fn generated_key_column(&self, column: &ColumnDescriptor) -> String {
        // Only the exact INTEGER PRIMARY KEY form aliases the rowid.
        format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            self.quote_identifier(&column.name)
        )
    }
}

/// Microsoft SQL Server
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn placeholder(&self, position: usize) -> String {
        format!("@p{}", position)
    }

    fn native_type(&self, scalar_type: &ScalarType) -> Option<String> {
        let native = match scalar_type {
            ScalarType::Boolean => "BIT".to_string(),
            ScalarType::TinyInt => "TINYINT".to_string(),
            ScalarType::SmallInt => "SMALLINT".to_string(),
            ScalarType::Integer => "INT".to_string(),
            ScalarType::BigInt => "BIGINT".to_string(),
            ScalarType::Float => "REAL".to_string(),
            ScalarType::Double => "FLOAT".to_string(),
            ScalarType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
            ScalarType::String { max_len } => sized("NVARCHAR", *max_len, "NVARCHAR(MAX)"),
            ScalarType::Binary { max_len } => sized("VARBINARY", *max_len, "VARBINARY(MAX)"),
            ScalarType::Date => "DATE".to_string(),
            ScalarType::Time => "TIME".to_string(),
            ScalarType::DateTime => "DATETIME2".to_string(),
            ScalarType::Other(_) => return None,
        };
        Some(native)
    }

    fn generated_key_column(&self, column: &ColumnDescriptor) -> String {
        format!(
            "{} {} IDENTITY(1,1) PRIMARY KEY",
            self.quote_identifier(&column.name),
            self.native_type(&column.scalar_type)
                .unwrap_or_else(|| "INT".to_string())
        )
    }

    fn max_bind_params(&self) -> usize {
        2_100
    }

    fn max_insert_rows(&self) -> usize {
        1_000
    }

    fn create_table_prefix(&self, quoted_table: &str) -> String {
        let bare = quoted_table.trim_start_matches('[').trim_end_matches(']');
        format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {}",
            bare.replace('\'', "''"),
            quoted_table
        )
    }

    fn create_index(
        &self,
        quoted_table: &str,
        index: &IndexDef,
        quoted_columns: &[String],
    ) -> Result<String> {
        Ok(format!(
            "CREATE {}{}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            if index.clustered { "CLUSTERED " } else { "NONCLUSTERED " },
            self.quote_identifier(&index.name),
            quoted_table,
            quoted_columns.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_escapes() {
        assert_eq!(Ansi.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(MySql.quote_identifier("a`b"), "`a``b`");
        assert_eq!(SqlServer.quote_identifier("a]b"), "[a]]b]");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Ansi.placeholder(3), "?");
        assert_eq!(Postgres.placeholder(3), "$3");
        assert_eq!(SqlServer.placeholder(3), "@p3");
    }

    #[test]
    fn test_mapping_tables_cover_every_known_type() {
        let types = [
            ScalarType::Boolean,
            ScalarType::TinyInt,
            ScalarType::SmallInt,
            ScalarType::Integer,
            ScalarType::BigInt,
            ScalarType::Float,
            ScalarType::Double,
            ScalarType::Decimal { precision: 10, scale: 2 },
            ScalarType::varchar(50),
            ScalarType::text(),
            ScalarType::Binary { max_len: None },
            ScalarType::Date,
            ScalarType::Time,
            ScalarType::DateTime,
        ];
        let dialects: [&dyn Dialect; 5] = [&Ansi, &Postgres, &MySql, &Sqlite, &SqlServer];
        for dialect in dialects {
            for ty in &types {
                assert!(
                    dialect.native_type(ty).is_some(),
                    "{} has no mapping for {}",
                    dialect.name(),
                    ty
                );
            }
            assert!(dialect.native_type(&ScalarType::Other("geometry".into())).is_none());
        }
    }

    #[test]
    fn test_specific_mappings() {
        assert_eq!(MySql.native_type(&ScalarType::Boolean).unwrap(), "TINYINT(1)");
        assert_eq!(Postgres.native_type(&ScalarType::text()).unwrap(), "TEXT");
        assert_eq!(SqlServer.native_type(&ScalarType::varchar(20)).unwrap(), "NVARCHAR(20)");
        assert_eq!(Sqlite.native_type(&ScalarType::DateTime).unwrap(), "TEXT");
    }

    #[test]
    fn test_statement_limits() {
        assert_eq!(Sqlite.max_bind_params(), 32_766);
        assert_eq!(SqlServer.max_bind_params(), 2_100);
        assert_eq!(SqlServer.max_insert_rows(), 1_000);
        assert_eq!(Postgres.max_insert_rows(), usize::MAX);
    }

    #[test]
    fn test_insert_defaults() {
        assert_eq!(Sqlite.insert_defaults("\"tag\""), "INSERT INTO \"tag\" DEFAULT VALUES");
        assert_eq!(MySql.insert_defaults("`tag`"), "INSERT INTO `tag` () VALUES ()");
    }

    #[test]
    fn test_sqlserver_supports_clustered_index() {
        let index = IndexDef::new("ix_name", ["name"]).clustered().unique();
        let ddl = SqlServer
            .create_index("[person]", &index, &["[name]".to_string()])
            .unwrap();
        assert_eq!(ddl, "CREATE UNIQUE CLUSTERED INDEX [ix_name] ON [person] ([name])");
    }

    #[test]
    fn test_clustered_index_rejected_elsewhere() {
        let index = IndexDef::new("ix_name", ["name"]).clustered();
        let cols = vec!["\"name\"".to_string()];
        assert!(Postgres.create_index("\"person\"", &index, &cols).is_err());
        assert!(Sqlite.create_index("\"person\"", &index, &cols).is_err());
        assert!(MySql.create_index("`person`", &index, &["`name`".to_string()]).is_err());
    }
}

//! SQL text generation
//!
//! Turns a [`TableMapping`] into DDL/DML text for one dialect. Values are
//! never interpolated: a statement over N keys carries exactly N
//! placeholders, and [`Statement::bind_fields`] records which field feeds
//! each placeholder so prepared statements can be reused across batches.

use std::sync::Arc;
use tessera_core::{ColumnDescriptor, Error, Record, Result, TableMapping, Value};
use tracing::warn;

use crate::dialect::{Dialect, UNKNOWN_TYPE};

/// Parameterized statement text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// SQL text with dialect placeholders
    pub sql: String,
    /// Field name bound to each placeholder, in placeholder order
    pub bind_fields: Vec<String>,
    rows: usize,
}

impl Statement {
    fn single(sql: String, bind_fields: Vec<String>) -> Self {
        Statement {
            sql,
            bind_fields,
            rows: 1,
        }
    }

    /// Number of placeholders
    pub fn param_count(&self) -> usize {
        self.bind_fields.len()
    }

    /// Rows of values the statement takes
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Collect parameter values from a record, `NULL` for absent fields
    pub fn bind(&self, record: &Record) -> Vec<Value> {
        self.bind_fields
            .iter()
            .map(|f| record.get(f).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Collect parameter values for a multi-row statement
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` unless there is exactly one record per row
    /// the statement was generated for.
    pub fn bind_many(&self, records: &[Record]) -> Result<Vec<Value>> {
        if records.len() != self.rows {
            return Err(Error::illegal(format!(
                "statement takes {} rows, got {} records",
                self.rows,
                records.len()
            )));
        }
        let per_row = self.bind_fields.len() / self.rows;
        Ok(records
            .iter()
            .enumerate()
            .flat_map(|(i, r)| {
                self.bind_fields[i * per_row..(i + 1) * per_row]
                    .iter()
                    .map(move |f| r.get(f).cloned().unwrap_or(Value::Null))
            })
            .collect())
    }
}

/// Dialect-driven statement builder
#[derive(Debug, Clone)]
pub struct SqlGenerator {
    dialect: Arc<dyn Dialect>,
}

impl SqlGenerator {
    /// Create a generator for `dialect`
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        SqlGenerator { dialect }
    }

    /// The target dialect
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    fn quote(&self, ident: &str) -> String {
        self.dialect.quote_identifier(ident)
    }

    fn table(&self, mapping: &TableMapping) -> String {
        self.quote(mapping.table())
    }

    fn column_list<'a>(&self, columns: impl Iterator<Item = &'a ColumnDescriptor>) -> String {
        columns
            .map(|c| self.quote(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn placeholders(&self, start: usize, count: usize) -> String {
        (start..start + count)
            .map(|i| self.dialect.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn key_predicate(&self, mapping: &TableMapping, count: usize) -> Result<String> {
        let key = self.quote(&mapping.key_column().name);
        match count {
            0 => Err(Error::illegal("key list must not be empty")),
            1 => Ok(format!("{} = {}", key, self.dialect.placeholder(1))),
            n => Ok(format!("{} IN ({})", key, self.placeholders(1, n))),
        }
    }

    fn key_binds(mapping: &TableMapping, count: usize) -> Vec<String> {
        vec![mapping.key_column().field.clone(); count]
    }

    /// Native type for a column, or the unknown-type placeholder
    pub fn column_type(&self, column: &ColumnDescriptor) -> String {
        match self.dialect.native_type(&column.scalar_type) {
            Some(native) => native,
            None => {
                warn!(
                    target: "tessera::sql",
                    dialect = self.dialect.name(),
                    column = %column.name,
                    scalar_type = %column.scalar_type,
                    "No native type mapping"
                );
                UNKNOWN_TYPE.to_string()
            }
        }
    }

    /// Columns whose scalar type the dialect cannot map
    pub fn unmapped_columns(&self, mapping: &TableMapping) -> Vec<ColumnDescriptor> {
        mapping
            .columns()
            .iter()
            .filter(|c| self.dialect.native_type(&c.scalar_type).is_none())
            .cloned()
            .collect()
    }

    /// `CREATE TABLE` for the mapped type
    pub fn create_table(&self, mapping: &TableMapping) -> String {
        let mut defs = Vec::with_capacity(mapping.columns().len() + 1);
        let mut table_key = None;
        for column in mapping.columns() {
            if column.generated {
                defs.push(self.dialect.generated_key_column(column));
                continue;
            }
            let mut def = format!("{} {}", self.quote(&column.name), self.column_type(column));
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            defs.push(def);
            if column.is_key {
                table_key = Some(self.quote(&column.name));
            }
        }
        if let Some(key) = table_key {
            defs.push(format!("PRIMARY KEY ({})", key));
        }
        format!(
            "{} ({})",
            self.dialect.create_table_prefix(&self.table(mapping)),
            defs.join(", ")
        )
    }

    /// `CREATE INDEX` statements for the declared indexes
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedDialectFeature` if any index cannot be expressed.
    pub fn create_indexes(&self, mapping: &TableMapping) -> Result<Vec<String>> {
        let table = self.table(mapping);
        mapping
            .entity_type()
            .indexes()
            .iter()
            .map(|index| {
                let columns: Vec<String> = index
                    .fields
                    .iter()
                    .map(|f| {
                        mapping
                            .column_for_field(f)
                            .map(|c| self.quote(&c.name))
                            .ok_or_else(|| Error::UnmappedType(format!("{}.{}", mapping.table(), f)))
                    })
                    .collect::<Result<_>>()?;
                self.dialect.create_index(&table, index, &columns)
            })
            .collect()
    }

    /// `SELECT` of every column for `count` keys
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if `count` is zero.
    pub fn select_by_keys(&self, mapping: &TableMapping, count: usize) -> Result<Statement> {
        Ok(Statement::single(
            format!(
                "SELECT {} FROM {} WHERE {}",
                self.column_list(mapping.columns().iter()),
                self.table(mapping),
                self.key_predicate(mapping, count)?
            ),
            Self::key_binds(mapping, count),
        ))
    }

    /// `SELECT` of every row, ordered by key
    pub fn select_all(&self, mapping: &TableMapping) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY {}",
            self.column_list(mapping.columns().iter()),
            self.table(mapping),
            self.quote(&mapping.key_column().name)
        )
    }

    /// `SELECT COUNT(*)`
    pub fn count(&self, mapping: &TableMapping) -> String {
        format!("SELECT COUNT(*) FROM {}", self.table(mapping))
    }

    /// `SELECT MAX(key)`, used to seed local key sequences
    pub fn max_key(&self, mapping: &TableMapping) -> String {
        format!(
            "SELECT MAX({}) FROM {}",
            self.quote(&mapping.key_column().name),
            self.table(mapping)
        )
    }

    /// Single-row `INSERT`; a backend-generated key column is omitted
    ///
    /// A type with nothing to insert but a generated key gets the dialect's
    /// all-defaults form.
    pub fn insert(&self, mapping: &TableMapping) -> Statement {
        let columns: Vec<&ColumnDescriptor> = mapping.insert_columns().collect();
        let mut sql = if columns.is_empty() {
            self.dialect.insert_defaults(&self.table(mapping))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table(mapping),
                self.column_list(columns.iter().copied()),
                self.placeholders(1, columns.len())
            )
        };
        if mapping.key_column().generated {
            if let Some(clause) = self
                .dialect
                .returning_key_clause(&self.quote(&mapping.key_column().name))
            {
                sql.push_str(&clause);
            }
        }
        Statement::single(sql, columns.iter().map(|c| c.field.clone()).collect())
    }

    /// Rows per multi-row `INSERT`: `batch_size` capped by the dialect's
    /// parameter and row limits, never below one
    pub fn insert_rows_per_statement(&self, mapping: &TableMapping, batch_size: usize) -> usize {
        let width = mapping.insert_columns().count().max(1);
        batch_size
            .min(self.dialect.max_bind_params() / width)
            .min(self.dialect.max_insert_rows())
            .max(1)
    }

    /// Multi-row `INSERT` of `rows` rows
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if `rows` is zero or the type has no
    /// insertable column, and `UnsupportedDialectFeature` if the dialect has
    /// no multi-row form or the statement would exceed its limits.
    pub fn insert_many(&self, mapping: &TableMapping, rows: usize) -> Result<Statement> {
        if rows == 0 {
            return Err(Error::illegal("row count must not be zero"));
        }
        if !self.dialect.supports_multi_row_insert() {
            return Err(Error::UnsupportedDialectFeature {
                dialect: self.dialect.name(),
                feature: "multi-row insert".to_string(),
            });
        }
        let columns: Vec<&ColumnDescriptor> = mapping.insert_columns().collect();
        let width = columns.len();
        if width == 0 {
            return Err(Error::illegal(format!(
                "{} has no insertable column",
                mapping.table()
            )));
        }
        if rows > self.dialect.max_insert_rows() || rows * width > self.dialect.max_bind_params() {
            return Err(Error::UnsupportedDialectFeature {
                dialect: self.dialect.name(),
                feature: format!("insert of {} rows with {} parameters", rows, rows * width),
            });
        }
        let groups: Vec<String> = (0..rows)
            .map(|r| format!("({})", self.placeholders(r * width + 1, width)))
            .collect();
        let row_fields: Vec<String> = columns.iter().map(|c| c.field.clone()).collect();
        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.table(mapping),
                self.column_list(columns.iter().copied()),
                groups.join(", ")
            ),
            bind_fields: (0..rows).flat_map(|_| row_fields.iter().cloned()).collect(),
            rows,
        })
    }

    /// `UPDATE` of every non-key column by key
    ///
    /// `None` when the type has no column besides its key.
    pub fn update(&self, mapping: &TableMapping) -> Option<Statement> {
        let columns: Vec<&ColumnDescriptor> = mapping.value_columns().collect();
        if columns.is_empty() {
            return None;
        }
        let assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", self.quote(&c.name), self.dialect.placeholder(i + 1)))
            .collect();
        let key = mapping.key_column();
        let mut bind_fields: Vec<String> = columns.iter().map(|c| c.field.clone()).collect();
        bind_fields.push(key.field.clone());
        Some(Statement::single(
            format!(
                "UPDATE {} SET {} WHERE {} = {}",
                self.table(mapping),
                assignments.join(", "),
                self.quote(&key.name),
                self.dialect.placeholder(columns.len() + 1)
            ),
            bind_fields,
        ))
    }

    /// `DELETE` of `count` keys
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` if `count` is zero.
    pub fn delete_by_keys(&self, mapping: &TableMapping, count: usize) -> Result<Statement> {
        Ok(Statement::single(
            format!(
                "DELETE FROM {} WHERE {}",
                self.table(mapping),
                self.key_predicate(mapping, count)?
            ),
            Self::key_binds(mapping, count),
        ))
    }

    /// `DELETE` of every row
    pub fn delete_all(&self, mapping: &TableMapping) -> String {
        format!("DELETE FROM {}", self.table(mapping))
    }
}

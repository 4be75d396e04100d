//! Field/table mapping
//!
//! Translates a registered entity type into the ordered column descriptors
//! every layer above consumes. Built once per type at registration time and
//! read concurrently afterwards.

use crate::error::{Error, Result};
use crate::schema::{EntityType, IdAssignment, ScalarType};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::info;

/// Column of a mapped table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Field the column stores
    pub field: String,
    /// Declared scalar type
    pub scalar_type: ScalarType,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Whether this is the identity column
    pub is_key: bool,
    /// Whether the backend generates this column's value
    pub generated: bool,
}

/// Resolved mapping of one entity type
#[derive(Debug, Clone)]
pub struct TableMapping {
    entity_type: Arc<EntityType>,
    columns: Vec<ColumnDescriptor>,
    key_position: usize,
}

impl TableMapping {
    /// Derive the mapping from a schema descriptor
    pub fn derive(entity_type: Arc<EntityType>) -> Self {
        let key_name = entity_type.key_field().name.clone();
        let generated_key = entity_type.id_assignment() == IdAssignment::Backend;
        let columns: Vec<ColumnDescriptor> = entity_type
            .fields()
            .iter()
            .map(|f| {
                let is_key = f.name == key_name;
                ColumnDescriptor {
                    name: f.column.clone(),
                    field: f.name.clone(),
                    scalar_type: f.scalar_type.clone(),
                    nullable: f.nullable,
                    is_key,
                    generated: is_key && generated_key,
                }
            })
            .collect();
        let key_position = columns.iter().position(|c| c.is_key).unwrap_or(0);
        TableMapping {
            entity_type,
            columns,
            key_position,
        }
    }

    /// The mapped entity type
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    /// Table name
    pub fn table(&self) -> &str {
        self.entity_type.table()
    }

    /// Columns in declaration order
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// The identity column
    pub fn key_column(&self) -> &ColumnDescriptor {
        &self.columns[self.key_position]
    }

    /// Columns other than the identity column
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.is_key)
    }

    /// Columns written by an INSERT (generated key excluded)
    pub fn insert_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.generated)
    }

    /// Column storing `field`
    pub fn column_for_field(&self, field: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.field == field)
    }
}

/// Registry of table mappings, keyed by entity type name
///
/// Safe for concurrent reads from multiple threads once built.
#[derive(Debug, Default)]
pub struct FieldMapping {
    tables: RwLock<FxHashMap<String, Arc<TableMapping>>>,
}

impl FieldMapping {
    /// Create an empty mapping registry
    pub fn new() -> Self {
        FieldMapping::default()
    }

    /// Build and store the mapping for a type
    ///
    /// # Errors
    ///
    /// Returns `DuplicateType` if a type with the same name is already mapped.
    pub fn register(&self, entity_type: Arc<EntityType>) -> Result<Arc<TableMapping>> {
        let mut tables = self.tables.write();
        if tables.contains_key(entity_type.name()) {
            return Err(Error::DuplicateType(entity_type.name().to_string()));
        }
        let mapping = Arc::new(TableMapping::derive(Arc::clone(&entity_type)));
        tables.insert(entity_type.name().to_string(), Arc::clone(&mapping));
        info!(
            target: "tessera::mapping",
            entity_type = entity_type.name(),
            table = entity_type.table(),
            columns = mapping.columns().len(),
            "Mapped entity type"
        );
        Ok(mapping)
    }

    /// Resolve the mapping for a type name
    ///
    /// # Errors
    ///
    /// Returns `UnmappedType` if the type was never registered.
    pub fn table(&self, type_name: &str) -> Result<Arc<TableMapping>> {
        self.tables
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::UnmappedType(type_name.to_string()))
    }

    /// Ordered column descriptors of a type
    ///
    /// # Errors
    ///
    /// Returns `UnmappedType` if the type was never registered.
    pub fn columns_for(&self, entity_type: &EntityType) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.table(entity_type.name())?.columns().to_vec())
    }

    /// Identity column of a type
    ///
    /// # Errors
    ///
    /// Returns `UnmappedType` if the type was never registered.
    pub fn key_column(&self, entity_type: &EntityType) -> Result<ColumnDescriptor> {
        Ok(self.table(entity_type.name())?.key_column().clone())
    }

    /// Whether a type name is mapped
    pub fn contains(&self, type_name: &str) -> bool {
        self.tables.read().contains_key(type_name)
    }

    /// Mapped type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    fn person(strategy: IdAssignment) -> Arc<EntityType> {
        Arc::new(
            EntityType::builder("Person")
                .key("id", ScalarType::Integer)
                .field("name", ScalarType::varchar(50))
                .field_def(FieldDef::new("age", ScalarType::Integer).column("age_years"))
                .id_assignment(strategy)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_columns_in_declaration_order() {
        let mapping = FieldMapping::new();
        let ty = person(IdAssignment::Caller);
        mapping.register(Arc::clone(&ty)).unwrap();

        let cols = mapping.columns_for(&ty).unwrap();
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "age_years"]);
        assert!(cols[0].is_key);
        assert!(!cols[0].generated);

        let key = mapping.key_column(&ty).unwrap();
        assert_eq!(key.name, "id");
    }

    #[test]
    fn test_generated_key_excluded_from_insert() {
        let table = TableMapping::derive(person(IdAssignment::Backend));
        assert!(table.key_column().generated);
        let cols: Vec<&str> = table.insert_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(cols, vec!["name", "age_years"]);

        let table = TableMapping::derive(person(IdAssignment::Sequence));
        assert_eq!(table.insert_columns().count(), 3);
    }

    #[test]
    fn test_unmapped_type() {
        let mapping = FieldMapping::new();
        let ty = person(IdAssignment::Caller);
        assert!(matches!(
            mapping.columns_for(&ty),
            Err(Error::UnmappedType(name)) if name == "Person"
        ));
        assert!(mapping.key_column(&ty).is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let mapping = FieldMapping::new();
        mapping.register(person(IdAssignment::Caller)).unwrap();
        assert!(matches!(
            mapping.register(person(IdAssignment::Backend)),
            Err(Error::DuplicateType(_))
        ));
        assert_eq!(mapping.type_names(), vec!["Person".to_string()]);
    }

    static_assertions::assert_impl_all!(FieldMapping: Send, Sync);
}

//! Core types and traits for Tessera
//!
//! This crate defines the foundational types used throughout the system:
//! - Value / EntityKey: field values and identity keys
//! - Record: field values of one entity
//! - EntityType: statically declared schema descriptor and its builder
//! - FieldMapping: entity type to column descriptors
//! - RowStore: the row-store collaborator trait
//! - Error: error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod mapping;
pub mod schema;
pub mod traits;
pub mod value;

pub use error::{Error, Result};
pub use event::EventKind;
pub use mapping::{ColumnDescriptor, FieldMapping, TableMapping};
pub use schema::{
    to_snake_case, EntityType, EntityTypeBuilder, FieldDef, IdAssignment, IndexDef, Record,
    ScalarType,
};
pub use traits::{Row, RowStore};
pub use value::{EntityKey, Value};

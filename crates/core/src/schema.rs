//! Entity schema descriptors
//!
//! An [`EntityType`] is a statically declared schema: a unique name, the
//! ordered field list with column names and scalar types, the identity
//! field, the id-assignment strategy and any secondary indexes. It is built
//! once through [`EntityTypeBuilder`] and is immutable afterwards; the
//! registry hands it out as `Arc<EntityType>`.
//!
//! Two entity types are equal when their names are equal. Names are unique
//! per store, so the name is the type's identity.

use crate::error::{Error, Result};
use crate::value::{EntityKey, Value};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Declared scalar type of a field
///
/// Dialects map each variant to a native column type; [`ScalarType::Other`]
/// carries a type name no dialect knows and renders as an explicit
/// unknown-type placeholder in DDL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Boolean
    Boolean,
    /// 8-bit integer
    TinyInt,
    /// 16-bit integer
    SmallInt,
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    BigInt,
    /// Single precision floating point
    Float,
    /// Double precision floating point
    Double,
    /// Exact decimal
    Decimal {
        /// Total digits
        precision: u8,
        /// Digits after the decimal point
        scale: u8,
    },
    /// Character string with optional maximum length
    String {
        /// Maximum length in characters
        max_len: Option<u32>,
    },
    /// Byte string with optional maximum length
    Binary {
        /// Maximum length in bytes
        max_len: Option<u32>,
    },
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Date and time
    DateTime,
    /// A type without a known mapping
    Other(String),
}

impl ScalarType {
    /// Unbounded string
    pub fn text() -> Self {
        ScalarType::String { max_len: None }
    }

    /// String with a maximum length
    pub fn varchar(max_len: u32) -> Self {
        ScalarType::String {
            max_len: Some(max_len),
        }
    }

    /// 16-byte binary, the storage form of UUID keys
    pub fn uuid() -> Self {
        ScalarType::Binary { max_len: Some(16) }
    }

    /// Whether values of this type can identify an instance
    ///
    /// Keys are integers, strings or 16-byte binary UUIDs.
    pub fn is_key_type(&self) -> bool {
        self.is_integer()
            || matches!(
                self,
                ScalarType::String { .. } | ScalarType::Binary { max_len: Some(16) }
            )
    }

    /// Whether values of this type are integers
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ScalarType::TinyInt | ScalarType::SmallInt | ScalarType::Integer | ScalarType::BigInt
        )
    }

    /// Decode a raw backend value (or a caller-supplied value) into this type
    ///
    /// Row stores only return storage classes (integer, real, text, blob);
    /// this restores the declared type. Already-typed values pass through.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when the value cannot represent this type.
    pub fn decode(&self, field: &str, raw: Value) -> Result<Value> {
        let mismatch = |raw: &Value| Error::TypeMismatch {
            field: field.to_string(),
            expected: self.to_string(),
            actual: raw.type_name(),
        };

        if raw.is_null() {
            return Ok(Value::Null);
        }

        let decoded = match (self, raw) {
            (ScalarType::Boolean, Value::Bool(b)) => Value::Bool(b),
            (ScalarType::Boolean, Value::Int(i)) if i == 0 || i == 1 => Value::Bool(i == 1),

            (ScalarType::TinyInt, Value::Int(i)) if i8::try_from(i).is_ok() => Value::Int(i),
            (ScalarType::SmallInt, Value::Int(i)) if i16::try_from(i).is_ok() => Value::Int(i),
            (ScalarType::Integer, Value::Int(i)) if i32::try_from(i).is_ok() => Value::Int(i),
            (ScalarType::BigInt, Value::Int(i)) => Value::Int(i),

            (ScalarType::Float | ScalarType::Double, Value::Float(f)) => Value::Float(f),
            (ScalarType::Float | ScalarType::Double, Value::Int(i)) => Value::Float(i as f64),

            (ScalarType::Decimal { .. }, Value::Decimal(d)) => Value::Decimal(d),
            (ScalarType::Decimal { .. }, Value::Text(t)) => Value::Decimal(t),
            (ScalarType::Decimal { .. }, Value::Int(i)) => Value::Decimal(i.to_string()),
            (ScalarType::Decimal { .. }, Value::Float(f)) => Value::Decimal(f.to_string()),

            (ScalarType::String { max_len }, Value::Text(s)) => {
                if let Some(max) = max_len {
                    if s.chars().count() > *max as usize {
                        return Err(Error::illegal(format!(
                            "value for {} exceeds {} characters",
                            field, max
                        )));
                    }
                }
                Value::Text(s)
            }

            (ScalarType::Binary { .. }, Value::Bytes(b)) => Value::Bytes(b),

            (ScalarType::Date, Value::Date(d)) => Value::Date(d),
            (ScalarType::Date, Value::Text(t)) => NaiveDate::parse_from_str(&t, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| mismatch(&Value::Text(t)))?,

            (ScalarType::Time, Value::Time(t)) => Value::Time(t),
            (ScalarType::Time, Value::Text(t)) => NaiveTime::parse_from_str(&t, "%H:%M:%S%.f")
                .map(Value::Time)
                .map_err(|_| mismatch(&Value::Text(t)))?,

            (ScalarType::DateTime, Value::DateTime(dt)) => Value::DateTime(dt),
            (ScalarType::DateTime, Value::Text(t)) => {
                NaiveDateTime::parse_from_str(&t, "%Y-%m-%d %H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(&t, "%Y-%m-%dT%H:%M:%S%.f"))
                    .map(Value::DateTime)
                    .map_err(|_| mismatch(&Value::Text(t)))?
            }

            (ScalarType::Other(_), other) => other,

            (_, other) => return Err(mismatch(&other)),
        };
        Ok(decoded)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Boolean => write!(f, "boolean"),
            ScalarType::TinyInt => write!(f, "tinyint"),
            ScalarType::SmallInt => write!(f, "smallint"),
            ScalarType::Integer => write!(f, "integer"),
            ScalarType::BigInt => write!(f, "bigint"),
            ScalarType::Float => write!(f, "float"),
            ScalarType::Double => write!(f, "double"),
            ScalarType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            ScalarType::String { max_len: Some(n) } => write!(f, "string({})", n),
            ScalarType::String { max_len: None } => write!(f, "string"),
            ScalarType::Binary { max_len: Some(n) } => write!(f, "binary({})", n),
            ScalarType::Binary { max_len: None } => write!(f, "binary"),
            ScalarType::Date => write!(f, "date"),
            ScalarType::Time => write!(f, "time"),
            ScalarType::DateTime => write!(f, "datetime"),
            ScalarType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// One field of an entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name used by records and drafts
    pub name: String,
    /// Column name in the backing table
    pub column: String,
    /// Declared scalar type
    pub scalar_type: ScalarType,
    /// Whether NULL is allowed
    pub nullable: bool,
}

impl FieldDef {
    /// Non-null field whose column name is the snake_case field name
    pub fn new(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        let name = name.into();
        FieldDef {
            column: to_snake_case(&name),
            name,
            scalar_type,
            nullable: false,
        }
    }

    /// Override the column name
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Allow NULL
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// How identity keys are assigned to new instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdAssignment {
    /// Drafts must carry their key
    #[default]
    Caller,
    /// The backend generates the key on INSERT
    Backend,
    /// The store allocates `max(key) + 1` from a local counter
    Sequence,
}

/// Secondary index declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name
    pub name: String,
    /// Indexed field names, in order
    pub fields: Vec<String>,
    /// UNIQUE constraint
    pub unique: bool,
    /// Clustered storage order (dialect-specific)
    pub clustered: bool,
}

impl IndexDef {
    /// Non-unique, non-clustered index over `fields`
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IndexDef {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
            clustered: false,
        }
    }

    /// Mark as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as clustered
    pub fn clustered(mut self) -> Self {
        self.clustered = true;
        self
    }
}

/// Registered schema descriptor
#[derive(Debug, Clone)]
pub struct EntityType {
    name: String,
    table: String,
    fields: Vec<FieldDef>,
    key_index: usize,
    id_assignment: IdAssignment,
    indexes: Vec<IndexDef>,
}

impl EntityType {
    /// Start declaring an entity type
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder::new(name)
    }

    /// Unique type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// The identity field
    pub fn key_field(&self) -> &FieldDef {
        &self.fields[self.key_index]
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by column name
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.column.eq_ignore_ascii_case(column))
    }

    /// Fields other than the identity field, in declaration order
    pub fn value_fields(&self) -> impl Iterator<Item = &FieldDef> {
        let key = self.key_index;
        self.fields
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != key)
            .map(|(_, f)| f)
    }

    /// Id-assignment strategy
    pub fn id_assignment(&self) -> IdAssignment {
        self.id_assignment
    }

    /// Declared secondary indexes
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Extract the identity key from a record
    pub fn key_of(&self, record: &Record) -> Option<EntityKey> {
        record
            .get(&self.key_field().name)
            .and_then(EntityKey::from_value)
    }

    /// Check that a complete record satisfies the schema
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` for unknown fields or missing non-null
    /// values, `TypeMismatch` for values of the wrong type.
    pub fn check_record(&self, record: &Record) -> Result<()> {
        for (name, _) in record.iter() {
            if self.field(name).is_none() {
                return Err(Error::illegal(format!(
                    "{} has no field '{}'",
                    self.name, name
                )));
            }
        }
        for field in &self.fields {
            match record.get(&field.name) {
                None | Some(Value::Null) if !field.nullable => {
                    return Err(Error::illegal(format!(
                        "{}.{} is not nullable",
                        self.name, field.name
                    )));
                }
                Some(value) => {
                    field.scalar_type.decode(&field.name, value.clone())?;
                }
                None => {}
            }
        }
        Ok(())
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EntityType {}

impl Hash for EntityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Builder for [`EntityType`]
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldDef>,
    key: Option<String>,
    id_assignment: IdAssignment,
    indexes: Vec<IndexDef>,
}

impl EntityTypeBuilder {
    fn new(name: impl Into<String>) -> Self {
        EntityTypeBuilder {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            key: None,
            id_assignment: IdAssignment::Caller,
            indexes: Vec::new(),
        }
    }

    /// Backing table name (defaults to the snake_case type name)
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Declare the identity field
    pub fn key(mut self, name: impl Into<String>, scalar_type: ScalarType) -> Self {
        let def = FieldDef::new(name, scalar_type);
        self.key = Some(def.name.clone());
        self.fields.push(def);
        self
    }

    /// Declare a non-null field
    pub fn field(self, name: impl Into<String>, scalar_type: ScalarType) -> Self {
        self.field_def(FieldDef::new(name, scalar_type))
    }

    /// Declare a nullable field
    pub fn nullable_field(self, name: impl Into<String>, scalar_type: ScalarType) -> Self {
        self.field_def(FieldDef::new(name, scalar_type).nullable())
    }

    /// Declare a fully specified field
    pub fn field_def(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    /// Id-assignment strategy
    pub fn id_assignment(mut self, strategy: IdAssignment) -> Self {
        self.id_assignment = strategy;
        self
    }

    /// Declare a secondary index
    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Validate and freeze the descriptor
    ///
    /// # Errors
    ///
    /// Returns `IllegalArgument` when a name is empty, a field or column is
    /// declared twice, the key is missing or nullable, the key type cannot
    /// form an identity key, an index references an unknown field, or a
    /// generated key is not an integer.
    pub fn build(self) -> Result<EntityType> {
        if self.name.trim().is_empty() {
            return Err(Error::illegal("entity type name must not be empty"));
        }
        let table = self.table.unwrap_or_else(|| to_snake_case(&self.name));
        if table.trim().is_empty() {
            return Err(Error::illegal(format!("{}: table name must not be empty", self.name)));
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() || field.column.is_empty() {
                return Err(Error::illegal(format!(
                    "{}: field and column names must not be empty",
                    self.name
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(Error::illegal(format!(
                    "{}: field '{}' declared twice",
                    self.name, field.name
                )));
            }
            if !columns.insert(field.column.to_ascii_lowercase()) {
                return Err(Error::illegal(format!(
                    "{}: column '{}' declared twice",
                    self.name, field.column
                )));
            }
        }

        let key = self
            .key
            .ok_or_else(|| Error::illegal(format!("{}: no key field declared", self.name)))?;
        let key_index = self
            .fields
            .iter()
            .position(|f| f.name == key)
            .ok_or_else(|| Error::illegal(format!("{}: key field missing", self.name)))?;
        let key_field = &self.fields[key_index];
        if key_field.nullable {
            return Err(Error::illegal(format!(
                "{}: key field '{}' must not be nullable",
                self.name, key
            )));
        }
        if !key_field.scalar_type.is_key_type() {
            return Err(Error::illegal(format!(
                "{}: key field '{}' has type {}; keys must be integer, string or binary(16)",
                self.name, key, key_field.scalar_type
            )));
        }
        if self.id_assignment != IdAssignment::Caller && !key_field.scalar_type.is_integer() {
            return Err(Error::illegal(format!(
                "{}: generated keys require an integer key field",
                self.name
            )));
        }

        for index in &self.indexes {
            if index.name.is_empty() || index.fields.is_empty() {
                return Err(Error::illegal(format!(
                    "{}: index needs a name and at least one field",
                    self.name
                )));
            }
            if let Some(missing) = index.fields.iter().find(|f| !names.contains(f.as_str())) {
                return Err(Error::illegal(format!(
                    "{}: index '{}' references unknown field '{}'",
                    self.name, index.name, missing
                )));
            }
        }

        Ok(EntityType {
            name: self.name,
            table,
            fields: self.fields,
            key_index,
            id_assignment: self.id_assignment,
            indexes: self.indexes,
        })
    }
}

/// Field values of one entity, keyed by field name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    /// Empty record
    pub fn new() -> Self {
        Record::default()
    }

    /// Builder-style set
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field value, returning the previous one
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(field.into(), value.into())
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Remove a field value
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    /// Whether the field has a value
    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Iterate (field, value) pairs in field-name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Overwrite this record's values with those of `other`
    pub fn merge(&mut self, other: &Record) {
        for (k, v) in other.iter() {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// Number of fields with values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no field has a value
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

/// `firstName` -> `first_name`, `Person` -> `person`
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}

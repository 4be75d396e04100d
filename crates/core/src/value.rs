//! Value types for Tessera
//!
//! This module defines:
//! - Value: the field value carried by records, drafts and row-store rows
//! - EntityKey: the hashable identity value of a canonical instance
//!
//! ## Type Rules
//!
//! - No implicit coercions between variants: `Int(1) != Float(1.0)`
//! - Float equality follows IEEE-754: `NaN != NaN`
//! - Coercion from raw backend values into a declared type happens only in
//!   [`ScalarType::decode`](crate::schema::ScalarType::decode)

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Field value
///
/// Row stores hand back a subset of these variants (Null, Int, Float, Text,
/// Bytes); the richer variants appear after decoding against a field's
/// declared scalar type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// Exact decimal, kept in its canonical text form
    Decimal(String),
    /// UTF-8 string
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Date and time without zone
    DateTime(NaiveDateTime),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Decimal(_) => "Decimal",
            Value::Text(_) => "Text",
            Value::Bytes(_) => "Bytes",
            Value::Date(_) => "Date",
            Value::Time(_) => "Time",
            Value::DateTime(_) => "DateTime",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as &str if this is a Text value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get as &[u8] if this is a Bytes value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::DateTime(dt) => write!(f, "{}", dt),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Time(t)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Identity key of a canonical instance
///
/// Stable for the object's lifetime: once assigned it never changes.
/// Hashable and totally ordered so it can key the identity map and sort
/// batch requests deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKey {
    /// Integer key (auto-generated keys are always integers)
    Int(i64),
    /// Text key
    Text(String),
    /// UUID key
    Uuid(Uuid),
}

impl EntityKey {
    /// Convert a field value into a key
    ///
    /// Text that parses as a UUID stays text: the key variant follows the
    /// value variant, never the content.
    pub fn from_value(value: &Value) -> Option<EntityKey> {
        match value {
            Value::Int(i) => Some(EntityKey::Int(*i)),
            Value::Text(s) => Some(EntityKey::Text(s.clone())),
            Value::Bytes(b) => Uuid::from_slice(b).ok().map(EntityKey::Uuid),
            _ => None,
        }
    }

    /// Convert into the value bound as a statement parameter
    pub fn to_value(&self) -> Value {
        match self {
            EntityKey::Int(i) => Value::Int(*i),
            EntityKey::Text(s) => Value::Text(s.clone()),
            EntityKey::Uuid(u) => Value::Bytes(u.as_bytes().to_vec()),
        }
    }

    /// Get the integer if this is an Int key
    pub fn as_int(&self) -> Option<i64> {
        match self {
            EntityKey::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(i) => write!(f, "{}", i),
            EntityKey::Text(s) => write!(f, "{}", s),
            EntityKey::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(i: i64) -> Self {
        EntityKey::Int(i)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        EntityKey::Text(s.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        EntityKey::Text(s)
    }
}

impl From<Uuid> for EntityKey {
    fn from(u: Uuid) -> Self {
        EntityKey::Uuid(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_different_types_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Text("1".into()), Value::Int(1));
        assert_ne!(Value::Decimal("1.5".into()), Value::Text("1.5".into()));
    }

    #[test]
    fn test_float_ieee_equality() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }

    #[test]
    fn test_key_value_conversion() {
        let key = EntityKey::from_value(&Value::Int(7)).unwrap();
        assert_eq!(key, EntityKey::Int(7));
        assert_eq!(key.to_value(), Value::Int(7));

        let id = Uuid::new_v4();
        let key = EntityKey::Uuid(id);
        assert_eq!(EntityKey::from_value(&key.to_value()), Some(key));

        assert!(EntityKey::from_value(&Value::Null).is_none());
        assert!(EntityKey::from_value(&Value::Float(1.0)).is_none());
    }

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![EntityKey::Int(3), EntityKey::Int(1), EntityKey::Int(2)];
        keys.sort();
        assert_eq!(keys, vec![EntityKey::Int(1), EntityKey::Int(2), EntityKey::Int(3)]);
    }
}

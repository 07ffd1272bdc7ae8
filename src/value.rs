//! Scalar values and attribute records.
//!
//! Projected query results are maps from attribute name to a closed set of
//! scalar kinds rather than open-ended dynamic values, so every supported
//! attribute type is spelled out here.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::StorageError;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// An attribute map for one stored row. Ordered so serializations are
/// deterministic.
pub type Record = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Total ordering used by sort descriptors. Values order by kind first
    /// (null < bool < numeric < string < bytes); integers and doubles compare
    /// numerically against each other.
    pub fn compare(&self, other: &Value) -> Ordering {
        fn rank(value: &Value) -> u8 {
            match value {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Integer(_) | Value::Double(_) => 2,
                Value::String(_) => 3,
                Value::Bytes(_) => 4,
            }
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Integer(a), Value::Double(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Double(a), Value::Integer(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Equality used by predicates: numeric values compare across the
    /// integer/double divide.
    pub fn semantically_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Double(b)) | (Value::Double(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Convert a JSON value into a `Value`. Arrays and objects have no attribute
/// representation and are rejected.
pub(crate) fn value_from_json(json: &serde_json::Value) -> Result<Value, StorageError> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if let Some(d) = n.as_f64() {
                Ok(Value::Double(d))
            } else {
                Err(StorageError::InvalidType)
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Array(items) => {
            // Byte arrays are the one structured shape we accept.
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let byte = item
                    .as_u64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or(StorageError::InvalidType)?;
                bytes.push(byte);
            }
            Ok(Value::Bytes(bytes))
        }
        serde_json::Value::Object(_) => Err(StorageError::InvalidType),
    }
}

pub(crate) fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Double(d) => serde_json::Value::from(*d),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::Array(
            b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
        ),
    }
}

pub(crate) fn record_from_json(json: serde_json::Value) -> Result<Record, StorageError> {
    let object = match json {
        serde_json::Value::Object(map) => map,
        _ => return Err(StorageError::InvalidType),
    };
    let mut record = Record::new();
    for (name, value) in &object {
        record.insert(name.clone(), value_from_json(value)?);
    }
    Ok(record)
}

pub(crate) fn record_to_json(record: &Record) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for (name, value) in record {
        object.insert(name.clone(), value_to_json(value));
    }
    serde_json::Value::Object(object)
}

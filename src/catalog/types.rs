//! Data types for scopedb
//!
//! This module defines the column value types supported by the schema graph.

use crate::storage::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Boolean type
    Boolean,
    /// Signed 64-bit integer
    Integer,
    /// Double-precision floating point
    Number,
    /// UTF-8 string
    String,
    /// Milliseconds since the Unix epoch
    DateTime,
    /// Opaque binary data
    Bytes,
    /// Opaque structured payload, never indexed or compared
    Object,
}

impl DataType {
    /// Check if this type is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Number)
    }

    /// Check if values of this type can be ordered and range-compared
    pub fn is_comparable_with(&self, other: &DataType) -> bool {
        match (self, other) {
            (DataType::Object, _) | (_, DataType::Object) => false,
            (a, b) if a == b => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            _ => false,
        }
    }

    /// Check whether a runtime value may be stored in a column of this type.
    ///
    /// `Null` is accepted here; nullability is checked against the column.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::Boolean, Value::Boolean(_)) => true,
            (DataType::Integer, Value::Integer(_)) => true,
            (DataType::Number, Value::Integer(_) | Value::Number(_)) => true,
            (DataType::String, Value::String(_)) => true,
            (DataType::DateTime, Value::DateTime(_)) => true,
            (DataType::Bytes, Value::Bytes(_)) => true,
            (DataType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Number => write!(f, "NUMBER"),
            DataType::String => write!(f, "STRING"),
            DataType::DateTime => write!(f, "DATE_TIME"),
            DataType::Bytes => write!(f, "BYTES"),
            DataType::Object => write!(f, "OBJECT"),
        }
    }
}

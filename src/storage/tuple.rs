//! Row and Value types for scopedb
//!
//! This module defines how data values are represented in memory.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// A value in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value (64-bit)
    Integer(i64),
    /// Floating point value (64-bit)
    Number(f64),
    /// String value
    String(String),
    /// Milliseconds since the Unix epoch
    DateTime(i64),
    /// Binary data
    Bytes(Vec<u8>),
    /// Structured payload
    Object(serde_json::Value),
}

// Floats compare bitwise so that a value always equals itself.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to borrow as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::DateTime(t) => Some(*t),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::Number(_) => "NUMBER",
            Value::String(_) => "STRING",
            Value::DateTime(_) => "DATE_TIME",
            Value::Bytes(_) => "BYTES",
            Value::Object(_) => "OBJECT",
        }
    }

    /// Compare two non-null values of compatible types.
    ///
    /// Returns `None` when either side is NULL or the types are incompatible;
    /// callers decide what an unordered comparison means.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Number(b)) => (*a as f64).partial_cmp(b),
            (Value::Number(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "'{}'", s),
            Value::DateTime(t) => write!(f, "@{}", t),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Object(o) => write!(f, "{}", o),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Row identifier, unique across all tables of a process
pub type RowId = u64;

static NEXT_ROW_ID: AtomicU64 = AtomicU64::new(1);

/// Reserve a fresh row id
pub fn next_row_id() -> RowId {
    NEXT_ROW_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A row: an identifier plus one value per table column, in column order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    id: RowId,
    values: Vec<Value>,
}

impl Row {
    /// Create a row with a freshly allocated id
    pub fn new(values: Vec<Value>) -> Self {
        Self::with_id(next_row_id(), values)
    }

    /// Create a row with an explicit id, e.g. to replace an existing row
    pub fn with_id(id: RowId, values: Vec<Value>) -> Self {
        Self { id, values }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    /// Get value at position
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Replace the value at position, returning the previous one
    pub fn set(&mut self, index: usize, value: Value) -> Option<Value> {
        self.values
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, value))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

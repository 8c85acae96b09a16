//! Dynamically typed items and keys flowing through pipes

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::error::{Error, Result};

/// An item produced by a stream pipe or stored in a keyed pipe
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Heterogeneous list
    List(Vec<Value>),
    /// Materialized batch
    Chunk(Chunk<Value>),
}

impl Value {
    /// Name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Chunk(_) => "chunk",
        }
    }

    /// Get the value as an integer
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(Error::TypeMismatch(format!("expected int, got {}", other.kind()))),
        }
    }

    /// Get the value as a boolean
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(Error::TypeMismatch(format!("expected bool, got {}", other.kind()))),
        }
    }

    /// Get the value as a string slice
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(v) => Ok(v),
            other => Err(Error::TypeMismatch(format!("expected str, got {}", other.kind()))),
        }
    }

    /// Get the value as a chunk
    pub fn as_chunk(&self) -> Result<&Chunk<Value>> {
        match self {
            Value::Chunk(v) => Ok(v),
            other => Err(Error::TypeMismatch(format!("expected chunk, got {}", other.kind()))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Chunk(chunk) => write!(f, "{chunk}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Chunk<Value>> for Value {
    fn from(v: Chunk<Value>) -> Self {
        Value::Chunk(v)
    }
}

/// A hashable key used to index keyed pipes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    /// Integer key
    Int(i64),
    /// String key
    Str(String),
    /// Composite key
    Tuple(Vec<Key>),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{v}"),
            Key::Str(v) => write!(f, "{v:?}"),
            Key::Tuple(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl TryFrom<usize> for Key {
    type Error = Error;

    fn try_from(v: usize) -> Result<Self> {
        i64::try_from(v)
            .map(Key::Int)
            .map_err(|_| Error::InvalidArgument(format!("index {v} does not fit a key")))
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Str(v.to_owned())
    }
}

impl TryFrom<&Value> for Key {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(Key::Int(*v)),
            Value::Str(v) => Ok(Key::Str(v.clone())),
            Value::List(items) => items
                .iter()
                .map(Key::try_from)
                .collect::<Result<Vec<_>>>()
                .map(Key::Tuple),
            other => Err(Error::TypeMismatch(format!(
                "{} values are not hashable",
                other.kind()
            ))),
        }
    }
}

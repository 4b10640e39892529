//! The tuple/value types shared across the marble writer/reader, the
//! predicate evaluator, and the pipeline stages.

use serde::{Deserialize, Serialize};

/// A single field value flowing through the pipeline. Decoded columns
/// (TRIE → looked-up string, LZ4 → decompressed bytes, integers → widened
/// to `i64`) all collapse to one of these three shapes so stage processors
/// never need to match on the column's storage encoding.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Bytes(v.into_bytes())
    }
}

/// A single output row: projected values in select-list order, plus the
/// routing label the pipeline attaches to every emitted record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    pub values: Vec<Value>,
    pub label: u32,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, label: 0 }
    }

    pub fn with_label(values: Vec<Value>, label: u32) -> Self {
        Self { values, label }
    }
}

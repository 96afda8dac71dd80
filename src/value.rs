//! Dynamic runtime value all derived artifacts operate on.
//!
//! Artifacts are pre-built closures, not reflective lookups, so they need a
//! single value representation to flow through: `Value`. Floats are wrapped
//! in `OrderedFloat` for total equality; records keep property declaration
//! order via `IndexMap` so encoders are deterministic.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Absent marker for nullable shapes (and the cycle-guard default).
    Null,
    Unit,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(OrderedFloat<f64>),
    Str(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Seq(Vec<Value>),
    /// Object instances; keys follow property declaration order.
    Record(IndexMap<String, Value>),
    /// Dictionary instances; pair list keeps insertion order, last key wins.
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn float(f: f64) -> Self {
        Value::Float(OrderedFloat(f))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Seq(_) => "seq",
            Value::Record(_) => "record",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(xs) => Some(xs),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(m) => Some(m),
            _ => None,
        }
    }

    /// Build the runtime error for "expected X, found this value".
    pub fn mismatch(&self, expected: &'static str) -> CodecError {
        CodecError::TypeMismatch {
            expected,
            found: self.kind_name(),
        }
    }
}

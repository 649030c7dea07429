//! Runtime values for sentinels, defaults, and annotation payloads.

use crate::types::TypeRef;
use serde::{Deserialize, Serialize};

/// A value carried by an annotation or a sentinel facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Structured JSON payload.
    Json(serde_json::Value),
}

impl Value {
    /// Check whether this value is assignable to (or convertible to) the
    /// given runtime type.
    ///
    /// Null requires a nullable type. Well-known scalar names are checked by
    /// kind; for user-defined types any non-null value is accepted, since a
    /// registered conversion may apply.
    pub fn fits(&self, ty: &TypeRef) -> bool {
        if matches!(self, Value::Null) {
            return ty.is_nullable();
        }
        let target = ty.underlying().unwrap_or(ty);
        match target.name() {
            "bool" => matches!(self, Value::Bool(_)),
            "i32" => matches!(self, Value::Int(v) if i32::try_from(*v).is_ok()),
            "i64" => matches!(self, Value::Int(_)),
            "f64" => matches!(self, Value::Float(_) | Value::Int(_)),
            "string" => matches!(self, Value::String(_)),
            "bytes" => matches!(self, Value::Bytes(_)),
            _ => true,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
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

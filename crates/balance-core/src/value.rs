//! Typed scalar values for diagnostic table cells.

use serde::{Deserialize, Serialize};

/// A single typed cell value.
///
/// Absence (a column a source file never had) is represented as
/// `Option<Value>::None` at the table layer, never as a sentinel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// Numeric view of this value. Bools promote to 0/1, strings do not
    /// coerce.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Str(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Parse a raw CSV field into a typed value.
    ///
    /// Inference order: empty → None, i64, f64, bool, else string.
    pub fn parse_field(field: &str) -> Option<Value> {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return Some(Value::Int(v));
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            return Some(Value::Float(v));
        }
        match trimmed {
            "true" | "True" | "TRUE" => return Some(Value::Bool(true)),
            "false" | "False" | "FALSE" => return Some(Value::Bool(false)),
            _ => {}
        }
        Some(Value::Str(trimmed.to_string()))
    }

    /// Render for display and group keys.
    pub fn render(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Str(s) => s.clone(),
        }
    }
}

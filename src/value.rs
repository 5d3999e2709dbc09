//! Parsed cell values
//!
//! [`Value`] is the tagged variant every cell parser produces and every
//! exporter matches over. Records and maps preserve insertion order so
//! canonical emission round-trips.

use indexmap::IndexMap;
use serde_json::json;

/// A typed value parsed from a cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw bytes (`hexbytes` / `base64bytes` columns)
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    /// Name-keyed record fields in declaration order
    Record(IndexMap<String, Value>),
    /// Map entries keyed by the canonical reformat of the key
    Map(IndexMap<String, Value>),
    /// The name of a registered type (`type` / ancestor / tag columns)
    TypeName(String),
}

impl Value {
    /// Short kind label used in report messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Tuple(_) => "tuple",
            Value::Record(_) => "record",
            Value::Map(_) => "map",
            Value::TypeName(_) => "type",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Numeric view, unifying ints and floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::TypeName(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a JSON value for format emitters.
    ///
    /// Tuples and arrays both become JSON arrays; records and maps become
    /// objects in insertion order; bytes become uppercase hex strings (the
    /// binary-capable formats re-read the `Value` directly).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::Str(s) => json!(s),
            Value::Bytes(b) => json!(hex_upper(b)),
            Value::Array(items) | Value::Tuple(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Record(fields) | Value::Map(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::TypeName(name) => json!(name),
        }
    }
}

pub(crate) fn hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// The full result of parsing one cell
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCell {
    /// Original cell text; empty if a default fired
    pub raw: String,
    /// Expression output, identical to `raw` when the cell held no expression
    pub evaluated: String,
    /// The typed value
    pub parsed: Value,
    /// Canonical text for round-trip emission
    pub reformatted: String,
}

impl ParsedCell {
    /// A cell that parsed to nil with no surviving text
    pub fn nil() -> Self {
        Self {
            raw: String::new(),
            evaluated: String::new(),
            parsed: Value::Nil,
            reformatted: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(Value::Int(1).kind_name(), "integer");
        assert_eq!(Value::Tuple(vec![]).kind_name(), "tuple");
    }

    #[test]
    fn test_to_json_preserves_order() {
        let mut fields = IndexMap::new();
        fields.insert("b".to_string(), Value::Int(1));
        fields.insert("a".to_string(), Value::Int(2));
        let json = Value::Record(fields).to_json();
        let keys: Vec<_> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(Value::Str("x".into()).as_f64(), None);
    }
}

use super::namespace::MetaNamespace;
use crate::error::{Error, Result};
use serde_json::{Number, Value};

/// A typed metadata value.
///
/// Integers keep their signedness and floats stay floats through a JSON
/// round trip. Two integer cells compare equal when they hold the same
/// number, since JSON carries no signedness and non-negative integers
/// always load as `UInt64`.
#[derive(Debug, Clone)]
pub enum MetaValue {
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    String(String),
    Namespace(MetaNamespace),
    List(Vec<MetaValue>),
}

impl MetaValue {
    /// Convert a JSON value. `null` has no counterpart and yields `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        let converted = match value {
            Value::Null => return None,
            Value::Bool(b) => MetaValue::Bool(*b),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    MetaValue::UInt64(u)
                } else if let Some(i) = n.as_i64() {
                    MetaValue::Int64(i)
                } else {
                    MetaValue::Float64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => MetaValue::String(s.clone()),
            Value::Array(items) => {
                MetaValue::List(items.iter().filter_map(MetaValue::from_json).collect())
            }
            Value::Object(map) => MetaValue::Namespace(MetaNamespace::from_json_map(map)),
        };
        Some(converted)
    }

    pub fn to_json(&self) -> Value {
        match self {
            MetaValue::Bool(b) => Value::Bool(*b),
            MetaValue::Int64(i) => Value::Number(Number::from(*i)),
            MetaValue::UInt64(u) => Value::Number(Number::from(*u)),
            // Non-finite floats have no JSON form
            MetaValue::Float64(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            MetaValue::String(s) => Value::String(s.clone()),
            MetaValue::Namespace(ns) => ns.to_json(),
            MetaValue::List(items) => Value::Array(items.iter().map(MetaValue::to_json).collect()),
        }
    }

    /// Short type name used in mismatch errors and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            MetaValue::Bool(_) => "bool",
            MetaValue::Int64(_) => "int64",
            MetaValue::UInt64(_) => "uint64",
            MetaValue::Float64(_) => "float64",
            MetaValue::String(_) => "string",
            MetaValue::Namespace(_) => "namespace",
            MetaValue::List(_) => "list",
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            MetaValue::Bool(b) => Ok(*b),
            other => Err(Error::type_mismatch(other.type_name(), "bool")),
        }
    }

    /// Integer accessor; a `UInt64` is accepted when it fits.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            MetaValue::Int64(i) => Ok(*i),
            MetaValue::UInt64(u) => {
                i64::try_from(*u).map_err(|_| Error::type_mismatch("uint64 out of range", "int64"))
            }
            other => Err(Error::type_mismatch(other.type_name(), "int64")),
        }
    }

    /// Unsigned accessor; a non-negative `Int64` is accepted.
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            MetaValue::UInt64(u) => Ok(*u),
            MetaValue::Int64(i) => {
                u64::try_from(*i).map_err(|_| Error::type_mismatch("negative int64", "uint64"))
            }
            other => Err(Error::type_mismatch(other.type_name(), "uint64")),
        }
    }

    /// Strict float accessor. Integers are rejected.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            MetaValue::Float64(f) => Ok(*f),
            other => Err(Error::type_mismatch(other.type_name(), "float64")),
        }
    }

    /// Any numeric cell widened to f64, for quantities such as rates where
    /// producers disagree on integer vs float.
    pub fn as_number(&self) -> Result<f64> {
        match self {
            MetaValue::Float64(f) => Ok(*f),
            MetaValue::Int64(i) => Ok(*i as f64),
            MetaValue::UInt64(u) => Ok(*u as f64),
            other => Err(Error::type_mismatch(other.type_name(), "number")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            MetaValue::String(s) => Ok(s),
            other => Err(Error::type_mismatch(other.type_name(), "string")),
        }
    }

    pub fn as_namespace(&self) -> Result<&MetaNamespace> {
        match self {
            MetaValue::Namespace(ns) => Ok(ns),
            other => Err(Error::type_mismatch(other.type_name(), "namespace")),
        }
    }

    pub fn as_list(&self) -> Result<&[MetaValue]> {
        match self {
            MetaValue::List(items) => Ok(items),
            other => Err(Error::type_mismatch(other.type_name(), "list")),
        }
    }
}

impl PartialEq for MetaValue {
    fn eq(&self, other: &Self) -> bool {
        use MetaValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (UInt64(a), UInt64(b)) => a == b,
            (Int64(a), UInt64(b)) | (UInt64(b), Int64(a)) => u64::try_from(*a) == Ok(*b),
            (Float64(a), Float64(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Namespace(a), Namespace(b)) => a == b,
            (List(a), List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int64(v)
    }
}

impl From<i32> for MetaValue {
    fn from(v: i32) -> Self {
        MetaValue::Int64(v as i64)
    }
}

impl From<u64> for MetaValue {
    fn from(v: u64) -> Self {
        MetaValue::UInt64(v)
    }
}

impl From<u32> for MetaValue {
    fn from(v: u32) -> Self {
        MetaValue::UInt64(v as u64)
    }
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        MetaValue::UInt64(v as u64)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float64(v)
    }
}

impl From<f32> for MetaValue {
    fn from(v: f32) -> Self {
        MetaValue::Float64(v as f64)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::String(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::String(v)
    }
}

impl From<MetaNamespace> for MetaValue {
    fn from(v: MetaNamespace) -> Self {
        MetaValue::Namespace(v)
    }
}

impl From<Vec<MetaValue>> for MetaValue {
    fn from(v: Vec<MetaValue>) -> Self {
        MetaValue::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_number_kinds() {
        assert_eq!(MetaValue::from_json(&json!(5)), Some(MetaValue::UInt64(5)));
        assert!(matches!(MetaValue::from_json(&json!(-5)), Some(MetaValue::Int64(-5))));
        assert!(matches!(
            MetaValue::from_json(&json!(1000000.0)),
            Some(MetaValue::Float64(f)) if f == 1_000_000.0
        ));
        assert_eq!(MetaValue::from_json(&Value::Null), None);
    }

    #[test]
    fn test_float_survives_json_text() {
        let text = serde_json::to_string(&MetaValue::Float64(1_000_000.0).to_json()).unwrap();
        assert_eq!(text, "1000000.0");
        let back: Value = serde_json::from_str(&text).unwrap();
        assert!(matches!(MetaValue::from_json(&back), Some(MetaValue::Float64(_))));
    }

    #[test]
    fn test_integer_equality_across_signedness() {
        assert_eq!(MetaValue::Int64(7), MetaValue::UInt64(7));
        assert_ne!(MetaValue::Int64(-1), MetaValue::UInt64(u64::MAX));
        assert_ne!(MetaValue::UInt64(7), MetaValue::Float64(7.0));
    }

    #[test]
    fn test_accessors_fail_on_mismatch() {
        let v = MetaValue::from("hello");
        assert_eq!(v.as_str().unwrap(), "hello");
        assert!(v.as_u64().is_err());
        assert!(MetaValue::UInt64(3).as_f64().is_err());
        assert_eq!(MetaValue::UInt64(3).as_number().unwrap(), 3.0);
        assert!(MetaValue::Int64(-3).as_u64().is_err());
    }
}

//! Literal values carried by query trees and bound parameters.
//!
//! Documents themselves are plain `serde_json::Value`s; `Scalar` is the
//! typed form used wherever a value participates in a query signature.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::DataType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Scalar>),
    Object(Vec<(String, Scalar)>),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            // Null carries no type of its own; Json is the widest slot.
            Scalar::Null => DataType::Json,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::Int(_) => DataType::Int64,
            Scalar::Float(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
            Scalar::Array(items) => {
                let elem = items
                    .iter()
                    .find(|s| !s.is_null())
                    .map(|s| s.data_type())
                    .unwrap_or(DataType::Json);
                DataType::Array(Box::new(elem))
            }
            Scalar::Object(_) => DataType::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::Str(s) => Value::String(s.clone()),
            Scalar::Array(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
            Scalar::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn from_json(v: &Value) -> Scalar {
        match v {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Scalar::Str(s.clone()),
            Value::Array(items) => Scalar::Array(items.iter().map(Scalar::from_json).collect()),
            Value::Object(map) => Scalar::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Scalar::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Rendering used in command logs: strings bare, everything else as JSON.
    pub fn to_log_string(&self) -> String {
        match self {
            Scalar::Null => "NULL".to_string(),
            Scalar::Str(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

impl<T: Into<Scalar>> From<Vec<T>> for Scalar {
    fn from(v: Vec<T>) -> Self {
        Scalar::Array(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion_keeps_integers() {
        let s = Scalar::from_json(&json!({"id": "ALFKI", "n": 3, "f": 1.5}));
        match &s {
            Scalar::Object(fields) => {
                assert_eq!(fields[0], ("id".to_string(), Scalar::Str("ALFKI".into())));
                assert_eq!(fields[1].1, Scalar::Int(3));
                assert_eq!(fields[2].1, Scalar::Float(1.5));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.to_json(), json!({"id": "ALFKI", "n": 3, "f": 1.5}));
    }

    #[test]
    fn array_type_skips_nulls() {
        let s = Scalar::from(vec![Scalar::Null, Scalar::from("a")]);
        assert_eq!(s.data_type(), DataType::Array(Box::new(DataType::Utf8)));
        assert_eq!(Scalar::Null.data_type(), DataType::Json);
    }

    #[test]
    fn log_rendering() {
        assert_eq!(Scalar::from("London").to_log_string(), "London");
        assert_eq!(Scalar::from(10i64).to_log_string(), "10");
        assert_eq!(Scalar::from(vec!["A", "B"]).to_log_string(), r#"["A","B"]"#);
    }
}

//! Function implementations for both evaluators.
//!
//! `call_method` serves client-side evaluation (query-text method names),
//! `call_store_function` serves the in-memory store (dialect names). Both
//! share the same string and math kernels.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::EvalError;
use crate::value::{as_f64, as_i64, float, type_name, values_equal};

/// A user-registered function that only runs on the client.
pub type ClientFn = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// Registry of client-only functions, addressed by qualified name (`Client.Format`).
#[derive(Clone, Default)]
pub struct ClientFunctions {
    map: HashMap<String, ClientFn>,
}

impl ClientFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.map.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ClientFn> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.map.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ClientFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFunctions")
            .field("names", &self.names())
            .finish()
    }
}

/// Methods whose value depends on the store (clock, date arithmetic).
pub fn is_store_only(method: &str) -> bool {
    matches!(
        method,
        "DateTime.UtcNow"
            | "DateTime.Now"
            | "AddDays"
            | "AddMonths"
            | "AddYears"
            | "AddHours"
            | "AddMinutes"
            | "AddSeconds"
    )
}

/// True when `call_method` knows how to evaluate `method`.
pub fn is_client_method(method: &str, has_receiver: bool) -> bool {
    if has_receiver {
        matches!(
            method,
            "StartsWith"
                | "EndsWith"
                | "Contains"
                | "ToUpper"
                | "ToLower"
                | "Trim"
                | "TrimStart"
                | "TrimEnd"
                | "Substring"
                | "IndexOf"
                | "Replace"
                | "ToString"
                | "Equals"
        )
    } else {
        matches!(
            method,
            "Math.Abs"
                | "Math.Ceiling"
                | "Math.Floor"
                | "Math.Round"
                | "Math.Sqrt"
                | "Math.Pow"
                | "Math.Sign"
                | "Math.Exp"
                | "Math.Log"
                | "Math.Log10"
                | "Math.Truncate"
                | "Math.Max"
                | "Math.Min"
                | "string.IsNullOrEmpty"
                | "string.Concat"
        )
    }
}

fn arity(name: &str, args: &[Value], n: usize) -> Result<(), EvalError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(EvalError::Function {
            name: name.to_string(),
            message: format!("expected {n} argument(s), got {}", args.len()),
        })
    }
}

fn string_arg<'a>(name: &str, v: &'a Value) -> Result<&'a str, EvalError> {
    v.as_str()
        .ok_or_else(|| EvalError::mismatch(name, format!("a {} argument", type_name(v))))
}

fn number_arg(name: &str, v: &Value) -> Result<f64, EvalError> {
    as_f64(v).ok_or_else(|| EvalError::mismatch(name, format!("a {} argument", type_name(v))))
}

fn int_arg(name: &str, v: &Value) -> Result<i64, EvalError> {
    as_i64(v).ok_or_else(|| EvalError::mismatch(name, format!("a {} argument", type_name(v))))
}

fn substring(s: &str, start: i64, len: Option<i64>) -> Result<Value, EvalError> {
    let chars: Vec<char> = s.chars().collect();
    if start < 0 || start as usize > chars.len() {
        return Err(EvalError::IndexOutOfRange(start));
    }
    let start = start as usize;
    let end = match len {
        Some(l) if l < 0 => return Err(EvalError::IndexOutOfRange(l)),
        Some(l) => (start + l as usize).min(chars.len()),
        None => chars.len(),
    };
    Ok(Value::String(chars[start..end].iter().collect()))
}

fn index_of(s: &str, needle: &str) -> Value {
    match s.find(needle) {
        Some(byte) => Value::from(s[..byte].chars().count() as i64),
        None => Value::from(-1),
    }
}

fn integral(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        float(f)
    }
}

fn math(name: &str, f: impl Fn(f64) -> f64, v: &Value) -> Result<Value, EvalError> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    Ok(float(f(number_arg(name, v)?)))
}

/// Evaluate a query-text method on the client. `None` when `method` is not built in.
pub fn call_method(
    method: &str,
    receiver: Option<&Value>,
    args: &[Value],
) -> Option<Result<Value, EvalError>> {
    let out = match receiver {
        Some(r) => call_instance(method, r, args),
        None => call_static(method, args),
    };
    match out {
        Err(EvalError::UnknownFunction(_)) => None,
        other => Some(other),
    }
}

fn call_instance(method: &str, recv: &Value, args: &[Value]) -> Result<Value, EvalError> {
    if recv.is_null() && method != "Equals" {
        return Err(EvalError::Function {
            name: method.to_string(),
            message: "receiver is null".into(),
        });
    }
    match method {
        "Contains" if recv.is_array() => {
            arity(method, args, 1)?;
            let items = recv.as_array().map(Vec::as_slice).unwrap_or_default();
            Ok(Value::Bool(items.iter().any(|i| values_equal(i, &args[0]))))
        }
        "StartsWith" | "EndsWith" | "Contains" => {
            arity(method, args, 1)?;
            let s = string_arg(method, recv)?;
            let p = string_arg(method, &args[0])?;
            Ok(Value::Bool(match method {
                "StartsWith" => s.starts_with(p),
                "EndsWith" => s.ends_with(p),
                _ => s.contains(p),
            }))
        }
        "ToUpper" => Ok(Value::String(string_arg(method, recv)?.to_uppercase())),
        "ToLower" => Ok(Value::String(string_arg(method, recv)?.to_lowercase())),
        "Trim" => Ok(Value::String(string_arg(method, recv)?.trim().to_string())),
        "TrimStart" => Ok(Value::String(string_arg(method, recv)?.trim_start().to_string())),
        "TrimEnd" => Ok(Value::String(string_arg(method, recv)?.trim_end().to_string())),
        "Substring" => {
            let s = string_arg(method, recv)?;
            let start = int_arg(method, args.first().unwrap_or(&Value::Null))?;
            let len = match args.get(1) {
                Some(l) => Some(int_arg(method, l)?),
                None => None,
            };
            substring(s, start, len)
        }
        "IndexOf" => {
            arity(method, args, 1)?;
            Ok(index_of(string_arg(method, recv)?, string_arg(method, &args[0])?))
        }
        "Replace" => {
            arity(method, args, 2)?;
            let s = string_arg(method, recv)?;
            Ok(Value::String(s.replace(
                string_arg(method, &args[0])?,
                string_arg(method, &args[1])?,
            )))
        }
        "ToString" => Ok(match recv {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }),
        "Equals" => {
            arity(method, args, 1)?;
            Ok(Value::Bool(values_equal(recv, &args[0])))
        }
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

fn call_static(method: &str, args: &[Value]) -> Result<Value, EvalError> {
    let first = args.first().unwrap_or(&Value::Null);
    match method {
        "Math.Abs" => {
            arity(method, args, 1)?;
            match as_i64(first) {
                Some(i) if first.is_i64() => i
                    .checked_abs()
                    .map(Value::from)
                    .ok_or_else(|| EvalError::Overflow(format!("Math.Abs({i})"))),
                _ => math(method, f64::abs, first),
            }
        }
        "Math.Ceiling" => math(method, f64::ceil, first),
        "Math.Floor" => math(method, f64::floor, first),
        "Math.Round" => math(method, f64::round_ties_even, first),
        "Math.Truncate" => math(method, f64::trunc, first),
        "Math.Sqrt" => math(method, f64::sqrt, first),
        "Math.Exp" => math(method, f64::exp, first),
        "Math.Log" => math(method, f64::ln, first),
        "Math.Log10" => math(method, f64::log10, first),
        "Math.Sign" => {
            let f = number_arg(method, first)?;
            Ok(Value::from(if f > 0.0 {
                1
            } else if f < 0.0 {
                -1
            } else {
                0
            }))
        }
        "Math.Pow" => {
            arity(method, args, 2)?;
            Ok(float(number_arg(method, &args[0])?.powf(number_arg(method, &args[1])?)))
        }
        "Math.Max" | "Math.Min" => {
            arity(method, args, 2)?;
            let keep_first = match crate::value::partial_compare(&args[0], &args[1]) {
                Some(o) => (o.is_ge()) == (method == "Math.Max"),
                None => return Err(EvalError::mismatch(method, "mixed arguments")),
            };
            Ok(if keep_first { args[0].clone() } else { args[1].clone() })
        }
        "string.IsNullOrEmpty" => {
            arity(method, args, 1)?;
            Ok(Value::Bool(match first {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                _ => false,
            }))
        }
        "string.Concat" => {
            let mut out = String::new();
            for a in args {
                match a {
                    Value::Null => {}
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::String(out))
        }
        m if is_store_only(m) => Err(EvalError::StoreOnly(m.to_string())),
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

/// Evaluate a (non-aggregate) dialect function inside the in-memory store.
pub fn call_store_function(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let first = args.first().unwrap_or(&Value::Null);
    let second = args.get(1).unwrap_or(&Value::Null);
    let string_fn = |f: fn(&str) -> String| -> Result<Value, EvalError> {
        match first {
            Value::String(s) => Ok(Value::String(f(s))),
            _ => Ok(Value::Null),
        }
    };
    match name {
        "STARTSWITH" | "ENDSWITH" | "CONTAINS" => match (first, second) {
            (Value::String(s), Value::String(p)) => Ok(Value::Bool(match name {
                "STARTSWITH" => s.starts_with(p.as_str()),
                "ENDSWITH" => s.ends_with(p.as_str()),
                _ => s.contains(p.as_str()),
            })),
            _ => Ok(Value::Null),
        },
        "UPPER" => string_fn(|s| s.to_uppercase()),
        "LOWER" => string_fn(|s| s.to_lowercase()),
        "TRIM" => string_fn(|s| s.trim().to_string()),
        "LTRIM" => string_fn(|s| s.trim_start().to_string()),
        "RTRIM" => string_fn(|s| s.trim_end().to_string()),
        "LENGTH" => Ok(match first {
            Value::String(s) => Value::from(s.chars().count() as i64),
            _ => Value::Null,
        }),
        "SUBSTRING" => match first {
            Value::String(s) => {
                let start = int_arg(name, second)?.max(0);
                let len = match args.get(2) {
                    Some(l) => Some(int_arg(name, l)?),
                    None => None,
                };
                let clamped = (start as usize).min(s.chars().count()) as i64;
                substring(s, clamped, len)
            }
            _ => Ok(Value::Null),
        },
        "INDEX_OF" => match (first, second) {
            (Value::String(s), Value::String(n)) => Ok(index_of(s, n)),
            _ => Ok(Value::Null),
        },
        "REPLACE" => match (first, second, args.get(2)) {
            (Value::String(s), Value::String(a), Some(Value::String(b))) => {
                Ok(Value::String(s.replace(a.as_str(), b)))
            }
            _ => Ok(Value::Null),
        },
        "CONCAT" => {
            let mut out = String::new();
            for a in args {
                match a {
                    Value::String(s) => out.push_str(s),
                    _ => return Ok(Value::Null),
                }
            }
            Ok(Value::String(out))
        }
        "ABS" => match as_i64(first) {
            Some(i) if first.is_i64() => Ok(Value::from(i.wrapping_abs())),
            _ => math(name, f64::abs, first),
        },
        "CEILING" => Ok(as_f64(first).map(|f| integral(f.ceil())).unwrap_or(Value::Null)),
        "FLOOR" => Ok(as_f64(first).map(|f| integral(f.floor())).unwrap_or(Value::Null)),
        "ROUND" => Ok(as_f64(first).map(|f| integral(f.round())).unwrap_or(Value::Null)),
        "TRUNC" => Ok(as_f64(first).map(|f| integral(f.trunc())).unwrap_or(Value::Null)),
        "SQRT" => math(name, f64::sqrt, first),
        "EXP" => math(name, f64::exp, first),
        "LOG" => math(name, f64::ln, first),
        "LOG10" => math(name, f64::log10, first),
        "SIGN" => Ok(as_f64(first)
            .map(|f| Value::from(if f > 0.0 { 1 } else if f < 0.0 { -1 } else { 0 }))
            .unwrap_or(Value::Null)),
        "POWER" => match (as_f64(first), as_f64(second)) {
            (Some(a), Some(b)) => Ok(float(a.powf(b))),
            _ => Ok(Value::Null),
        },
        "IS_NULL" => Ok(Value::Bool(first.is_null())),
        "ARRAY_LENGTH" => Ok(match first {
            Value::Array(items) => Value::from(items.len() as i64),
            _ => Value::Null,
        }),
        "ARRAY_CONTAINS" => Ok(match first {
            Value::Array(items) => Value::Bool(items.iter().any(|i| values_equal(i, second))),
            _ => Value::Null,
        }),
        "ARRAY_CONCAT" => {
            let mut out = Vec::new();
            for a in args {
                match a {
                    Value::Array(items) => out.extend(items.iter().cloned()),
                    _ => return Ok(Value::Null),
                }
            }
            Ok(Value::Array(out))
        }
        "SetUnion" | "SetIntersect" => match (first, second) {
            (Value::Array(a), Value::Array(b)) => {
                let mut out: Vec<Value> = Vec::new();
                let keep = |v: &Value| {
                    name == "SetUnion" || b.iter().any(|w| values_equal(v, w))
                };
                let extra: &[Value] = if name == "SetUnion" { b } else { &[] };
                for v in a.iter().chain(extra.iter()) {
                    if keep(v) && !out.iter().any(|w| values_equal(v, w)) {
                        out.push(v.clone());
                    }
                }
                Ok(Value::Array(out))
            }
            _ => Ok(Value::Null),
        },
        "GetCurrentDateTime" | "DateTimeAdd" | "DateTimePart" => Err(EvalError::Rejected(format!(
            "function '{name}' is not supported by the in-memory store"
        ))),
        other => Err(EvalError::Rejected(format!("unknown function '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_methods() {
        let r = call_method("StartsWith", Some(&json!("Seattle")), &[json!("Sea")]);
        assert_eq!(r, Some(Ok(json!(true))));
        let r = call_method("Substring", Some(&json!("London")), &[json!(1), json!(3)]);
        assert_eq!(r, Some(Ok(json!("ond"))));
        assert_eq!(call_method("Frobnicate", Some(&json!("x")), &[]), None);
    }

    #[test]
    fn store_only_methods_are_reported() {
        assert!(is_store_only("DateTime.UtcNow"));
        assert_eq!(
            call_method("DateTime.UtcNow", None, &[]),
            Some(Err(EvalError::StoreOnly("DateTime.UtcNow".into())))
        );
    }

    #[test]
    fn store_functions() {
        assert_eq!(call_store_function("UPPER", &[json!("abc")]).unwrap(), json!("ABC"));
        assert_eq!(
            call_store_function("ARRAY_CONTAINS", &[json!(["A", "B"]), json!("B")]).unwrap(),
            json!(true)
        );
        assert_eq!(
            call_store_function("SetUnion", &[json!([1, 2]), json!([2, 3])]).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            call_store_function("SetIntersect", &[json!([1, 2]), json!([2, 3])]).unwrap(),
            json!([2])
        );
        assert!(matches!(
            call_store_function("DateTimePart", &[json!("yyyy"), json!("2020-01-01")]),
            Err(EvalError::Rejected(_))
        ));
    }

    #[test]
    fn client_registry() {
        let mut fns = ClientFunctions::new();
        fns.register("Client.Shout", |args: &[Value]| {
            Ok(json!(format!("{}!", args[0].as_str().unwrap_or_default())))
        });
        assert!(fns.contains("Client.Shout"));
        let f = fns.get("Client.Shout").unwrap();
        assert_eq!(f(&[json!("hi")]).unwrap(), json!("hi!"));
    }
}

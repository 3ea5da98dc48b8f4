//! Helpers over `serde_json::Value` shared by both evaluators.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::error::EvalError;

pub fn truthy(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Ordering between two values of the same kind; `None` across kinds.
pub fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Option<Ordering> {
    match (x.as_i64(), y.as_i64()) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
    }
}

/// Total order used for sorting: values of different kinds order by kind.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match partial_compare(a, b) {
        Some(o) => o,
        None => match (a, b) {
            (Value::Array(x), Value::Array(y)) => {
                for (l, r) in x.iter().zip(y.iter()) {
                    match compare(l, r) {
                        Ordering::Equal => continue,
                        non_eq => return non_eq,
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => type_rank(a).cmp(&type_rank(b)),
        },
    }
}

/// Structural equality with numeric comparison by value (`10 == 10.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

pub fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

pub fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            let f = n.as_f64()?;
            (f.fract() == 0.0).then_some(f as i64)
        }),
        _ => None,
    }
}

pub fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Key usable for hashing/grouping values that compare equal.
pub fn group_key(v: &Value) -> String {
    match v {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(group_key).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl Arith {
    fn symbol(self) -> &'static str {
        match self {
            Arith::Add => "+",
            Arith::Subtract => "-",
            Arith::Multiply => "*",
            Arith::Divide => "/",
            Arith::Modulo => "%",
        }
    }
}

/// Numeric arithmetic. `null` operands lift to `null`.
///
/// With `integer_division` two integers divide with truncation; otherwise
/// division always yields a float.
pub fn arith(op: Arith, a: &Value, b: &Value, integer_division: bool) -> Result<Value, EvalError> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        return Err(EvalError::mismatch(
            op.symbol(),
            format!("{} and {}", type_name(a), type_name(b)),
        ));
    };
    let overflow = || EvalError::Overflow(format!("{x} {} {y}", op.symbol()));
    if let (Some(i), Some(j)) = (x.as_i64(), y.as_i64()) {
        let out = match op {
            Arith::Add => i.checked_add(j).ok_or_else(overflow)?,
            Arith::Subtract => i.checked_sub(j).ok_or_else(overflow)?,
            Arith::Multiply => i.checked_mul(j).ok_or_else(overflow)?,
            Arith::Divide if integer_division => {
                if j == 0 {
                    return Err(EvalError::DivideByZero);
                }
                i.checked_div(j).ok_or_else(overflow)?
            }
            Arith::Divide => return Ok(float(i as f64 / j as f64)),
            Arith::Modulo => {
                if j == 0 {
                    return Err(EvalError::DivideByZero);
                }
                i.checked_rem(j).ok_or_else(overflow)?
            }
        };
        return Ok(Value::from(out));
    }
    let (Some(f), Some(g)) = (x.as_f64(), y.as_f64()) else {
        return Err(overflow());
    };
    Ok(float(match op {
        Arith::Add => f + g,
        Arith::Subtract => f - g,
        Arith::Multiply => f * g,
        Arith::Divide => f / g,
        Arith::Modulo => f % g,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitwise {
    And,
    Or,
    Xor,
    LeftShift,
    RightShift,
}

pub fn bitwise(op: Bitwise, a: &Value, b: &Value) -> Result<Value, EvalError> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        return match op {
            Bitwise::And => Ok(Value::Bool(*x & *y)),
            Bitwise::Or => Ok(Value::Bool(*x | *y)),
            Bitwise::Xor => Ok(Value::Bool(*x ^ *y)),
            _ => Err(EvalError::mismatch("shift", "booleans")),
        };
    }
    let (Some(x), Some(y)) = (as_i64(a), as_i64(b)) else {
        return Err(EvalError::mismatch(
            "bitwise",
            format!("{} and {}", type_name(a), type_name(b)),
        ));
    };
    Ok(Value::from(match op {
        Bitwise::And => x & y,
        Bitwise::Or => x | y,
        Bitwise::Xor => x ^ y,
        Bitwise::LeftShift => x.wrapping_shl(y as u32),
        Bitwise::RightShift => x.wrapping_shr(y as u32),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_and_float_arithmetic() {
        assert_eq!(arith(Arith::Add, &json!(10248), &json!(10), true).unwrap(), json!(10258));
        assert_eq!(arith(Arith::Divide, &json!(7), &json!(2), true).unwrap(), json!(3));
        assert_eq!(arith(Arith::Divide, &json!(7), &json!(2), false).unwrap(), json!(3.5));
        assert_eq!(arith(Arith::Add, &json!(null), &json!(1), true).unwrap(), json!(null));
        assert_eq!(
            arith(Arith::Modulo, &json!(1), &json!(0), true),
            Err(EvalError::DivideByZero)
        );
    }

    #[test]
    fn ordering_across_kinds() {
        assert_eq!(compare(&json!(null), &json!(1)), Ordering::Less);
        assert_eq!(compare(&json!("b"), &json!("a")), Ordering::Greater);
        assert!(values_equal(&json!(10), &json!(10.0)));
        assert_eq!(group_key(&json!(10.0)), group_key(&json!(10)));
    }

    #[test]
    fn bitwise_ops() {
        assert_eq!(bitwise(Bitwise::And, &json!(6), &json!(3)).unwrap(), json!(2));
        assert_eq!(bitwise(Bitwise::LeftShift, &json!(1), &json!(4)).unwrap(), json!(16));
        assert_eq!(bitwise(Bitwise::Xor, &json!(true), &json!(false)).unwrap(), json!(true));
    }
}

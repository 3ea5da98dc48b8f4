//! Expression evaluation for the in-memory store.
//!
//! Follows the document store's semantics rather than the client's: missing
//! properties read as `null`, comparisons across kinds are `null` rather
//! than errors, and division is always floating point.

use std::collections::HashMap;

use docql_core::sql::{SqlBinaryOp, SqlExpr, SqlUnaryOp};
use serde_json::{Map, Value};

use crate::error::EvalError;
use crate::functions::call_store_function;
use crate::select::run_select;
use crate::value::{
    arith, as_i64, bitwise, compare, float, partial_compare, truthy, values_equal, Arith,
    Bitwise,
};

/// Alias bindings of one row: `[("c", doc), ("o", order)]`.
pub type Row = Vec<(String, Value)>;

#[derive(Debug, Clone, Copy)]
pub struct StoreContext<'a> {
    pub params: &'a HashMap<String, Value>,
}

pub fn is_aggregate(name: &str) -> bool {
    matches!(name, "COUNT" | "SUM" | "MIN" | "MAX" | "AVG")
}

/// True when `e` aggregates at this level (subqueries aggregate on their own).
pub fn contains_aggregate(e: &SqlExpr) -> bool {
    match e {
        SqlExpr::Function { name, args } => is_aggregate(name) || args.iter().any(contains_aggregate),
        SqlExpr::Property { target, .. } => contains_aggregate(target),
        SqlExpr::Index { target, index } => contains_aggregate(target) || contains_aggregate(index),
        SqlExpr::Unary { operand, .. } => contains_aggregate(operand),
        SqlExpr::Binary { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        SqlExpr::Conditional {
            test,
            if_true,
            if_false,
        } => contains_aggregate(test) || contains_aggregate(if_true) || contains_aggregate(if_false),
        SqlExpr::In { item, values } => {
            contains_aggregate(item) || values.iter().any(contains_aggregate)
        }
        SqlExpr::Object(fields) => fields.iter().any(|(_, v)| contains_aggregate(v)),
        SqlExpr::Array(items) => items.iter().any(contains_aggregate),
        SqlExpr::Alias(_)
        | SqlExpr::Literal(_)
        | SqlExpr::Parameter(_)
        | SqlExpr::Exists(_)
        | SqlExpr::ArraySubquery(_)
        | SqlExpr::Subquery(_) => false,
    }
}

/// Evaluate `e` against `row`. `group` holds the rows of the current group
/// when evaluating a grouped projection.
pub fn eval_sql(
    e: &SqlExpr,
    row: &Row,
    group: Option<&[Row]>,
    ctx: StoreContext<'_>,
) -> Result<Value, EvalError> {
    match e {
        SqlExpr::Alias(a) => row
            .iter()
            .rev()
            .find(|(n, _)| n == a)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| EvalError::UnboundVariable(a.clone())),
        SqlExpr::Property { target, name } => Ok(match eval_sql(target, row, group, ctx)? {
            Value::Object(mut map) => map.remove(name).unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        SqlExpr::Index { target, index } => {
            let t = eval_sql(target, row, group, ctx)?;
            let i = eval_sql(index, row, group, ctx)?;
            Ok(match (t, &i) {
                (Value::Array(items), i) => as_i64(i)
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|u| items.into_iter().nth(u))
                    .unwrap_or(Value::Null),
                (Value::Object(mut map), Value::String(k)) => map.remove(k).unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
        SqlExpr::Literal(s) => Ok(s.to_json()),
        SqlExpr::Parameter(p) => ctx
            .params
            .get(p)
            .cloned()
            .ok_or_else(|| EvalError::MissingParameter(p.clone())),
        SqlExpr::Unary { op, operand } => {
            let v = eval_sql(operand, row, group, ctx)?;
            Ok(match (op, &v) {
                (SqlUnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
                (SqlUnaryOp::Negate, Value::Number(n)) => match n.as_i64() {
                    Some(i) => Value::from(i.wrapping_neg()),
                    None => float(-n.as_f64().unwrap_or(f64::NAN)),
                },
                (SqlUnaryOp::BitwiseNot, v) => match as_i64(v) {
                    Some(i) => Value::from(!i),
                    None => Value::Null,
                },
                _ => Value::Null,
            })
        }
        SqlExpr::Binary { op, left, right } => {
            let l = eval_sql(left, row, group, ctx)?;
            let r = eval_sql(right, row, group, ctx)?;
            binary(*op, &l, &r)
        }
        SqlExpr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            if truthy(&eval_sql(test, row, group, ctx)?) {
                eval_sql(if_true, row, group, ctx)
            } else {
                eval_sql(if_false, row, group, ctx)
            }
        }
        SqlExpr::In { item, values } => {
            let needle = eval_sql(item, row, group, ctx)?;
            for v in values {
                if values_equal(&needle, &eval_sql(v, row, group, ctx)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        SqlExpr::Function { name, args } if is_aggregate(name) => {
            let group = group.ok_or_else(|| {
                EvalError::Rejected(format!("aggregate '{name}' used outside of a projection"))
            })?;
            aggregate(name, args, group, ctx)
        }
        SqlExpr::Function { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(eval_sql(a, row, group, ctx)?);
            }
            call_store_function(name, &values)
        }
        SqlExpr::Object(fields) => {
            let mut map = Map::new();
            for (k, v) in fields {
                let value = eval_sql(v, row, group, ctx)?;
                map.insert(k.clone(), value);
            }
            Ok(Value::Object(map))
        }
        SqlExpr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for i in items {
                out.push(eval_sql(i, row, group, ctx)?);
            }
            Ok(Value::Array(out))
        }
        SqlExpr::Exists(select) => Ok(Value::Bool(!run_select(select, &[], row, ctx)?.is_empty())),
        SqlExpr::ArraySubquery(select) => Ok(Value::Array(run_select(select, &[], row, ctx)?)),
        SqlExpr::Subquery(select) => Ok(run_select(select, &[], row, ctx)?
            .into_iter()
            .next()
            .unwrap_or(Value::Null)),
    }
}

fn binary(op: SqlBinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let cmp = |f: fn(std::cmp::Ordering) -> bool| match partial_compare(l, r) {
        Some(o) => Value::Bool(f(o)),
        None => Value::Null,
    };
    Ok(match op {
        SqlBinaryOp::And => match (l, r) {
            (Value::Bool(false), _) | (_, Value::Bool(false)) => Value::Bool(false),
            (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
            _ => Value::Null,
        },
        SqlBinaryOp::Or => match (l, r) {
            (Value::Bool(true), _) | (_, Value::Bool(true)) => Value::Bool(true),
            (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
            _ => Value::Null,
        },
        SqlBinaryOp::Equal => Value::Bool(values_equal(l, r)),
        SqlBinaryOp::NotEqual => Value::Bool(!values_equal(l, r)),
        SqlBinaryOp::LessThan => cmp(|o| o.is_lt()),
        SqlBinaryOp::LessThanOrEqual => cmp(|o| o.is_le()),
        SqlBinaryOp::GreaterThan => cmp(|o| o.is_gt()),
        SqlBinaryOp::GreaterThanOrEqual => cmp(|o| o.is_ge()),
        SqlBinaryOp::Concat => match (l, r) {
            (Value::String(a), Value::String(b)) => Value::String(format!("{a}{b}")),
            _ => Value::Null,
        },
        SqlBinaryOp::Add
        | SqlBinaryOp::Subtract
        | SqlBinaryOp::Multiply
        | SqlBinaryOp::Divide
        | SqlBinaryOp::Modulo => {
            if !(l.is_number() && r.is_number()) {
                return Ok(Value::Null);
            }
            let a = match op {
                SqlBinaryOp::Add => Arith::Add,
                SqlBinaryOp::Subtract => Arith::Subtract,
                SqlBinaryOp::Multiply => Arith::Multiply,
                SqlBinaryOp::Divide => Arith::Divide,
                _ => Arith::Modulo,
            };
            match arith(a, l, r, false) {
                Ok(v) => v,
                Err(EvalError::DivideByZero) => Value::Null,
                Err(e) => return Err(e),
            }
        }
        SqlBinaryOp::BitwiseAnd
        | SqlBinaryOp::BitwiseOr
        | SqlBinaryOp::BitwiseXor
        | SqlBinaryOp::LeftShift
        | SqlBinaryOp::RightShift => {
            if !(l.is_number() && r.is_number()) {
                return Ok(Value::Null);
            }
            let b = match op {
                SqlBinaryOp::BitwiseAnd => Bitwise::And,
                SqlBinaryOp::BitwiseOr => Bitwise::Or,
                SqlBinaryOp::BitwiseXor => Bitwise::Xor,
                SqlBinaryOp::LeftShift => Bitwise::LeftShift,
                _ => Bitwise::RightShift,
            };
            bitwise(b, l, r)?
        }
    })
}

fn aggregate(
    name: &str,
    args: &[SqlExpr],
    group: &[Row],
    ctx: StoreContext<'_>,
) -> Result<Value, EvalError> {
    let mut values = Vec::with_capacity(group.len());
    if let Some(arg) = args.first() {
        for row in group {
            let v = eval_sql(arg, row, None, ctx)?;
            if !v.is_null() {
                values.push(v);
            }
        }
    }
    Ok(match name {
        "COUNT" => Value::from(values.len() as i64),
        "SUM" => {
            let mut acc = Value::from(0);
            for v in values.iter().filter(|v| v.is_number()) {
                acc = arith(Arith::Add, &acc, v, false)?;
            }
            acc
        }
        "AVG" => {
            let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        "MIN" | "MAX" => {
            let mut best: Option<Value> = None;
            for v in values {
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        let o = compare(&v, &b);
                        if (name == "MAX" && o.is_gt()) || (name == "MIN" && o.is_lt()) {
                            v
                        } else {
                            b
                        }
                    }
                });
            }
            best.unwrap_or(Value::Null)
        }
        other => return Err(EvalError::Rejected(format!("unknown aggregate '{other}'"))),
    })
}

//! Client-side evaluation of query expressions.
//!
//! Used for two jobs: computing evaluatable subtrees during normalization,
//! and running residual projections over materialized results. Root entity
//! sets cannot be enumerated here; embedded collections can.

use std::collections::{HashMap, HashSet};

use docql_core::expr::{BinaryOp, Expr, Lambda, Query, SetOp, Terminal, UnaryOp};
use serde_json::{Map, Value};

use crate::error::EvalError;
use crate::functions::{call_method, ClientFunctions};
use crate::value::{
    arith, as_i64, bitwise, compare, float, group_key, partial_compare, truthy, type_name,
    values_equal, Arith, Bitwise,
};

/// Ambient inputs of an evaluation: bound parameters and client functions.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub params: &'a HashMap<String, Value>,
    pub functions: &'a ClientFunctions,
}

/// Lexically scoped lambda bindings.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    vars: Vec<(String, Value)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.vars.push((name.to_string(), value));
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.vars.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn depth(&self) -> usize {
        self.vars.len()
    }

    fn truncate(&mut self, depth: usize) {
        self.vars.truncate(depth);
    }
}

pub fn eval_lambda(
    l: &Lambda,
    args: &[Value],
    ctx: EvalContext<'_>,
    scope: &mut Scope,
) -> Result<Value, EvalError> {
    let depth = scope.depth();
    for (p, a) in l.params.iter().zip(args.iter()) {
        scope.bind(p, a.clone());
    }
    let out = eval_expr(&l.body, ctx, scope);
    scope.truncate(depth);
    out
}

pub fn eval_expr(expr: &Expr, ctx: EvalContext<'_>, scope: &mut Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Constant(s) => Ok(s.to_json()),
        Expr::Captured { value, .. } => Ok(value.to_json()),
        Expr::Parameter { name } => ctx
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::MissingParameter(name.clone())),
        Expr::Var(v) => scope
            .lookup(v)
            .cloned()
            .ok_or_else(|| EvalError::UnboundVariable(v.clone())),
        Expr::Member { target, member } => {
            let t = eval_expr(target, ctx, scope)?;
            member_of(&t, member)
        }
        Expr::Index { target, index } => {
            let t = eval_expr(target, ctx, scope)?;
            let i = eval_expr(index, ctx, scope)?;
            index_of(&t, &i)
        }
        Expr::Unary { op, operand } => {
            let v = eval_expr(operand, ctx, scope)?;
            unary(*op, &v)
        }
        Expr::Binary { op, left, right } => binary(*op, left, right, ctx, scope),
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            if truthy(&eval_expr(test, ctx, scope)?) {
                eval_expr(if_true, ctx, scope)
            } else {
                eval_expr(if_false, ctx, scope)
            }
        }
        Expr::Coalesce { left, right } => {
            let l = eval_expr(left, ctx, scope)?;
            if l.is_null() {
                eval_expr(right, ctx, scope)
            } else {
                Ok(l)
            }
        }
        Expr::Call {
            receiver,
            method,
            args,
        } => {
            let recv = match receiver {
                Some(r) => Some(eval_expr(r, ctx, scope)?),
                None => None,
            };
            let mut values = Vec::with_capacity(args.len() + 1);
            for a in args {
                values.push(eval_expr(a, ctx, scope)?);
            }
            if let Some(f) = ctx.functions.get(method) {
                if let Some(r) = recv {
                    values.insert(0, r);
                }
                return f(&values);
            }
            call_method(method, recv.as_ref(), &values)
                .unwrap_or_else(|| Err(EvalError::UnknownFunction(method.clone())))
        }
        Expr::New { members } => {
            let mut map = Map::new();
            for (name, m) in members {
                map.insert(name.clone(), eval_expr(m, ctx, scope)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for i in items {
                out.push(eval_expr(i, ctx, scope)?);
            }
            Ok(Value::Array(out))
        }
        Expr::Subquery { query, terminal } => {
            let rows = eval_query(query, ctx, scope)?;
            eval_terminal(terminal, rows, ctx, scope)
        }
        Expr::Collection(query) => Ok(Value::Array(eval_query(query, ctx, scope)?)),
    }
}

fn member_of(target: &Value, member: &str) -> Result<Value, EvalError> {
    match target {
        Value::Object(map) => Ok(map.get(member).cloned().unwrap_or(Value::Null)),
        Value::String(s) if member == "Length" => Ok(Value::from(s.chars().count() as i64)),
        Value::Array(items) if member == "Count" || member == "Length" => {
            Ok(Value::from(items.len() as i64))
        }
        Value::Null => Err(EvalError::Function {
            name: member.to_string(),
            message: "member access on a null value".into(),
        }),
        other => Err(EvalError::NotEvaluatable(format!(
            "member '{member}' of a {}",
            type_name(other)
        ))),
    }
}

fn index_of(target: &Value, index: &Value) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Array(items), i) => {
            let i = as_i64(i).ok_or_else(|| EvalError::mismatch("[]", "a non-integer index"))?;
            usize::try_from(i)
                .ok()
                .and_then(|u| items.get(u))
                .cloned()
                .ok_or(EvalError::IndexOutOfRange(i))
        }
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (t, i) => Err(EvalError::mismatch(
            "[]",
            format!("a {} indexed by a {}", type_name(t), type_name(i)),
        )),
    }
}

fn unary(op: UnaryOp, v: &Value) -> Result<Value, EvalError> {
    match (op, v) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Negate, Value::Number(n)) => match n.as_i64() {
            Some(i) => i
                .checked_neg()
                .map(Value::from)
                .ok_or_else(|| EvalError::Overflow(format!("-{i}"))),
            None => Ok(float(-n.as_f64().unwrap_or(f64::NAN))),
        },
        (UnaryOp::BitwiseNot, v) if as_i64(v).is_some() => Ok(Value::from(!as_i64(v).unwrap_or(0))),
        (op, v) => Err(EvalError::mismatch(&format!("{op:?}"), type_name(v))),
    }
}

fn binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    ctx: EvalContext<'_>,
    scope: &mut Scope,
) -> Result<Value, EvalError> {
    // Short-circuit forms evaluate the right side lazily.
    match op {
        BinaryOp::AndAlso => {
            let l = eval_expr(left, ctx, scope)?;
            if !truthy(&l) {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(truthy(&eval_expr(right, ctx, scope)?)));
        }
        BinaryOp::OrElse => {
            let l = eval_expr(left, ctx, scope)?;
            if truthy(&l) {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(truthy(&eval_expr(right, ctx, scope)?)));
        }
        _ => {}
    }
    let l = eval_expr(left, ctx, scope)?;
    let r = eval_expr(right, ctx, scope)?;
    match op {
        BinaryOp::Add if l.is_string() || r.is_string() => {
            let mut s = String::new();
            for v in [&l, &r] {
                match v {
                    Value::Null => {}
                    Value::String(x) => s.push_str(x),
                    other => s.push_str(&other.to_string()),
                }
            }
            Ok(Value::String(s))
        }
        BinaryOp::Add => arith(Arith::Add, &l, &r, true),
        BinaryOp::Subtract => arith(Arith::Subtract, &l, &r, true),
        BinaryOp::Multiply => arith(Arith::Multiply, &l, &r, true),
        BinaryOp::Divide => arith(Arith::Divide, &l, &r, true),
        BinaryOp::Modulo => arith(Arith::Modulo, &l, &r, true),
        BinaryOp::Equal => Ok(Value::Bool(values_equal(&l, &r))),
        BinaryOp::NotEqual => Ok(Value::Bool(!values_equal(&l, &r))),
        BinaryOp::LessThan => Ok(Value::Bool(partial_compare(&l, &r).is_some_and(|o| o.is_lt()))),
        BinaryOp::LessThanOrEqual => {
            Ok(Value::Bool(partial_compare(&l, &r).is_some_and(|o| o.is_le())))
        }
        BinaryOp::GreaterThan => Ok(Value::Bool(partial_compare(&l, &r).is_some_and(|o| o.is_gt()))),
        BinaryOp::GreaterThanOrEqual => {
            Ok(Value::Bool(partial_compare(&l, &r).is_some_and(|o| o.is_ge())))
        }
        BinaryOp::And => bitwise(Bitwise::And, &l, &r),
        BinaryOp::Or => bitwise(Bitwise::Or, &l, &r),
        BinaryOp::ExclusiveOr => bitwise(Bitwise::Xor, &l, &r),
        BinaryOp::LeftShift => bitwise(Bitwise::LeftShift, &l, &r),
        BinaryOp::RightShift => bitwise(Bitwise::RightShift, &l, &r),
        BinaryOp::AndAlso => Ok(Value::Bool(truthy(&l) && truthy(&r))),
        BinaryOp::OrElse => Ok(Value::Bool(truthy(&l) || truthy(&r))),
    }
}

/// Enumerate an embedded sequence.
pub fn eval_query(query: &Query, ctx: EvalContext<'_>, scope: &mut Scope) -> Result<Vec<Value>, EvalError> {
    match query {
        Query::Source { entity } => Err(EvalError::NotEvaluatable(format!("the '{entity}' set"))),
        Query::Embedded { source } => match eval_expr(source, ctx, scope)? {
            Value::Array(items) => Ok(items),
            Value::Null => Err(EvalError::Function {
                name: "enumerate".into(),
                message: "source sequence is null".into(),
            }),
            other => Err(EvalError::mismatch("enumerate", type_name(&other))),
        },
        Query::Where { input, predicate } => {
            let rows = eval_query(input, ctx, scope)?;
            let mut out = Vec::new();
            for row in rows {
                if truthy(&eval_lambda(predicate, std::slice::from_ref(&row), ctx, scope)?) {
                    out.push(row);
                }
            }
            Ok(out)
        }
        Query::Select { input, selector } => {
            let rows = eval_query(input, ctx, scope)?;
            rows.iter()
                .map(|r| eval_lambda(selector, std::slice::from_ref(r), ctx, scope))
                .collect()
        }
        Query::SelectMany { input, collection } => {
            let rows = eval_query(input, ctx, scope)?;
            let mut out = Vec::new();
            for r in &rows {
                match eval_lambda(collection, std::slice::from_ref(r), ctx, scope)? {
                    Value::Array(items) => out.extend(items),
                    Value::Null => {}
                    other => return Err(EvalError::mismatch("SelectMany", type_name(&other))),
                }
            }
            Ok(out)
        }
        Query::OrderBy { .. } | Query::ThenBy { .. } => {
            let mut keys: Vec<(&Lambda, bool)> = Vec::new();
            let mut q = query;
            loop {
                match q {
                    Query::ThenBy {
                        input,
                        key,
                        descending,
                    } => {
                        keys.push((key, *descending));
                        q = &**input;
                    }
                    Query::OrderBy {
                        input,
                        key,
                        descending,
                    } => {
                        keys.push((key, *descending));
                        q = &**input;
                        break;
                    }
                    _ => break,
                }
            }
            keys.reverse();
            let rows = eval_query(q, ctx, scope)?;
            let mut keyed = Vec::with_capacity(rows.len());
            for r in rows {
                let mut k = Vec::with_capacity(keys.len());
                for (l, _) in &keys {
                    k.push(eval_lambda(l, std::slice::from_ref(&r), ctx, scope)?);
                }
                keyed.push((k, r));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (i, (_, desc)) in keys.iter().enumerate() {
                    let o = compare(&a[i], &b[i]);
                    let o = if *desc { o.reverse() } else { o };
                    if o.is_ne() {
                        return o;
                    }
                }
                std::cmp::Ordering::Equal
            });
            Ok(keyed.into_iter().map(|(_, r)| r).collect())
        }
        Query::Skip { input, count } => {
            let n = count_arg(count, ctx, scope)?;
            Ok(eval_query(input, ctx, scope)?.into_iter().skip(n).collect())
        }
        Query::Take { input, count } => {
            let n = count_arg(count, ctx, scope)?;
            Ok(eval_query(input, ctx, scope)?.into_iter().take(n).collect())
        }
        Query::Distinct { input } => {
            let mut seen = HashSet::new();
            Ok(eval_query(input, ctx, scope)?
                .into_iter()
                .filter(|v| seen.insert(group_key(v)))
                .collect())
        }
        Query::SetOp { op, left, right } => {
            let l = eval_query(left, ctx, scope)?;
            let r = eval_query(right, ctx, scope)?;
            Ok(set_op(*op, l, r))
        }
        Query::OfType { .. }
        | Query::GroupBy { .. }
        | Query::Join { .. }
        | Query::Paginate { .. } => Err(EvalError::NotEvaluatable(format!(
            "'{}' over an in-memory sequence",
            query.op_name()
        ))),
    }
}

fn count_arg(count: &Expr, ctx: EvalContext<'_>, scope: &mut Scope) -> Result<usize, EvalError> {
    let v = eval_expr(count, ctx, scope)?;
    let n = as_i64(&v).ok_or_else(|| EvalError::mismatch("Skip/Take", type_name(&v)))?;
    Ok(n.max(0) as usize)
}

fn set_op(op: SetOp, left: Vec<Value>, right: Vec<Value>) -> Vec<Value> {
    match op {
        SetOp::Concat => left.into_iter().chain(right).collect(),
        SetOp::Union => {
            let mut seen = HashSet::new();
            left.into_iter()
                .chain(right)
                .filter(|v| seen.insert(group_key(v)))
                .collect()
        }
        SetOp::Intersect => {
            let r: HashSet<String> = right.iter().map(group_key).collect();
            let mut seen = HashSet::new();
            left.into_iter()
                .filter(|v| {
                    let k = group_key(v);
                    r.contains(&k) && seen.insert(k)
                })
                .collect()
        }
        SetOp::Except => {
            let r: HashSet<String> = right.iter().map(group_key).collect();
            let mut seen = HashSet::new();
            left.into_iter()
                .filter(|v| {
                    let k = group_key(v);
                    !r.contains(&k) && seen.insert(k)
                })
                .collect()
        }
    }
}

/// Reduce an already-enumerated sequence with a query-text terminal.
pub fn eval_terminal(
    terminal: &Terminal,
    rows: Vec<Value>,
    ctx: EvalContext<'_>,
    scope: &mut Scope,
) -> Result<Value, EvalError> {
    let filter = |rows: Vec<Value>,
                  pred: &Option<Lambda>,
                  scope: &mut Scope|
     -> Result<Vec<Value>, EvalError> {
        let Some(p) = pred else { return Ok(rows) };
        let mut out = Vec::new();
        for r in rows {
            if truthy(&eval_lambda(p, std::slice::from_ref(&r), ctx, scope)?) {
                out.push(r);
            }
        }
        Ok(out)
    };
    let project = |rows: Vec<Value>,
                   sel: &Option<Lambda>,
                   scope: &mut Scope|
     -> Result<Vec<Value>, EvalError> {
        match sel {
            None => Ok(rows),
            Some(s) => rows
                .iter()
                .map(|r| eval_lambda(s, std::slice::from_ref(r), ctx, scope))
                .collect(),
        }
    };
    match terminal {
        Terminal::Count { predicate, .. } => {
            Ok(Value::from(filter(rows, predicate, scope)?.len() as i64))
        }
        Terminal::Sum { selector } => sum(&project(rows, selector, scope)?),
        Terminal::Min { selector } => extreme(project(rows, selector, scope)?, false),
        Terminal::Max { selector } => extreme(project(rows, selector, scope)?, true),
        Terminal::Average { selector } => {
            let values = project(rows, selector, scope)?;
            let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                return Err(EvalError::NoElements);
            }
            Ok(float(nums.iter().sum::<f64>() / nums.len() as f64))
        }
        Terminal::Any { predicate } => Ok(Value::Bool(!filter(rows, predicate, scope)?.is_empty())),
        Terminal::All { predicate } => {
            for r in &rows {
                if !truthy(&eval_lambda(predicate, std::slice::from_ref(r), ctx, scope)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Terminal::Contains { item } => {
            let needle = eval_expr(item, ctx, scope)?;
            Ok(Value::Bool(rows.iter().any(|r| values_equal(r, &needle))))
        }
        Terminal::First {
            predicate,
            or_default,
        } => pick(filter(rows, predicate, scope)?.into_iter().next(), *or_default),
        Terminal::Last {
            predicate,
            or_default,
        } => pick(filter(rows, predicate, scope)?.pop(), *or_default),
        Terminal::Single {
            predicate,
            or_default,
        } => {
            let mut rows = filter(rows, predicate, scope)?;
            if rows.len() > 1 {
                return Err(EvalError::MoreThanOneElement);
            }
            pick(rows.pop(), *or_default)
        }
        Terminal::ElementAt { index, or_default } => {
            let i = eval_expr(index, ctx, scope)?;
            let i = as_i64(&i).ok_or_else(|| EvalError::mismatch("ElementAt", type_name(&i)))?;
            match usize::try_from(i).ok().and_then(|u| rows.get(u)) {
                Some(v) => Ok(v.clone()),
                None if *or_default => Ok(Value::Null),
                None => Err(EvalError::IndexOutOfRange(i)),
            }
        }
    }
}

fn pick(v: Option<Value>, or_default: bool) -> Result<Value, EvalError> {
    match v {
        Some(v) => Ok(v),
        None if or_default => Ok(Value::Null),
        None => Err(EvalError::NoElements),
    }
}

fn sum(values: &[Value]) -> Result<Value, EvalError> {
    let mut acc = Value::from(0);
    for v in values.iter().filter(|v| !v.is_null()) {
        acc = arith(Arith::Add, &acc, v, true)?;
    }
    Ok(acc)
}

fn extreme(values: Vec<Value>, max: bool) -> Result<Value, EvalError> {
    let mut best: Option<Value> = None;
    for v in values.into_iter().filter(|v| !v.is_null()) {
        best = Some(match best {
            None => v,
            Some(b) => {
                let o = compare(&v, &b);
                if (max && o.is_gt()) || (!max && o.is_lt()) {
                    v
                } else {
                    b
                }
            }
        });
    }
    best.ok_or(EvalError::NoElements)
}

/// Evaluate a closed expression (no lambda parameters in scope).
pub fn eval_closed(expr: &Expr, ctx: EvalContext<'_>) -> Result<Value, EvalError> {
    eval_expr(expr, ctx, &mut Scope::new())
}

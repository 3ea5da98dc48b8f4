//! Client-side steps applied to store results: residual projections and
//! the reduction of a row stream to the caller's result.

use docql_core::expr::Lambda;
use docql_core::plan::Finish;
use serde_json::Value;

use crate::error::EvalError;
use crate::eval::{eval_lambda, EvalContext, Scope};
use crate::value::as_i64;

/// Run residual selectors, in order, over one materialized value.
pub fn apply_residual(
    steps: &[Lambda],
    value: Value,
    ctx: EvalContext<'_>,
) -> Result<Value, EvalError> {
    let mut scope = Scope::new();
    let mut current = value;
    for step in steps {
        current = eval_lambda(step, std::slice::from_ref(&current), ctx, &mut scope)?;
    }
    Ok(current)
}

/// Reduce the rows returned by the store according to `finish`.
///
/// Aggregates arrive as a single row; element terminals arrive as at most
/// one (or two, for `Single`) rows.
pub fn finish_rows(finish: Finish, mut rows: Vec<Value>) -> Result<Value, EvalError> {
    let first_scalar = |rows: &mut Vec<Value>| -> Value {
        if rows.is_empty() {
            Value::Null
        } else {
            rows.swap_remove(0)
        }
    };
    match finish {
        Finish::Sequence => Ok(Value::Array(rows)),
        Finish::First { or_default } => match rows.into_iter().next() {
            Some(v) => Ok(v),
            None if or_default => Ok(Value::Null),
            None => Err(EvalError::NoElements),
        },
        Finish::Single { or_default } => {
            if rows.len() > 1 {
                return Err(EvalError::MoreThanOneElement);
            }
            match rows.pop() {
                Some(v) => Ok(v),
                None if or_default => Ok(Value::Null),
                None => Err(EvalError::NoElements),
            }
        }
        Finish::Count | Finish::Sum => Ok(match first_scalar(&mut rows) {
            Value::Null => Value::from(0),
            v => v,
        }),
        Finish::Min | Finish::Max | Finish::Average => match first_scalar(&mut rows) {
            Value::Null => Err(EvalError::NoElements),
            v => Ok(v),
        },
        Finish::Any => {
            let n = as_i64(&first_scalar(&mut rows)).unwrap_or(0);
            Ok(Value::Bool(n > 0))
        }
        Finish::All => {
            let n = as_i64(&first_scalar(&mut rows)).unwrap_or(0);
            Ok(Value::Bool(n == 0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::ClientFunctions;
    use docql_core::expr::Expr;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn single_detects_second_row() {
        assert_eq!(
            finish_rows(Finish::Single { or_default: true }, vec![json!(1), json!(2)]),
            Err(EvalError::MoreThanOneElement)
        );
        assert_eq!(
            finish_rows(Finish::Single { or_default: true }, vec![]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn count_based_finishes() {
        assert_eq!(finish_rows(Finish::Any, vec![json!(3)]).unwrap(), json!(true));
        assert_eq!(finish_rows(Finish::All, vec![json!(0)]).unwrap(), json!(true));
        assert_eq!(finish_rows(Finish::Max, vec![json!(null)]), Err(EvalError::NoElements));
    }

    #[test]
    fn residual_chain() {
        let params = HashMap::new();
        let mut fns = ClientFunctions::new();
        fns.register("Client.Upper", |args: &[Value]| {
            Ok(json!(args[0].as_str().unwrap_or_default().to_uppercase()))
        });
        let ctx = EvalContext {
            params: &params,
            functions: &fns,
        };
        let step = Lambda::new(
            "c",
            Expr::Call {
                receiver: None,
                method: "Client.Upper".into(),
                args: vec![Expr::var("c").member("City")],
            },
        );
        let out = apply_residual(&[step], json!({"City": "london"}), ctx).unwrap();
        assert_eq!(out, json!("LONDON"));
    }
}

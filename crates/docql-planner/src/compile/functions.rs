//! Method and member translation table.

use std::ops::RangeInclusive;

use docql_core::error::QueryError;
use docql_core::expr::Expr;
use docql_core::schema::DataType;
use docql_core::sql::{SqlBinaryOp, SqlExpr};
use docql_core::types::Scalar;

use super::shape::{Binding, Shape};
use super::subquery::contains_sql;
use crate::report;

const RECEIVER_METHODS: &[&str] = &[
    "StartsWith",
    "EndsWith",
    "Contains",
    "ToUpper",
    "ToLower",
    "Trim",
    "TrimStart",
    "TrimEnd",
    "Substring",
    "IndexOf",
    "Replace",
    "Equals",
    "AddYears",
    "AddMonths",
    "AddDays",
    "AddHours",
    "AddMinutes",
    "AddSeconds",
];

const STATIC_METHODS: &[&str] = &[
    "Math.Abs",
    "Math.Ceiling",
    "Math.Floor",
    "Math.Round",
    "Math.Sqrt",
    "Math.Pow",
    "Math.Sign",
    "Math.Exp",
    "Math.Log",
    "Math.Log10",
    "Math.Truncate",
    "string.IsNullOrEmpty",
    "string.Concat",
    "DateTime.UtcNow",
];

/// Whether a call has a store translation.
pub fn is_translatable_call(method: &str, has_receiver: bool) -> bool {
    if has_receiver {
        RECEIVER_METHODS.contains(&method)
    } else {
        STATIC_METHODS.contains(&method)
    }
}

fn date_part(unit: &str) -> Option<&'static str> {
    Some(match unit {
        "Year" | "Years" => "yyyy",
        "Month" | "Months" => "mm",
        "Day" | "Days" => "dd",
        "Hour" | "Hours" => "hh",
        "Minute" | "Minutes" => "mi",
        "Second" | "Seconds" => "ss",
        "Millisecond" => "ms",
        _ => return None,
    })
}

fn arity(e: &Expr, method: &str, args: &[Binding], expected: RangeInclusive<usize>) -> Result<(), QueryError> {
    if expected.contains(&args.len()) {
        return Ok(());
    }
    let detail = if expected.start() == expected.end() {
        format!("'{method}' expects {} argument(s)", expected.start())
    } else {
        format!("'{method}' expects {} to {} arguments", expected.start(), expected.end())
    };
    Err(report::unsupported(e, detail))
}

fn sqls(args: Vec<Binding>) -> Vec<SqlExpr> {
    args.into_iter().map(|b| b.sql).collect()
}

/// Translate a call whose receiver and arguments are already translated.
pub(crate) fn translate_call(
    receiver: Option<Binding>,
    method: &str,
    args: Vec<Binding>,
    e: &Expr,
) -> Result<Binding, QueryError> {
    match receiver {
        Some(r) => receiver_call(r, method, args, e),
        None => static_call(method, args, e),
    }
}

fn receiver_call(r: Binding, method: &str, args: Vec<Binding>, e: &Expr) -> Result<Binding, QueryError> {
    let string_fn = |name: &str, args: Vec<Binding>, ty: DataType| {
        let mut all = vec![r.sql.clone()];
        all.extend(sqls(args));
        Binding::scalar(SqlExpr::func(name, all), ty)
    };
    match method {
        "Contains" if r.shape.element().is_some() && !r.shape.is_string() => {
            arity(e, method, &args, 1..=1)?;
            let item = args.into_iter().next();
            match item {
                Some(item) => Ok(Binding::boolean(contains_sql(r, item))),
                None => Err(report::unsupported(e, "'Contains' expects 1 argument(s)")),
            }
        }
        "StartsWith" | "EndsWith" | "Contains" => {
            arity(e, method, &args, 1..=1)?;
            Ok(string_fn(&method.to_uppercase(), args, DataType::Boolean))
        }
        "ToUpper" | "ToLower" | "Trim" | "TrimStart" | "TrimEnd" => {
            arity(e, method, &args, 0..=0)?;
            let name = match method {
                "ToUpper" => "UPPER",
                "ToLower" => "LOWER",
                "Trim" => "TRIM",
                "TrimStart" => "LTRIM",
                _ => "RTRIM",
            };
            Ok(string_fn(name, args, DataType::Utf8))
        }
        "Substring" => {
            arity(e, method, &args, 1..=2)?;
            let mut all = vec![r.sql.clone()];
            let one = args.len() == 1;
            all.extend(sqls(args));
            if one {
                all.push(SqlExpr::func("LENGTH", vec![r.sql.clone()]));
            }
            Ok(Binding::scalar(SqlExpr::func("SUBSTRING", all), DataType::Utf8))
        }
        "IndexOf" => {
            arity(e, method, &args, 1..=1)?;
            Ok(string_fn("INDEX_OF", args, DataType::Int64))
        }
        "Replace" => {
            arity(e, method, &args, 2..=2)?;
            Ok(string_fn("REPLACE", args, DataType::Utf8))
        }
        "Equals" => {
            arity(e, method, &args, 1..=1)?;
            let other = sqls(args).remove(0);
            Ok(Binding::boolean(SqlExpr::binary(SqlBinaryOp::Equal, r.sql, other)))
        }
        m if m.starts_with("Add") && date_part(&m[3..]).is_some() => {
            arity(e, method, &args, 1..=1)?;
            let part = date_part(&m[3..]).unwrap_or("dd");
            let amount = sqls(args).remove(0);
            Ok(Binding::scalar(
                SqlExpr::func("DateTimeAdd", vec![SqlExpr::literal(part), amount, r.sql]),
                DataType::DateTime,
            ))
        }
        _ => Err(report::unsupported(e, format!("method '{method}' has no translation"))),
    }
}

fn static_call(method: &str, args: Vec<Binding>, e: &Expr) -> Result<Binding, QueryError> {
    let first_type = args
        .first()
        .and_then(|a| a.shape.data_type().cloned())
        .unwrap_or(DataType::Json);
    let (name, ty, counts) = match method {
        "Math.Abs" => ("ABS", first_type, 1..=1),
        "Math.Ceiling" => ("CEILING", first_type, 1..=1),
        "Math.Floor" => ("FLOOR", first_type, 1..=1),
        "Math.Round" => ("ROUND", first_type, 1..=1),
        "Math.Truncate" => ("TRUNC", first_type, 1..=1),
        "Math.Sqrt" => ("SQRT", DataType::Float64, 1..=1),
        "Math.Pow" => ("POWER", DataType::Float64, 2..=2),
        "Math.Sign" => ("SIGN", DataType::Int64, 1..=1),
        "Math.Exp" => ("EXP", DataType::Float64, 1..=1),
        "Math.Log" => ("LOG", DataType::Float64, 1..=2),
        "Math.Log10" => ("LOG10", DataType::Float64, 1..=1),
        "string.Concat" => ("CONCAT", DataType::Utf8, 2..=4),
        "DateTime.UtcNow" => ("GetCurrentDateTime", DataType::DateTime, 0..=0),
        "string.IsNullOrEmpty" => {
            arity(e, method, &args, 1..=1)?;
            let x = sqls(args).remove(0);
            return Ok(Binding::boolean(SqlExpr::binary(
                SqlBinaryOp::Or,
                SqlExpr::binary(SqlBinaryOp::Equal, x.clone(), SqlExpr::Literal(Scalar::Null)),
                SqlExpr::binary(SqlBinaryOp::Equal, x, SqlExpr::literal("")),
            )));
        }
        _ => return Err(report::unsupported(e, format!("method '{method}' has no translation"))),
    };
    arity(e, method, &args, counts)?;
    Ok(Binding::scalar(SqlExpr::func(name, sqls(args)), ty))
}

/// Members with a store translation on scalar values: string length,
/// collection counts and date parts.
pub(crate) fn scalar_member(target: &Binding, member: &str) -> Option<Binding> {
    let ty = target.shape.data_type()?;
    match (ty, member) {
        (DataType::Utf8, "Length") => Some(Binding::scalar(
            SqlExpr::func("LENGTH", vec![target.sql.clone()]),
            DataType::Int64,
        )),
        (DataType::Array(_), "Count" | "Length") => Some(Binding::scalar(
            SqlExpr::func("ARRAY_LENGTH", vec![target.sql.clone()]),
            DataType::Int64,
        )),
        (DataType::DateTime, m) => date_part(m).map(|part| {
            Binding::scalar(
                SqlExpr::func("DateTimePart", vec![SqlExpr::literal(part), target.sql.clone()]),
                DataType::Int64,
            )
        }),
        _ => None,
    }
}

/// `Count` on an owned collection.
pub(crate) fn collection_member(target: &Binding, member: &str) -> Option<Binding> {
    match (&target.shape, member) {
        (Shape::Collection { .. }, "Count" | "Length") => Some(Binding::scalar(
            SqlExpr::func("ARRAY_LENGTH", vec![target.sql.clone()]),
            DataType::Int64,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> Binding {
        Binding::scalar(SqlExpr::alias("c").prop("Name"), DataType::Utf8)
    }

    fn lit(s: impl Into<Scalar>) -> Binding {
        let s = s.into();
        let ty = s.data_type();
        Binding::scalar(SqlExpr::Literal(s), ty)
    }

    fn call(r: Option<Binding>, m: &str, args: Vec<Binding>) -> String {
        translate_call(r, m, args, &Expr::var("x")).unwrap().sql.to_string()
    }

    #[test]
    fn string_methods() {
        assert_eq!(call(Some(name()), "StartsWith", vec![lit("A")]), r#"STARTSWITH(c["Name"], "A")"#);
        assert_eq!(call(Some(name()), "ToUpper", vec![]), r#"UPPER(c["Name"])"#);
        assert_eq!(
            call(Some(name()), "Substring", vec![lit(1i64)]),
            r#"SUBSTRING(c["Name"], 1, LENGTH(c["Name"]))"#
        );
        assert_eq!(call(Some(name()), "Contains", vec![lit("x")]), r#"CONTAINS(c["Name"], "x")"#);
    }

    #[test]
    fn static_and_date_functions() {
        assert_eq!(call(None, "Math.Abs", vec![lit(-2i64)]), "ABS(-2)");
        assert_eq!(
            call(None, "string.IsNullOrEmpty", vec![name()]),
            r#"((c["Name"] = null) OR (c["Name"] = ""))"#
        );
        let date = Binding::scalar(SqlExpr::alias("c").prop("OrderDate"), DataType::DateTime);
        assert_eq!(
            call(Some(date.clone()), "AddDays", vec![lit(1i64)]),
            r#"DateTimeAdd("dd", 1, c["OrderDate"])"#
        );
        assert_eq!(
            scalar_member(&date, "Year").unwrap().sql.to_string(),
            r#"DateTimePart("yyyy", c["OrderDate"])"#
        );
    }

    #[test]
    fn untranslatable_calls_are_reported() {
        assert!(!is_translatable_call("DateTime.Now", false));
        assert!(is_translatable_call("DateTime.UtcNow", false));
        let err = translate_call(Some(name()), "PadLeft", vec![], &Expr::var("x")).unwrap_err();
        assert_eq!(err.code(), "CompilationUnsupported");
        let err = translate_call(Some(name()), "StartsWith", vec![], &Expr::var("x")).unwrap_err();
        assert!(err.to_string().contains("expects 1"));
    }
}

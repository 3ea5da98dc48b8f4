//! Execution of dialect statements over in-memory documents.
//!
//! Stage order: FROM/JOIN, WHERE, then either GROUP BY + aggregate
//! projection or ORDER BY + projection, then DISTINCT, then OFFSET/LIMIT.

use std::collections::{HashMap, HashSet};

use docql_core::sql::{FromClause, SelectExpr};
use serde_json::Value;

use crate::error::EvalError;
use crate::filter::filter_rows;
use crate::sort::sort_rows;
use crate::sql_eval::{contains_aggregate, eval_sql, Row, StoreContext};
use crate::value::{as_i64, group_key, type_name};

/// Run a top-level statement against the documents of one container.
pub fn execute_select(
    select: &SelectExpr,
    documents: &[Value],
    params: &HashMap<String, Value>,
) -> Result<Vec<Value>, EvalError> {
    run_select(select, documents, &Vec::new(), StoreContext { params })
}

/// Run a statement, possibly nested, with `outer` as the enclosing row.
pub fn run_select(
    select: &SelectExpr,
    documents: &[Value],
    outer: &Row,
    ctx: StoreContext<'_>,
) -> Result<Vec<Value>, EvalError> {
    let mut rows: Vec<Row> = match &select.from {
        FromClause::Root { alias } => documents
            .iter()
            .map(|d| extend(outer, alias, d.clone()))
            .collect(),
        FromClause::In { alias, source } => iterate(eval_sql(source, outer, None, ctx)?)?
            .into_iter()
            .map(|v| extend(outer, alias, v))
            .collect(),
    };

    for join in &select.joins {
        let mut joined = Vec::new();
        for row in &rows {
            for v in iterate(eval_sql(&join.source, row, None, ctx)?)? {
                joined.push(extend(row, &join.alias, v));
            }
        }
        rows = joined;
    }

    let rows = filter_rows(select.predicate.as_ref(), rows, ctx)?;

    let mut values = if !select.group_by.is_empty() || contains_aggregate(&select.projection) {
        if !select.orderings.is_empty() {
            return Err(EvalError::Rejected(
                "ORDER BY is not supported together with aggregates or GROUP BY".into(),
            ));
        }
        let groups = group_rows(&select.group_by, rows, ctx)?;
        let mut out = Vec::with_capacity(groups.len());
        for group in &groups {
            let representative = group.first().unwrap_or(outer);
            out.push(eval_sql(&select.projection, representative, Some(group.as_slice()), ctx)?);
        }
        out
    } else {
        let rows = sort_rows(&select.orderings, rows, ctx)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(eval_sql(&select.projection, row, None, ctx)?);
        }
        out
    };

    if select.distinct {
        let mut seen = HashSet::new();
        values.retain(|v| seen.insert(group_key(v)));
    }

    let offset = match &select.offset {
        Some(o) => count(eval_sql(o, outer, None, ctx)?, "OFFSET")?,
        None => 0,
    };
    let limit = match &select.limit {
        Some(l) => Some(count(eval_sql(l, outer, None, ctx)?, "LIMIT")?),
        None => None,
    };
    let values = values.into_iter().skip(offset);
    Ok(match limit {
        Some(l) => values.take(l).collect(),
        None => values.collect(),
    })
}

fn extend(row: &Row, alias: &str, v: Value) -> Row {
    let mut out = row.clone();
    out.push((alias.to_string(), v));
    out
}

fn iterate(v: Value) -> Result<Vec<Value>, EvalError> {
    match v {
        Value::Array(items) => Ok(items),
        // Iterating a missing or non-array property yields nothing.
        _ => Ok(Vec::new()),
    }
}

fn count(v: Value, clause: &str) -> Result<usize, EvalError> {
    match as_i64(&v) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(EvalError::Rejected(format!(
            "{clause} expects a non-negative integer, got a {}",
            type_name(&v)
        ))),
    }
}

/// Group rows by key, preserving first-seen order. Without keys the whole
/// input is one group, even when empty.
fn group_rows(
    keys: &[docql_core::sql::SqlExpr],
    rows: Vec<Row>,
    ctx: StoreContext<'_>,
) -> Result<Vec<Vec<Row>>, EvalError> {
    if keys.is_empty() {
        return Ok(vec![rows]);
    }
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<Row>> = Vec::new();
    for row in rows {
        let mut parts = Vec::with_capacity(keys.len());
        for k in keys {
            parts.push(group_key(&eval_sql(k, &row, None, ctx)?));
        }
        let key = parts.join("\u{1f}");
        match index.get(&key) {
            Some(&i) => groups[i].push(row),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::sql::{JoinClause, Ordering, SqlBinaryOp, SqlExpr};
    use serde_json::json;

    fn docs() -> Vec<Value> {
        vec![
            json!({"id": "ALFKI", "City": "Berlin", "Discriminator": "Customer",
                   "Orders": [{"OrderID": 1, "Total": 10}, {"OrderID": 2, "Total": 30}]}),
            json!({"id": "ANATR", "City": "London", "Discriminator": "Customer", "Orders": []}),
            json!({"id": "AROUT", "City": "London", "Discriminator": "Customer",
                   "Orders": [{"OrderID": 3, "Total": 5}]}),
        ]
    }

    fn root() -> FromClause {
        FromClause::Root { alias: "c".into() }
    }

    #[test]
    fn ordered_paged_projection() {
        let mut s = SelectExpr::new(SqlExpr::alias("c").prop("id"), root());
        s.orderings.push(Ordering {
            expr: SqlExpr::alias("c").prop("id"),
            descending: true,
        });
        s.offset = Some(SqlExpr::literal(1i64));
        s.limit = Some(SqlExpr::param("__p_0"));
        let mut params = HashMap::new();
        params.insert("__p_0".to_string(), json!(1));
        let out = execute_select(&s, &docs(), &params).unwrap();
        assert_eq!(out, vec![json!("ANATR")]);
    }

    #[test]
    fn exists_over_embedded_collection() {
        let mut inner = SelectExpr::new(
            SqlExpr::literal(1i64),
            FromClause::In {
                alias: "o".into(),
                source: SqlExpr::alias("c").prop("Orders"),
            },
        );
        inner.value = false;
        inner.predicate = Some(SqlExpr::binary(
            SqlBinaryOp::GreaterThan,
            SqlExpr::alias("o").prop("Total"),
            SqlExpr::literal(20i64),
        ));
        let mut s = SelectExpr::new(SqlExpr::alias("c").prop("id"), root());
        s.predicate = Some(SqlExpr::Exists(Box::new(inner)));
        let out = execute_select(&s, &docs(), &HashMap::new()).unwrap();
        assert_eq!(out, vec![json!("ALFKI")]);
    }

    #[test]
    fn group_by_with_count() {
        let mut s = SelectExpr::new(
            SqlExpr::Object(vec![
                ("City".into(), SqlExpr::alias("c").prop("City")),
                ("N".into(), SqlExpr::func("COUNT", vec![SqlExpr::literal(1i64)])),
            ]),
            root(),
        );
        s.group_by.push(SqlExpr::alias("c").prop("City"));
        let out = execute_select(&s, &docs(), &HashMap::new()).unwrap();
        assert_eq!(out, vec![json!({"City": "Berlin", "N": 1}), json!({"City": "London", "N": 2})]);
    }

    #[test]
    fn count_over_empty_input_is_zero() {
        let s = SelectExpr::new(SqlExpr::func("COUNT", vec![SqlExpr::literal(1i64)]), root());
        assert_eq!(execute_select(&s, &[], &HashMap::new()).unwrap(), vec![json!(0)]);
    }

    #[test]
    fn intra_document_join() {
        let mut s = SelectExpr::new(SqlExpr::alias("o").prop("OrderID"), root());
        s.joins.push(JoinClause {
            alias: "o".into(),
            source: SqlExpr::alias("c").prop("Orders"),
        });
        let out = execute_select(&s, &docs(), &HashMap::new()).unwrap();
        assert_eq!(out, vec![json!(1), json!(2), json!(3)]);
    }
}

//! WHERE stage of in-memory statement execution.

use docql_core::sql::SqlExpr;

use crate::error::EvalError;
use crate::sql_eval::{eval_sql, Row, StoreContext};
use crate::value::truthy;

/// Keep rows whose predicate evaluates to exactly `true`.
pub fn filter_rows(
    predicate: Option<&SqlExpr>,
    rows: Vec<Row>,
    ctx: StoreContext<'_>,
) -> Result<Vec<Row>, EvalError> {
    let Some(pred) = predicate else {
        return Ok(rows);
    };
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if truthy(&eval_sql(pred, &row, None, ctx)?) {
            out.push(row);
        }
    }
    Ok(out)
}

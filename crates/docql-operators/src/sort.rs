//! ORDER BY stage of in-memory statement execution.

use std::cmp::Ordering as CmpOrdering;

use docql_core::sql::Ordering;

use crate::error::EvalError;
use crate::sql_eval::{eval_sql, Row, StoreContext};
use crate::value::compare;

/// Stable sort of `rows`. Only document paths are orderable; anything else
/// is refused the way the document store refuses it.
pub fn sort_rows(
    orderings: &[Ordering],
    rows: Vec<Row>,
    ctx: StoreContext<'_>,
) -> Result<Vec<Row>, EvalError> {
    if orderings.is_empty() {
        return Ok(rows);
    }
    for o in orderings {
        if !o.expr.is_path() {
            return Err(EvalError::Rejected(format!(
                "Unsupported ORDER BY clause. ORDER BY item expression could not be mapped to a document path: {}",
                o.expr
            )));
        }
    }
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        let mut keys = Vec::with_capacity(orderings.len());
        for o in orderings {
            keys.push(eval_sql(&o.expr, &row, None, ctx)?);
        }
        keyed.push((keys, row));
    }
    keyed.sort_by(|(a, _), (b, _)| {
        for (i, o) in orderings.iter().enumerate() {
            let c = compare(&a[i], &b[i]);
            let c = if o.descending { c.reverse() } else { c };
            if c != CmpOrdering::Equal {
                return c;
            }
        }
        CmpOrdering::Equal
    });
    Ok(keyed.into_iter().map(|(_, r)| r).collect())
}

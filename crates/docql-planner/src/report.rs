//! Failure reporting: builds `QueryError`s that quote the offending
//! sub-expression in query-text form, and flattens any failure into a
//! serializable `Diagnostic` for tools.

use std::fmt::Display;

use docql_core::error::QueryError;
use serde::Serialize;

use crate::error::PlanError;

pub fn unsupported(expression: &impl Display, detail: impl Into<String>) -> QueryError {
    QueryError::CompilationUnsupported {
        expression: expression.to_string(),
        detail: detail.into(),
    }
}

pub fn nested_paging(expression: &impl Display) -> QueryError {
    QueryError::NestedPagingUnsupported {
        expression: expression.to_string(),
    }
}

pub fn no_pushdown(expression: &impl Display) -> QueryError {
    QueryError::NoSubqueryPushdown {
        expression: expression.to_string(),
    }
}

pub fn non_correlated(expression: &impl Display) -> QueryError {
    QueryError::NonCorrelatedSubqueryUnsupported {
        expression: expression.to_string(),
    }
}

pub fn multiple_roots(existing: &str, referenced: &str) -> QueryError {
    QueryError::MultipleRootTypes {
        existing: existing.to_string(),
        referenced: referenced.to_string(),
    }
}

pub fn paging_misuse(expression: &impl Display, detail: impl Into<String>) -> QueryError {
    QueryError::PagingMisuse {
        expression: expression.to_string(),
        detail: detail.into(),
    }
}

/// Flat, serializable view of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl From<&QueryError> for Diagnostic {
    fn from(e: &QueryError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
            expression: e.expression().map(str::to_string),
        }
    }
}

impl From<&PlanError> for Diagnostic {
    fn from(e: &PlanError) -> Self {
        match e {
            PlanError::Query(q) => q.into(),
            other => Self {
                code: other.code().to_string(),
                message: other.to_string(),
                expression: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::expr::{Expr, Query};

    #[test]
    fn quotes_the_offending_query() {
        let q = Query::source("Customer")
            .skip(Expr::constant(5i64))
            .take(Expr::constant(10i64));
        let err = nested_paging(&q);
        assert_eq!(err.expression(), Some("Customer.Skip(5).Take(10)"));

        let d = Diagnostic::from(&err);
        assert_eq!(d.code, "NestedPagingUnsupported");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["expression"], "Customer.Skip(5).Take(10)");
    }

    #[test]
    fn multiple_roots_names_both() {
        let d = Diagnostic::from(&multiple_roots("Customer", "Order"));
        assert!(d.message.contains("'Order'") && d.message.contains("'Customer'"));
        assert!(d.expression.is_none());
    }
}

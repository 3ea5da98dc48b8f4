use docql_core::error::QueryError;
use docql_operators::EvalError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanError>;

/// Everything that can stop a query tree from becoming a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A translation failure from the closed taxonomy.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A captured subtree failed to evaluate; reported unchanged.
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Core(#[from] docql_core::Error),
}

impl PlanError {
    pub fn as_query(&self) -> Option<&QueryError> {
        match self {
            PlanError::Query(q) => Some(q),
            _ => None,
        }
    }

    /// Stable code for query failures, `"EvaluationFailed"` for captured
    /// values that threw, `"Internal"` otherwise.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::Query(q) => q.code(),
            PlanError::Eval(_) => "EvaluationFailed",
            PlanError::Core(_) => "Internal",
        }
    }
}

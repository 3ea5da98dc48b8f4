use thiserror::Error;

/// Failures raised while evaluating expressions outside the store.
///
/// These propagate to callers unchanged: a captured value that cannot be
/// computed, or a residual projection that throws, is reported as itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Sequence contains no elements")]
    NoElements,

    #[error("Sequence contains more than one element")]
    MoreThanOneElement,

    #[error("Index {0} was out of range")]
    IndexOutOfRange(i64),

    #[error("Attempted to divide by zero")]
    DivideByZero,

    #[error("Arithmetic overflow evaluating '{0}'")]
    Overflow(String),

    #[error("Operator '{op}' cannot be applied to {detail}")]
    TypeMismatch { op: String, detail: String },

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("'{0}' can only be evaluated by the store")]
    StoreOnly(String),

    #[error("Unbound variable '{0}'")]
    UnboundVariable(String),

    #[error("No value bound for parameter '@{0}'")]
    MissingParameter(String),

    #[error("'{0}' cannot be evaluated on the client")]
    NotEvaluatable(String),

    #[error("Function '{name}' failed: {message}")]
    Function { name: String, message: String },

    /// The in-memory store refused a statement the real store would also refuse.
    #[error("{0}")]
    Rejected(String),
}

impl EvalError {
    pub(crate) fn mismatch(op: &str, detail: impl Into<String>) -> Self {
        EvalError::TypeMismatch {
            op: op.to_string(),
            detail: detail.into(),
        }
    }
}

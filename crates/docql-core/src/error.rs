use thiserror::Error;
use uuid::Uuid;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the core data model itself (not of a user query).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

/// The closed set of query failures surfaced to callers.
///
/// Compile-time kinds are raised before any store round trip and name the
/// offending construct in its query-text form. `TransientStoreFailure` is the
/// only runtime kind and carries the correlation id of the failed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("The query could not be translated: {detail}. Offending expression: '{expression}'")]
    CompilationUnsupported { expression: String, detail: String },

    #[error("Subqueries with OFFSET or LIMIT are not supported. Offending expression: '{expression}'")]
    NestedPagingUnsupported { expression: String },

    #[error("The root entity type '{referenced}' is referenced by the query, but '{existing}' is already being referenced. A query can only reference a single root entity type.")]
    MultipleRootTypes { existing: String, referenced: String },

    #[error("Non-correlated subqueries are not supported. Offending expression: '{expression}'")]
    NonCorrelatedSubqueryUnsupported { expression: String },

    #[error("The operation would require a subquery pushdown, which is not supported. Offending expression: '{expression}'")]
    NoSubqueryPushdown { expression: String },

    #[error("Continuation-token paging is only supported on the outermost query: {detail}. Offending expression: '{expression}'")]
    PagingMisuse { expression: String, detail: String },

    #[error("The store rejected the request (activity {activity_id}): {message}")]
    TransientStoreFailure { activity_id: Uuid, message: String },
}

impl QueryError {
    /// Stable identifying string of the failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::CompilationUnsupported { .. } => "CompilationUnsupported",
            QueryError::NestedPagingUnsupported { .. } => "NestedPagingUnsupported",
            QueryError::MultipleRootTypes { .. } => "MultipleRootTypes",
            QueryError::NonCorrelatedSubqueryUnsupported { .. } => {
                "NonCorrelatedSubqueryUnsupported"
            }
            QueryError::NoSubqueryPushdown { .. } => "NoSubqueryPushdown",
            QueryError::PagingMisuse { .. } => "PagingMisuse",
            QueryError::TransientStoreFailure { .. } => "TransientStoreFailure",
        }
    }

    /// The offending sub-expression, when the kind carries one.
    pub fn expression(&self) -> Option<&str> {
        match self {
            QueryError::CompilationUnsupported { expression, .. }
            | QueryError::NestedPagingUnsupported { expression }
            | QueryError::NonCorrelatedSubqueryUnsupported { expression }
            | QueryError::NoSubqueryPushdown { expression }
            | QueryError::PagingMisuse { expression, .. } => Some(expression),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, QueryError::TransientStoreFailure { .. })
    }
}

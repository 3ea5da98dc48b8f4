use docql_core::error::QueryError;
use docql_operators::EvalError;
use docql_planner::PlanError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A captured value or a client-side projection failed.
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Core(#[from] docql_core::Error),

    /// The transport has no blocking path; use the async entry points.
    #[error("synchronous execution is not supported by this transport; use the async API")]
    SyncUnsupported,
}

impl From<PlanError> for ExecError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::Query(q) => ExecError::Query(q),
            PlanError::Eval(e) => ExecError::Eval(e),
            PlanError::Core(e) => ExecError::Core(e),
        }
    }
}

impl ExecError {
    pub fn as_query(&self) -> Option<&QueryError> {
        match self {
            ExecError::Query(q) => Some(q),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExecError::Query(q) => q.code(),
            ExecError::Eval(_) => "EvaluationFailed",
            ExecError::Core(_) => "Internal",
            ExecError::SyncUnsupported => "SyncUnsupported",
        }
    }
}

/// Failures reported by a transport. The executor surfaces every one of
/// them as `TransientStoreFailure` with the invocation's activity id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid or expired continuation token '{0}'")]
    InvalidContinuation(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub(crate) fn into_exec(self, activity_id: Uuid) -> ExecError {
        #[cfg(feature = "tracing")]
        tracing::warn!(%activity_id, error = %self, "store request failed");
        ExecError::Query(QueryError::TransientStoreFailure {
            activity_id,
            message: self.to_string(),
        })
    }
}

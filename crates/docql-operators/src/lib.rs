#![forbid(unsafe_code)]
//! docql-operators: evaluation outside the compiler.
//!
//! Two evaluators live here:
//! - `eval`: query-text expressions on the client (evaluatable subtrees,
//!   residual projections, embedded-sequence terminals)
//! - `select`: dialect statements over in-memory documents, used by the
//!   in-memory transport (`filter`, `sort` and `sql_eval` are its stages)
//!
//! Both are pure and synchronous.

pub mod error;
pub mod eval;
pub mod filter;
pub mod finish;
pub mod functions;
pub mod select;
pub mod sort;
pub mod sql_eval;
pub mod value;

pub use error::EvalError;
pub use eval::{eval_closed, eval_expr, eval_query, eval_terminal, EvalContext, Scope};
pub use finish::{apply_residual, finish_rows};
pub use functions::{ClientFn, ClientFunctions};
pub use select::execute_select;

#![forbid(unsafe_code)]
//! docql: object queries over an entity model, compiled to a JSON
//! document-store dialect and run through a pluggable transport.
//!
//! This crate re-exports the workspace members:
//!   * `core`: query trees, entity model, dialect AST, errors, config
//!   * `operators`: client-side evaluation and in-memory dialect execution
//!   * `planner`: normalization, classification, compilation, DSL
//!   * `exec`: executor, query cache, pager, transports

pub use docql_core as core;
pub use docql_exec as exec;
pub use docql_operators as operators;
pub use docql_planner as planner;

pub mod prelude {
    pub use docql_core::config::EngineConfig;
    pub use docql_core::error::QueryError;
    pub use docql_core::expr::{Expr, Query, QueryTree, Terminal};
    pub use docql_core::model::{EntityType, Model};
    pub use docql_core::types::Scalar;
    pub use docql_exec::{CommandLog, ExecError, Executor, MemoryTransport, Page, QueryContext, QueryOutput};
    pub use docql_planner::{CompiledPlan, Diagnostic, Planner};
}

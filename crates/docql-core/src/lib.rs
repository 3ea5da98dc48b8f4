//! docql-core: the data shared by every docql crate.
//!
//! - `expr`: immutable query expression trees (`QueryTree`, `Query`, `Expr`)
//! - `print`: query-text rendering of trees, used in error messages
//! - `types` / `schema` / `model`: literal values and the entity model
//! - `sql`: the document-store dialect AST and its text form
//! - `plan`: result shapes and finishing steps of compiled queries
//! - `error` / `config` / `hash`: ambient plumbing

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod expr;
pub mod hash;
pub mod model;
pub mod plan;
pub mod prelude;
pub mod print;
pub mod schema;
pub mod sql;
pub mod types;

pub use prelude::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Convenient re-exports for downstream crates.

pub use crate::config::{ConfigOverrides, EngineConfig};
pub use crate::error::{Error, QueryError, Result};
pub use crate::expr::{BinaryOp, Expr, Lambda, Query, QueryTree, SetOp, Terminal, UnaryOp};
pub use crate::hash::Hash256;
pub use crate::model::{EntityType, Model, StructuralType};
pub use crate::plan::{Finish, ResultShape};
pub use crate::schema::{DataType, OwnedKind, OwnedNavigation, OwnedType, Property, ReferenceNavigation};
pub use crate::sql::{FromClause, Ordering, SelectExpr, SqlBinaryOp, SqlExpr, SqlUnaryOp};
pub use crate::types::Scalar;

//! Plan-level descriptors shared by the compiler and the evaluator.

use serde::{Deserialize, Serialize};

/// How a raw store row is turned back into a caller-facing value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultShape {
    /// A root document; the concrete type is picked from its discriminator
    /// among the types derived from `entity`.
    Entity { entity: String },
    /// An owned structure reached from `root` through `path`.
    Owned { root: String, path: Vec<String> },
    /// A scalar or untyped JSON value, passed through as is.
    Value,
    /// Named members, in declaration order.
    Object(Vec<(String, ResultShape)>),
    Array(Box<ResultShape>),
}

/// Client-side step that reduces the row stream to the caller's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Finish {
    Sequence,
    First { or_default: bool },
    /// The store is asked for two rows so a second one can be detected.
    Single { or_default: bool },
    Count,
    Sum,
    Min,
    Max,
    Average,
    /// True when the store counted at least one row.
    Any,
    /// True when the store counted no row violating the predicate.
    All,
}

impl Finish {
    pub fn is_sequence(self) -> bool {
        matches!(self, Finish::Sequence)
    }
}

//! Text front ends: method-chain query text and YAML model / case files.

pub mod parse;
pub mod yaml;

use thiserror::Error;

pub use parse::parse_query;
pub use yaml::{check_case, load_cases, load_model, parse_cases, parse_model, CaseFile, CaseOutcome, QueryCase};

#[derive(Debug, Error)]
pub enum DslError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("no captured value named '${name}'")]
    MissingCapture { name: String },

    #[error("unknown data type '{0}'")]
    UnknownType(String),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Model(#[from] docql_core::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

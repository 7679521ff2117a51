//! Error types shared by the flattening and discovery engines

use crate::unfurl::coerce::TypeTag;
use thiserror::Error;

/// Problems found while compiling configuration, before any document is touched
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid path expression '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("duplicate alias '{alias}' in table '{table}'")]
    DuplicateAlias { table: String, alias: String },

    #[error("unknown type '{type_name}' for field '{alias}'")]
    UnknownType { alias: String, type_name: String },

    #[error("table '{table}' declares no fields")]
    EmptyTable { table: String },

    #[error("split path '{path}' must not iterate arrays")]
    IterateInSplitPath { path: String },

    #[error("table '{table}' is configured more than once with different columns")]
    ConflictingTable { table: String },

    #[error("metadata column '{alias}' collides with a field of table '{table}'")]
    MetadataCollision { table: String, alias: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Strict coercion failure, before it is attributed to a field
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot interpret {raw} as {target}")]
pub struct CoerceError {
    pub raw: String,
    pub target: TypeTag,
}

/// Errors raised while turning documents into rows
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnfurlError {
    #[error("field '{alias}': cannot interpret {raw} as {expected}")]
    TypeMismatch {
        alias: String,
        raw: String,
        expected: TypeTag,
    },
}

impl UnfurlError {
    /// Short, stable name of the error kind for failure records
    pub fn kind(&self) -> &'static str {
        match self {
            UnfurlError::TypeMismatch { .. } => "type_mismatch",
        }
    }
}

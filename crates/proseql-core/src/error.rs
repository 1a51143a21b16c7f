//! The ProseQL error taxonomy: one tagged variant per failure
//! category, propagated with the original shape intact rather than
//! collapsed into a single opaque message, matching this workspace's
//! `StateError`/`AivcsError` enums.

use thiserror::Error;

/// A single schema-validation issue.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub expected: Option<String>,
    pub received: Option<String>,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            expected: None,
            received: None,
        }
    }
}

/// The top-level ProseQL error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{collection}: no row with id {id}")]
    NotFound { collection: String, id: String },

    #[error("{collection}: duplicate id {value} (existing row {existing_id})")]
    DuplicateKey {
        collection: String,
        field: String,
        value: String,
        existing_id: String,
    },

    #[error("{collection}.{field}: references missing row {value} in {target_collection}")]
    ForeignKey {
        collection: String,
        field: String,
        value: String,
        target_collection: String,
    },

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("{collection}: unique constraint {constraint} on {fields:?} already satisfied by row {existing_id}")]
    UniqueConstraint {
        collection: String,
        constraint: String,
        fields: Vec<String>,
        values: Vec<serde_json::Value>,
        existing_id: String,
    },

    #[error("hook failed during {phase}: {cause}")]
    Hook { phase: String, cause: String },

    #[error("operation {operation} rejected: {reason}")]
    Operation { operation: String, reason: String },

    #[error("transaction {operation} failed: {reason}")]
    Transaction { operation: String, reason: String },

    #[error("{collection}.{field}: dangling reference to missing row {target_id}")]
    DanglingReference {
        collection: String,
        field: String,
        target_id: String,
    },

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("storage error: {0}")]
    Storage(#[from] proseql_storage::StorageError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("plugin error: {0}")]
    Plugin(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            issues: Vec::new(),
        }
    }

    pub fn validation_with_issues(message: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Error::Validation {
            message: message.into(),
            issues,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

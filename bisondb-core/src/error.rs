// bisondb-core/src/error.rs
// Error taxonomy shared by every module

use thiserror::Error;

/// BisonDB error type
#[derive(Error, Debug)]
pub enum BisonError {
    /// Malformed caller input (non-object filter, empty batch, bad operand).
    /// Raised before any I/O is attempted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown filter or update operator
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// Corrupt frame encoding or truncated footer
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Aggregation error: {0}")]
    Aggregation(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
}

impl From<serde_json::Error> for BisonError {
    fn from(err: serde_json::Error) -> Self {
        BisonError::Serialization(err.to_string())
    }
}

impl BisonError {
    /// True for errors that leave the collection file untouched because they
    /// are raised while evaluating a record, before any replacement is committed.
    pub fn is_evaluation_error(&self) -> bool {
        matches!(
            self,
            BisonError::Validation(_) | BisonError::UnsupportedOperator(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BisonError>;

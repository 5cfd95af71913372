//! Query error types
//!
//! Defines all error conditions that can occur during target parsing
//! and evaluation.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// The target string is malformed
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// A call references a function name not in the registry
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// A function rejected its evaluated arguments
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// A template(...) call the grammar could not recognize
    /// structurally (for example, non-literal substitution arguments)
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Evaluation failed outside of any single function
    #[error("Execution error: {0}")]
    Execution(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

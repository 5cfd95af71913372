//! Storage layer error types
//!
//! Defines all errors that can occur while resolving and fetching
//! series from backends.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// A backend failed while resolving nodes for a pattern
    #[error("Find error for '{pattern}': {message}")]
    Find { pattern: String, message: String },

    /// A reader failed to fetch samples for one leaf
    #[error("Fetch error for '{path}': {message}")]
    Fetch { path: String, message: String },

    /// Every reader behind a multi-source leaf failed
    #[error("All sources failed for '{0}'")]
    AllSourcesFailed(String),

    /// A capability was requested that the backend does not implement
    #[error("Backend '{backend}' does not support {capability}")]
    Unsupported { backend: String, capability: String },

    /// Backend construction or registration failed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Convenience constructor for per-leaf fetch failures.
    pub fn fetch(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::AllSourcesFailed("a.b".to_string());
        assert_eq!(err.to_string(), "All sources failed for 'a.b'");

        let err = StorageError::fetch("a.b", "boom");
        assert_eq!(err.to_string(), "Fetch error for 'a.b': boom");
    }
}

//! Shared error types used across iolens crates.

use thiserror::Error;

/// Path-related errors shared across crates.
#[derive(Debug, Error, Clone)]
pub enum PathError {
    /// Resolved path exceeds the configured length bound.
    #[error("Resolved path too long: {length} bytes exceeds limit of {max}: {path}")]
    PathTooLong {
        /// The over-long resolved path (possibly truncated for display).
        path: String,
        /// Actual byte length of the resolved path.
        length: usize,
        /// Maximum allowed byte length.
        max: usize,
    },

    /// Path is invalid or malformed.
    #[error("Invalid path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: String,
    },

    /// IO error occurred while accessing path.
    #[error("IO error at {path}: {message}")]
    IoError {
        /// Path where error occurred.
        path: String,
        /// Error message.
        message: String,
    },
}

impl PathError {
    /// Create an IoError from std::io::Error.
    ///
    /// # Arguments
    /// * `path` - Path where the error occurred
    /// * `err` - The underlying IO error
    pub fn from_io(path: impl Into<String>, err: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

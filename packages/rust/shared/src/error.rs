//! Error types for bibgraph.
//!
//! Library crates use [`BibgraphError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all bibgraph operations.
#[derive(Debug, thiserror::Error)]
pub enum BibgraphError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Canonical store (database) error.
    #[error("store error: {0}")]
    Store(String),

    /// Similarity index (HTTP) error.
    #[error("similarity error: {0}")]
    Similarity(String),

    /// Provider record missing required fields (no title/no author/no name).
    #[error("malformed record: {message}")]
    Malformed { message: String },

    /// Data validation error (unknown entity id, bad field shape, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Network artifact exceeds the store's document size limit.
    #[error("artifact for {id} is too large ({bytes} bytes)")]
    Oversized { id: String, bytes: usize },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BibgraphError>;

impl BibgraphError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a malformed-record error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

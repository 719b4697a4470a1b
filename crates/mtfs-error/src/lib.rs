#![forbid(unsafe_code)]
//! Error types for MTFS.
//!
//! Defines `StoreError` and a `Result<T>` alias used throughout the
//! workspace. Five families cover the core: not-found, permission (auth
//! missing or caller not owner/admin), already-exists, protocol misuse,
//! and host I/O.

use thiserror::Error;

/// Unified error type for all MTFS operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("no space left in block store")]
    NoSpace,
}

impl StoreError {
    /// Whether the error is fatal to the store as a whole.
    ///
    /// Everything except an underlying I/O failure is a per-call outcome
    /// that the caller can recover from.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result alias using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_fatal() {
        let err = StoreError::from(std::io::Error::other("disk on fire"));
        assert!(err.is_fatal());
        assert!(!StoreError::NotFound("x".into()).is_fatal());
        assert!(!StoreError::AuthRequired.is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let err = StoreError::NotFound("logs/app.txt".into());
        assert_eq!(err.to_string(), "not found: logs/app.txt");
        let err = StoreError::Protocol("decompress on plain file".into());
        assert!(err.to_string().contains("decompress"));
    }
}

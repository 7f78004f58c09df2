//! Error types for cq-console
//!
//! Wraps the shared error taxonomy and adds process-control failures local
//! to the console.

use thiserror::Error;

/// Main error type for the cq-console module
#[derive(Error, Debug)]
pub enum Error {
    /// Shared CQ error (decode, normalization, session lifecycle)
    #[error(transparent)]
    Common(#[from] cq_common::Error),

    /// Engine process could not be launched
    #[error("Engine spawn error: {0}")]
    Spawn(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using cq-console Error
pub type Result<T> = std::result::Result<T, Error>;

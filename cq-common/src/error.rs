//! Common error types for the CQ console

use thiserror::Error;

/// Common result type for CQ operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the CQ crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed event or command line (non-fatal; callers degrade to log)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Result document has no locatable metrics array
    #[error("No metrics array found in result document")]
    NoMetricsFound,

    /// Session start rejected because one is already running
    #[error("A session is already active")]
    SessionAlreadyActive,

    /// Ready command sent with no or wrong pending gate
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// External engine terminated abnormally or produced no result artifact
    #[error("Engine failure: {0}")]
    EngineFailure(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (engine config writing, never the event path)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

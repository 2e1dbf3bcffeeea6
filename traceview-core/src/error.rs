//! Error types for traceview-core

use thiserror::Error;

/// Main error type for the traceview-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Session store API error (network failure or non-success status)
    #[error("session store error: {0}")]
    Api(String),

    /// Session not found on the server
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Live channel error (failed to open the stream)
    #[error("live channel error: {0}")]
    Channel(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for traceview-core
pub type Result<T> = std::result::Result<T, Error>;

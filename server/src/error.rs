//! Error types for the collection server.
//!
//! User-triggered failures become `Error` responses on the wire; only
//! infrastructure failures (startup, socket bind) escape the serve loop.

use thiserror::Error;

/// Result type alias using ServerError
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or oversized datagram; dropped without a response.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("authorization error: {0}")]
    Auth(String),

    /// Identifier space exhausted; no mutation was applied.
    #[error("capacity error: {0}")]
    Capacity(String),

    #[error("no worker with id {0}")]
    NotFound(u64),

    #[error("invalid worker: {0}")]
    Validation(String),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),
}

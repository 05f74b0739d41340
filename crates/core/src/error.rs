// Central Error Type for Engine Construction and Collaborators

use thiserror::Error;

/// Errors surfaced while building the engine or talking to collaborators.
///
/// Everything that can go wrong per request is an
/// [`RpcError`](crate::domain::error::RpcError) instead: those are values
/// travelling back to the client, not faults.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid parameter schema for route {route}: {message}")]
    InvalidSchema { route: String, message: String },

    #[error("invalid glob pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("session persistence failed: {0}")]
    SessionStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

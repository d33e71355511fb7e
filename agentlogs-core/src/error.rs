//! Error types for agentlogs-core

use thiserror::Error;

/// Main error type for the agentlogs-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error for a provider transcript or metadata file
    #[error("parse error in {provider} data: {message}")]
    Parse { provider: String, message: String },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A discovery source could not be enumerated
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Logging could not be initialized
    #[error("logging error: {0}")]
    Logging(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A specifier matched more than one session
    #[error("'{spec}' matches multiple sessions: {}", candidates.join(", "))]
    AmbiguousSession {
        spec: String,
        candidates: Vec<String>,
    },
}

/// Result type alias for agentlogs-core
pub type Result<T> = std::result::Result<T, Error>;

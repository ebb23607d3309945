// src/error.rs
// Standardized error types for valet

use thiserror::Error;

/// Main error type for the valet library
#[derive(Error, Debug)]
pub enum ValetError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using ValetError
pub type Result<T> = std::result::Result<T, ValetError>;

impl From<String> for ValetError {
    fn from(s: String) -> Self {
        ValetError::Other(s)
    }
}

impl From<tokio::task::JoinError> for ValetError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ValetError::Cancelled
        } else {
            ValetError::Other(err.to_string())
        }
    }
}

impl From<ValetError> for String {
    fn from(err: ValetError) -> Self {
        err.to_string()
    }
}

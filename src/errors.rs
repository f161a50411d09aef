//! Error types shared across the lifecycle service.

use thiserror::Error;

/// Errors raised by configuration, persistence and collaborator calls.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for LifecycleError {
    fn from(err: sqlx::Error) -> Self {
        LifecycleError::DatabaseError(err.to_string())
    }
}

impl From<reqwest::Error> for LifecycleError {
    fn from(err: reqwest::Error) -> Self {
        LifecycleError::NetworkError(err.to_string())
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

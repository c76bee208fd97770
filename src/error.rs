use crate::connection::BackendType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures raised anywhere between loading a connection and persisting its history.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connection '{connection_id}' not found")]
    ConnectionNotFound { connection_id: String },

    #[error("{operation} is not supported for {backend} connections")]
    UnsupportedOperation {
        operation: &'static str,
        backend: BackendType,
    },

    #[error("translation failed: {0}")]
    Translation(String),

    #[error("unsafe query rejected: {0}")]
    UnsafeQuery(String),

    #[error("query execution failed: {0}")]
    Execution(String),

    #[error("invalid connection configuration: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn execution(message: impl Into<String>) -> Self {
        EngineError::Execution(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        EngineError::Storage(message.into())
    }

    /// Errors that are raised to the caller without writing a history record.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            EngineError::ConnectionNotFound { .. } | EngineError::Configuration(_)
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(error: sqlx::Error) -> Self {
        EngineError::Execution(error.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            EngineError::Execution(format!("HTTP request timed out: {}", error))
        } else {
            EngineError::Execution(error.to_string())
        }
    }
}

impl From<duckdb::Error> for EngineError {
    fn from(error: duckdb::Error) -> Self {
        EngineError::Storage(error.to_string())
    }
}

impl From<r2d2::Error> for EngineError {
    fn from(error: r2d2::Error) -> Self {
        EngineError::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Storage(format!("serialization error: {}", error))
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(error: tokio::task::JoinError) -> Self {
        EngineError::Storage(format!("blocking task failed: {}", error))
    }
}
